//! The B3 propagation style (both the multi-header and single-header
//! variants), grounded on
//! `original_source/src/datadog/extraction_util.cpp`'s B3 extraction path.

use crate::error::{Error, Result};
use crate::ids::{SpanId, TraceId};
use crate::propagation::{ExtractedData, PropagationStyle, Reader, Writer};

const B3_TRACE_ID: &str = "x-b3-traceid";
const B3_SPAN_ID: &str = "x-b3-spanid";
const B3_SAMPLED: &str = "x-b3-sampled";
const B3_SINGLE: &str = "b3";

fn sampled_to_priority(value: &str) -> Result<i8> {
    match value {
        "0" => Ok(0),
        "1" => Ok(1),
        "d" => Ok(-1),
        other => Err(Error::InvalidInteger(other.to_string())),
    }
}

fn priority_to_sampled(priority: i8) -> &'static str {
    if priority <= 0 {
        "0"
    } else {
        "1"
    }
}

pub fn extract_multi(reader: &dyn Reader) -> Result<ExtractedData> {
    let trace_id = match reader.get(B3_TRACE_ID) {
        Some(value) => Some(TraceId::parse_hex(value)?),
        None => None,
    };
    let parent_id = match reader.get(B3_SPAN_ID) {
        Some(value) => Some(SpanId::parse_hex16(value)?),
        None => None,
    };
    let sampling_priority = match reader.get(B3_SAMPLED) {
        Some(value) => Some(sampled_to_priority(value)?),
        None => None,
    };

    if trace_id.is_none() && parent_id.is_none() {
        return Ok(ExtractedData::default());
    }
    if let Some(id) = trace_id {
        if id.is_zero() {
            return Err(Error::ZeroTraceId {
                style: Some(PropagationStyle::B3Multi),
            });
        }
    }

    Ok(ExtractedData {
        trace_id,
        parent_id,
        sampling_priority,
        style: Some(PropagationStyle::B3Multi),
        ..Default::default()
    })
}

pub fn inject_multi(
    trace_id: TraceId,
    span_id: SpanId,
    sampling_priority: Option<i8>,
    writer: &mut dyn Writer,
) {
    let id = if trace_id.high != 0 {
        trace_id.to_hex32()
    } else {
        trace_id.to_hex16()
    };
    writer.set(B3_TRACE_ID, id);
    writer.set(B3_SPAN_ID, span_id.to_hex16());
    if let Some(priority) = sampling_priority {
        writer.set(B3_SAMPLED, priority_to_sampled(priority).to_string());
    }
}

/// Parses the single-header `b3: {trace_id}-{span_id}-{sampled}` form. A
/// bare `b3: 0` or `b3: 1` (no trace/span id) is valid and carries only a
/// sampling decision, which this crate has no way to attach to an existing
/// trace, so it is treated as empty.
pub fn extract_single(reader: &dyn Reader) -> Result<ExtractedData> {
    let value = match reader.get(B3_SINGLE) {
        Some(v) => v,
        None => return Ok(ExtractedData::default()),
    };
    if value == "0" || value == "1" || value == "d" {
        return Ok(ExtractedData::default());
    }

    let mut parts = value.split('-');
    let trace_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(TraceId::parse_hex)
        .transpose()?;
    let parent_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(SpanId::parse_hex16)
        .transpose()?;
    let sampling_priority = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(sampled_to_priority)
        .transpose()?;

    if trace_id.is_none() && parent_id.is_none() {
        return Ok(ExtractedData::default());
    }

    Ok(ExtractedData {
        trace_id,
        parent_id,
        sampling_priority,
        style: Some(PropagationStyle::B3Single),
        ..Default::default()
    })
}

pub fn inject_single(
    trace_id: TraceId,
    span_id: SpanId,
    sampling_priority: Option<i8>,
    writer: &mut dyn Writer,
) {
    let id = if trace_id.high != 0 {
        trace_id.to_hex32()
    } else {
        trace_id.to_hex16()
    };
    let mut value = format!("{id}-{}", span_id.to_hex16());
    if let Some(priority) = sampling_priority {
        value.push('-');
        value.push_str(priority_to_sampled(priority));
    }
    writer.set(B3_SINGLE, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::CarrierMap;

    #[test]
    fn multi_header_round_trip() {
        let mut carrier = CarrierMap::default();
        inject_multi(TraceId::from_low(0xabc), SpanId::new(0x1), Some(1), &mut carrier);
        let extracted = extract_multi(&carrier).unwrap();
        assert_eq!(extracted.trace_id, Some(TraceId::from_low(0xabc)));
        assert_eq!(extracted.sampling_priority, Some(1));
    }

    #[test]
    fn single_header_round_trip() {
        let mut carrier = CarrierMap::default();
        inject_single(TraceId::from_low(0xabc), SpanId::new(0x1), Some(0), &mut carrier);
        let extracted = extract_single(&carrier).unwrap();
        assert_eq!(extracted.trace_id, Some(TraceId::from_low(0xabc)));
        assert_eq!(extracted.sampling_priority, Some(0));
    }

    #[test]
    fn single_header_bare_sampling_flag_is_empty() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert("b3".to_string(), "1".to_string());
        assert!(extract_single(&carrier).unwrap().is_empty());
    }
}
