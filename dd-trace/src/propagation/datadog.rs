//! The Datadog propagation style, grounded on
//! `original_source/src/datadog/extraction_util.cpp`'s Datadog-specific
//! extraction path and `original_source/src/datadog/tags.h`'s
//! `x-datadog-*` header names.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{SpanId, TraceId};
use crate::propagation::{ExtractedData, PropagationStyle, Reader, Writer};

const TRACE_ID: &str = "x-datadog-trace-id";
const PARENT_ID: &str = "x-datadog-parent-id";
const SAMPLING_PRIORITY: &str = "x-datadog-sampling-priority";
const ORIGIN: &str = "x-datadog-origin";
const TAGS: &str = "x-datadog-tags";

pub fn extract(reader: &dyn Reader) -> Result<ExtractedData> {
    let trace_id = match reader.get(TRACE_ID) {
        Some(value) => Some(TraceId::parse_decimal(value)?),
        None => None,
    };
    let parent_id = match reader.get(PARENT_ID) {
        Some(value) => Some(SpanId::parse_decimal(value)?),
        None => None,
    };
    let sampling_priority = match reader.get(SAMPLING_PRIORITY) {
        Some(value) => Some(
            value
                .parse::<i8>()
                .map_err(|_| Error::InvalidInteger(value.to_string()))?,
        ),
        None => None,
    };
    let origin = reader.get(ORIGIN).map(|s| s.to_string());
    let trace_tags = match reader.get(TAGS) {
        Some(value) => parse_tags(value)?,
        None => HashMap::new(),
    };

    if trace_id.is_none() && parent_id.is_none() {
        return Ok(ExtractedData::default());
    }
    if let Some(id) = trace_id {
        if id.is_zero() {
            return Err(Error::ZeroTraceId {
                style: Some(PropagationStyle::Datadog),
            });
        }
    }
    if trace_id.is_some() && parent_id.is_none() {
        return Err(Error::MissingParentSpanId {
            style: Some(PropagationStyle::Datadog),
        });
    }
    if parent_id.is_some() && trace_id.is_none() && origin.is_none() {
        return Err(Error::MissingTraceId {
            style: Some(PropagationStyle::Datadog),
        });
    }

    Ok(ExtractedData {
        trace_id,
        parent_id,
        sampling_priority,
        origin,
        trace_tags,
        additional_w3c_tracestate: None,
        additional_datadog_w3c_tracestate: None,
        style: Some(PropagationStyle::Datadog),
    })
}

/// Parses the `x-datadog-tags` value: a comma-separated list of
/// `key=value` pairs, conventionally the `_dd.p.*` trace tags.
fn parse_tags(value: &str) -> Result<HashMap<String, String>> {
    let mut tags = HashMap::new();
    if value.is_empty() {
        return Ok(tags);
    }
    for entry in value.split(',') {
        let (key, val) = entry
            .split_once('=')
            .ok_or_else(|| Error::MalformedBaggage(format!("malformed x-datadog-tags entry {entry:?}")))?;
        tags.insert(key.trim().to_string(), val.trim().to_string());
    }
    Ok(tags)
}

fn encode_tags(tags: &HashMap<String, String>) -> String {
    let mut entries: Vec<_> = tags
        .iter()
        .filter(|(key, _)| key.starts_with("_dd.p."))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn inject(
    trace_id: TraceId,
    span_id: SpanId,
    sampling_priority: Option<i8>,
    origin: Option<&str>,
    trace_tags: &HashMap<String, String>,
    writer: &mut dyn Writer,
) {
    writer.set(TRACE_ID, trace_id.to_string());
    writer.set(PARENT_ID, span_id.to_string());
    if let Some(priority) = sampling_priority {
        writer.set(SAMPLING_PRIORITY, priority.to_string());
    }
    if let Some(origin) = origin {
        writer.set(ORIGIN, origin.to_string());
    }
    let encoded = encode_tags(trace_tags);
    if !encoded.is_empty() {
        writer.set(TAGS, encoded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::CarrierMap;

    #[test]
    fn round_trips_through_carrier() {
        let mut carrier = CarrierMap::default();
        let mut tags = HashMap::new();
        tags.insert("_dd.p.dm".to_string(), "-1".to_string());
        inject(
            TraceId::from_low(123),
            SpanId::new(456),
            Some(2),
            Some("synthetics"),
            &tags,
            &mut carrier,
        );

        let extracted = extract(&carrier).unwrap();
        assert_eq!(extracted.trace_id, Some(TraceId::from_low(123)));
        assert_eq!(extracted.parent_id, Some(SpanId::new(456)));
        assert_eq!(extracted.sampling_priority, Some(2));
        assert_eq!(extracted.origin.as_deref(), Some("synthetics"));
        assert_eq!(extracted.trace_tags.get("_dd.p.dm").map(|s| s.as_str()), Some("-1"));
    }

    #[test]
    fn empty_carrier_extracts_nothing() {
        let carrier = CarrierMap::default();
        assert!(extract(&carrier).unwrap().is_empty());
    }

    #[test]
    fn trace_id_without_parent_id_is_an_error() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert(TRACE_ID.to_string(), "123".to_string());
        assert!(extract(&carrier).is_err());
    }
}
