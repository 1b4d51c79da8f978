//! The W3C Trace Context propagation style (`traceparent` / `tracestate`).
//! Not present in `original_source`'s older `propagation_styles.h`, which
//! only lists Datadog and B3; added per `SPEC_FULL.md` §4.2 since it is now
//! a required style for any modern Datadog tracer. The `tracestate` `dd=`
//! member encoding (sampling priority, origin, propagated trace tags with
//! `=` escaped to `~`) follows the same convention other Datadog tracers
//! use so that a trace round-trips unchanged through a mixed-language path.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{SpanId, TraceId};
use crate::propagation::{ExtractedData, PropagationStyle, Reader, Writer};

const TRACEPARENT: &str = "traceparent";
const TRACESTATE: &str = "tracestate";

pub fn extract(reader: &dyn Reader) -> Result<ExtractedData> {
    let traceparent = match reader.get(TRACEPARENT) {
        Some(value) => value,
        None => return Ok(ExtractedData::default()),
    };

    let fields: Vec<&str> = traceparent.split('-').collect();
    if fields.len() < 4 {
        return Err(Error::MalformedTraceparent(traceparent.to_string()));
    }
    let [version, trace_id_hex, parent_id_hex, flags] = [fields[0], fields[1], fields[2], fields[3]];
    if version.len() != 2 || !version.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::MalformedTraceparent(traceparent.to_string()));
    }
    if trace_id_hex.len() != 32 {
        return Err(Error::MalformedTraceparent(traceparent.to_string()));
    }
    if parent_id_hex.len() != 16 {
        return Err(Error::MalformedTraceparent(traceparent.to_string()));
    }
    let trace_id = TraceId::parse_hex(trace_id_hex)?;
    if trace_id.is_zero() {
        return Err(Error::ZeroTraceId {
            style: Some(PropagationStyle::TraceContext),
        });
    }
    let parent_id = SpanId::parse_hex16(parent_id_hex)?;
    let flags_byte = u8::from_str_radix(flags, 16)
        .map_err(|_| Error::MalformedTraceparent(traceparent.to_string()))?;
    let w3c_sampled = flags_byte & 0x1 != 0;

    let mut sampling_priority = Some(if w3c_sampled { 1 } else { 0 });
    let mut origin = None;
    let mut trace_tags = HashMap::new();
    let mut additional_datadog_w3c_tracestate = None;
    let mut additional_w3c_tracestate = None;

    if let Some(tracestate) = reader.get(TRACESTATE) {
        let (dd_priority, dd_origin, dd_tags, dd_rest) = parse_tracestate(tracestate);
        if let Some(priority) = dd_priority {
            // The `dd=` member's `s:` value refines the coarse traceparent
            // sampled bit with the actual priority when the two agree on
            // keep/drop; a disagreement (e.g. flags=00 but s:2) defers to
            // tracestate, which carries the finer-grained value.
            sampling_priority = Some(priority);
        }
        origin = dd_origin;
        trace_tags = dd_tags;
        additional_w3c_tracestate = dd_rest;
        additional_datadog_w3c_tracestate = Some(tracestate.to_string());
    }

    Ok(ExtractedData {
        trace_id: Some(trace_id),
        parent_id: Some(parent_id),
        sampling_priority,
        origin,
        trace_tags,
        additional_w3c_tracestate,
        additional_datadog_w3c_tracestate,
        style: Some(PropagationStyle::TraceContext),
    })
}

/// Splits a `tracestate` header into the `dd=` member's fields (sampling
/// priority, origin, `t.*`-encoded trace tags) and the remaining vendor
/// list entries, preserved verbatim for re-injection.
fn parse_tracestate(value: &str) -> (Option<i8>, Option<String>, HashMap<String, String>, Option<String>) {
    let mut priority = None;
    let mut origin = None;
    let mut tags = HashMap::new();
    let mut rest = Vec::new();

    for member in value.split(',') {
        let member = member.trim();
        if let Some(dd_value) = member.strip_prefix("dd=") {
            for entry in dd_value.split(';') {
                let Some((key, val)) = entry.split_once(':') else {
                    continue;
                };
                match key {
                    "s" => priority = val.parse::<i8>().ok(),
                    "o" => origin = Some(val.replace('~', "=")),
                    _ => {
                        if let Some(tag_name) = key.strip_prefix("t.") {
                            tags.insert(format!("_dd.p.{tag_name}"), val.replace('~', "="));
                        }
                    }
                }
            }
        } else if !member.is_empty() {
            rest.push(member.to_string());
        }
    }

    let rest = if rest.is_empty() { None } else { Some(rest.join(",")) };
    (priority, origin, tags, rest)
}

pub fn inject(
    trace_id: TraceId,
    span_id: SpanId,
    sampling_priority: Option<i8>,
    origin: Option<&str>,
    trace_tags: &HashMap<String, String>,
    additional_tracestate: Option<&str>,
    writer: &mut dyn Writer,
) {
    let sampled = sampling_priority.map(|p| p > 0).unwrap_or(false);
    writer.set(
        TRACEPARENT,
        format!(
            "00-{}-{}-{:02x}",
            trace_id.to_hex32(),
            span_id.to_hex16(),
            if sampled { 1u8 } else { 0u8 }
        ),
    );

    let mut dd_member = String::from("dd=");
    if let Some(priority) = sampling_priority {
        dd_member.push_str(&format!("s:{priority};"));
    }
    if let Some(origin) = origin {
        dd_member.push_str(&format!("o:{};", origin.replace('=', "~")));
    }
    for (key, value) in trace_tags {
        if let Some(tag_name) = key.strip_prefix("_dd.p.") {
            dd_member.push_str(&format!("t.{tag_name}:{};", value.replace('=', "~")));
        }
    }
    if dd_member.ends_with(';') {
        dd_member.pop();
    }
    let tracestate = match additional_tracestate {
        Some(rest) if !rest.is_empty() => format!("{dd_member},{rest}"),
        _ => dd_member,
    };
    writer.set(TRACESTATE, tracestate);
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
            TraceId::new(1, 2),
            SpanId::new(3),
            Some(2),
            Some("synthetics"),
            &tags,
            None,
            &mut carrier,
        );

        let extracted = extract(&carrier).unwrap();
        assert_eq!(extracted.trace_id, Some(TraceId::new(1, 2)));
        assert_eq!(extracted.parent_id, Some(SpanId::new(3)));
        assert_eq!(extracted.sampling_priority, Some(2));
        assert_eq!(extracted.origin.as_deref(), Some("synthetics"));
        assert_eq!(extracted.trace_tags.get("_dd.p.dm").map(|s| s.as_str()), Some("-1"));
    }

    #[test]
    fn rejects_malformed_traceparent() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert(TRACEPARENT.to_string(), "not-a-traceparent".to_string());
        assert!(extract(&carrier).is_err());
    }

    #[test]
    fn rejects_all_zero_trace_id() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert(
            TRACEPARENT.to_string(),
            format!("00-{}-{}-01", "0".repeat(32), "1".repeat(16)),
        );
        assert!(extract(&carrier).is_err());
    }

    #[test]
    fn reinjects_other_vendors_tracestate_entries() {
        let mut carrier = CarrierMap::default();
        inject(
            TraceId::new(1, 2),
            SpanId::new(3),
            Some(1),
            None,
            &HashMap::new(),
            Some("othervendor=t61rcWkgMzE"),
            &mut carrier,
        );
        let tracestate = carrier.0.get(TRACESTATE).unwrap();
        assert!(tracestate.starts_with("dd=s:1"));
        assert!(tracestate.ends_with("othervendor=t61rcWkgMzE"));
    }

    #[test]
    fn preserves_other_vendors_tracestate_entries() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert(
            TRACEPARENT.to_string(),
            format!("00-{}-{}-01", "a".repeat(32), "b".repeat(16)),
        );
        carrier
            .0
            .insert(TRACESTATE.to_string(), "dd=s:1,othervendor=t61rcWkgMzE".to_string());
        let extracted = extract(&carrier).unwrap();
        assert_eq!(extracted.additional_w3c_tracestate.as_deref(), Some("othervendor=t61rcWkgMzE"));
    }
}
