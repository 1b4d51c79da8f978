//! Trace context propagation: extracting and injecting span identity across
//! process boundaries, grounded on
//! `original_source/src/datadog/extraction_util.{h,cpp}`,
//! `original_source/src/datadog/propagation_styles.h` and
//! `original_source/src/datadog/extracted_data.h`. Expanded past the
//! original's Datadog/B3/none set to also cover W3C Trace Context, per
//! `SPEC_FULL.md` §4.2.

pub mod b3;
pub mod baggage;
pub mod datadog;
pub mod w3c;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{SpanId, TraceId};

/// Reads string values out of a carrier (an HTTP header map, a message
/// queue's metadata map, ...) by key. Named for the verb it performs,
/// rather than after any one wire format, since every style in this module
/// implements against the same two traits.
pub trait Reader {
    fn get(&self, key: &str) -> Option<&str>;
    /// All keys present, for styles (B3 single-header, `tracestate`) that
    /// need to scan rather than look up by exact name.
    fn keys(&self) -> Vec<&str>;
}

/// Writes string values into a carrier.
pub trait Writer {
    fn set(&mut self, key: &str, value: String);
}

/// A plain key/value carrier, useful for tests and for callers who don't
/// have an existing header-map type to adapt.
#[derive(Debug, Default, Clone)]
pub struct CarrierMap(pub HashMap<String, String>);

impl Reader for CarrierMap {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|s| s.as_str()).collect()
    }
}

impl Writer for CarrierMap {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value);
    }
}

/// The propagation styles this crate can extract and inject. `Default`'s
/// derive order does not matter; configuration always supplies an explicit
/// ordered list (see `config::PropagationStyleList`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropagationStyle {
    Datadog,
    B3Multi,
    B3Single,
    TraceContext,
    Baggage,
    None,
}

impl PropagationStyle {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "datadog" => Ok(PropagationStyle::Datadog),
            "b3" | "b3multi" | "b3 multi header" => Ok(PropagationStyle::B3Multi),
            "b3 single header" | "b3single" => Ok(PropagationStyle::B3Single),
            "tracecontext" | "w3c" => Ok(PropagationStyle::TraceContext),
            "baggage" => Ok(PropagationStyle::Baggage),
            "none" => Ok(PropagationStyle::None),
            other => Err(Error::UnknownPropagationStyle(other.to_string())),
        }
    }
}

/// What a single style's extraction attempt found, prior to merging across
/// styles. Mirrors `original_source/src/datadog/extracted_data.h`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedData {
    pub trace_id: Option<TraceId>,
    pub parent_id: Option<SpanId>,
    pub sampling_priority: Option<i8>,
    pub origin: Option<String>,
    /// `_dd.p.*`-prefixed tags carried alongside the trace ID.
    pub trace_tags: HashMap<String, String>,
    pub additional_w3c_tracestate: Option<String>,
    pub additional_datadog_w3c_tracestate: Option<String>,
    pub style: Option<PropagationStyle>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.parent_id.is_none()
    }
}

/// Runs every configured style's extractor in order against `reader`,
/// choosing a winner per `SPEC_FULL.md` §4.2: the first style that produced
/// a `trace_id`, or failing that the first with a `parent_id`, or nothing.
/// Fails with [`Error::MissingTraceId`] if the winner has a `parent_id` but
/// no `trace_id` and no `origin`; fails with [`Error::ZeroTraceId`] if the
/// winner's `trace_id` is all-zero. If the winner is W3C and another style
/// disagreed on `trace_id`/`parent_id`, the mismatch is tagged as
/// `_dd.w3c.inconsistent` rather than failing.
pub fn extract(styles: &[PropagationStyle], reader: &dyn Reader) -> Result<ExtractedData> {
    let mut found = Vec::new();
    for style in styles {
        let extracted = match style {
            PropagationStyle::Datadog => datadog::extract(reader)?,
            PropagationStyle::B3Multi => b3::extract_multi(reader)?,
            PropagationStyle::B3Single => b3::extract_single(reader)?,
            PropagationStyle::TraceContext => w3c::extract(reader)?,
            PropagationStyle::Baggage | PropagationStyle::None => ExtractedData::default(),
        };
        if !extracted.is_empty() {
            found.push(extracted);
        }
    }

    let Some(winner_index) = found
        .iter()
        .position(|e| e.trace_id.is_some())
        .or_else(|| found.iter().position(|e| e.parent_id.is_some()))
    else {
        return Ok(ExtractedData::default());
    };
    let mut winner = found[winner_index].clone();

    if winner.parent_id.is_some() && winner.trace_id.is_none() && winner.origin.is_none() {
        return Err(Error::MissingTraceId { style: winner.style });
    }
    if let Some(trace_id) = winner.trace_id {
        if trace_id.low == 0 && trace_id.high == 0 {
            return Err(Error::ZeroTraceId { style: winner.style });
        }
    }

    if winner.style == Some(PropagationStyle::TraceContext) {
        let inconsistent = found.iter().enumerate().any(|(i, other)| {
            i != winner_index
                && ((other.trace_id.is_some() && other.trace_id != winner.trace_id)
                    || (other.parent_id.is_some() && other.parent_id != winner.parent_id))
        });
        if inconsistent {
            winner
                .trace_tags
                .insert("_dd.w3c.inconsistent".to_string(), "1".to_string());
        }
    }

    Ok(winner)
}

/// Injects span identity into `writer` under every style in `styles`.
///
/// `additional_w3c_tracestate` carries the other vendors' `tracestate`
/// members captured by a prior [`w3c::extract`], re-appended after this
/// tracer's own `dd=` member so a mixed-vendor path round-trips instead of
/// losing every entry but Datadog's.
#[allow(clippy::too_many_arguments)]
pub fn inject(
    styles: &[PropagationStyle],
    trace_id: TraceId,
    span_id: SpanId,
    sampling_priority: Option<i8>,
    origin: Option<&str>,
    trace_tags: &HashMap<String, String>,
    additional_w3c_tracestate: Option<&str>,
    writer: &mut dyn Writer,
) -> Result<()> {
    for style in styles {
        match style {
            PropagationStyle::Datadog => datadog::inject(
                trace_id,
                span_id,
                sampling_priority,
                origin,
                trace_tags,
                writer,
            ),
            PropagationStyle::B3Multi => b3::inject_multi(trace_id, span_id, sampling_priority, writer),
            PropagationStyle::B3Single => {
                b3::inject_single(trace_id, span_id, sampling_priority, writer)
            }
            PropagationStyle::TraceContext => w3c::inject(
                trace_id,
                span_id,
                sampling_priority,
                origin,
                trace_tags,
                additional_w3c_tracestate,
                writer,
            ),
            PropagationStyle::Baggage | PropagationStyle::None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_aliases() {
        assert_eq!(PropagationStyle::parse("Datadog").unwrap(), PropagationStyle::Datadog);
        assert_eq!(
            PropagationStyle::parse("tracecontext").unwrap(),
            PropagationStyle::TraceContext
        );
        assert!(PropagationStyle::parse("bogus").is_err());
    }

    #[test]
    fn extract_with_no_styles_is_empty() {
        let reader = CarrierMap::default();
        let extracted = extract(&[], &reader).unwrap();
        assert!(extracted.is_empty());
    }

    #[test]
    fn winning_style_zero_trace_id_fails() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert("x-datadog-parent-id".to_string(), "456".to_string());
        carrier.0.insert("x-datadog-trace-id".to_string(), "0".to_string());
        let err = extract(&[PropagationStyle::Datadog], &carrier).unwrap_err();
        assert!(matches!(err, Error::ZeroTraceId { .. }));
    }

    #[test]
    fn winning_style_missing_trace_id_without_origin_fails() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert("x-datadog-parent-id".to_string(), "456".to_string());
        let err = extract(&[PropagationStyle::Datadog], &carrier).unwrap_err();
        assert!(matches!(err, Error::MissingTraceId { .. }));
    }

    #[test]
    fn b3_single_parent_id_without_trace_id_fails_at_merge() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert("b3".to_string(), "-0000000000000002".to_string());
        let err = extract(&[PropagationStyle::B3Single], &carrier).unwrap_err();
        assert!(matches!(err, Error::MissingTraceId { .. }));
    }

    #[test]
    fn w3c_winner_tags_inconsistent_datadog_trace_id() {
        let mut carrier = CarrierMap::default();
        carrier.0.insert(
            "traceparent".to_string(),
            "00-00000000000000000000000000000001-0000000000000002-01".to_string(),
        );
        carrier
            .0
            .insert("x-datadog-trace-id".to_string(), "999".to_string());
        carrier
            .0
            .insert("x-datadog-parent-id".to_string(), "2".to_string());

        let extracted = extract(&[PropagationStyle::TraceContext, PropagationStyle::Datadog], &carrier).unwrap();
        assert_eq!(extracted.style, Some(PropagationStyle::TraceContext));
        assert_eq!(
            extracted.trace_tags.get("_dd.w3c.inconsistent").map(String::as_str),
            Some("1")
        );
    }
}
