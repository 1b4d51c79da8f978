//! MessagePack encoding of trace chunks for the Agent's `/v0.4/traces`
//! endpoint, grounded on the field set and `rmp::encode` call shape in
//! `opentelemetry-datadog`'s `exporter::model::v03::encode` and the field
//! list in `original_source/src/datadog/span_data.h`.

use crate::error::{Error, Result};
use crate::span_data::SpanData;

/// Encodes a batch of trace chunks as `array<array<map>>`: one inner array
/// per trace, one map per span. Each span map has 10 always-present
/// fields (`service`, `name`, `resource`, `trace_id`, `span_id`,
/// `parent_id`, `start`, `duration`, `error`, `meta`), plus `metrics` when
/// the span carries any numeric tags and `type` when `span_type` is set —
/// 12 fields at most.
pub fn encode_chunks(chunks: &[Vec<SpanData>]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    rmp::encode::write_array_len(&mut buffer, chunks.len() as u32)
        .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;
    for chunk in chunks {
        rmp::encode::write_array_len(&mut buffer, chunk.len() as u32)
            .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;
        for span in chunk {
            encode_span(&mut buffer, span)?;
        }
    }
    Ok(buffer)
}

fn encode_span(buffer: &mut Vec<u8>, span: &SpanData) -> Result<()> {
    let mut field_count = 10;
    if !span.metrics.is_empty() {
        field_count += 1;
    }
    if span.span_type.is_some() {
        field_count += 1;
    }

    let err = |e: rmp::encode::ValueWriteError<std::io::Error>| Error::MessagepackEncodeFailure(e.to_string());
    let str_err = |e: rmp::encode::ValueWriteError<std::io::Error>| Error::MessagepackEncodeFailure(e.to_string());

    rmp::encode::write_map_len(buffer, field_count).map_err(err)?;

    rmp::encode::write_str(buffer, "service").map_err(str_err)?;
    rmp::encode::write_str(buffer, &span.service).map_err(str_err)?;

    rmp::encode::write_str(buffer, "name").map_err(str_err)?;
    rmp::encode::write_str(buffer, &span.name).map_err(str_err)?;

    rmp::encode::write_str(buffer, "resource").map_err(str_err)?;
    rmp::encode::write_str(buffer, &span.resource).map_err(str_err)?;

    rmp::encode::write_str(buffer, "trace_id").map_err(str_err)?;
    rmp::encode::write_uint(buffer, span.trace_id.low).map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;

    rmp::encode::write_str(buffer, "span_id").map_err(str_err)?;
    rmp::encode::write_uint(buffer, span.span_id.value())
        .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;

    rmp::encode::write_str(buffer, "parent_id").map_err(str_err)?;
    rmp::encode::write_uint(buffer, span.parent_id.value())
        .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;

    rmp::encode::write_str(buffer, "start").map_err(str_err)?;
    rmp::encode::write_sint(buffer, span.start.wall_nanos())
        .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;

    rmp::encode::write_str(buffer, "duration").map_err(str_err)?;
    rmp::encode::write_sint(buffer, span.duration.as_nanos() as i64)
        .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;

    rmp::encode::write_str(buffer, "error").map_err(str_err)?;
    rmp::encode::write_sint(buffer, if span.error { 1 } else { 0 })
        .map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;

    rmp::encode::write_str(buffer, "meta").map_err(str_err)?;
    rmp::encode::write_map_len(buffer, span.tags.len() as u32).map_err(err)?;
    for (key, value) in &span.tags {
        rmp::encode::write_str(buffer, key).map_err(str_err)?;
        rmp::encode::write_str(buffer, value).map_err(str_err)?;
    }

    if !span.metrics.is_empty() {
        rmp::encode::write_str(buffer, "metrics").map_err(str_err)?;
        rmp::encode::write_map_len(buffer, span.metrics.len() as u32).map_err(err)?;
        for (key, value) in &span.metrics {
            rmp::encode::write_str(buffer, key).map_err(str_err)?;
            rmp::encode::write_f64(buffer, *value).map_err(|e| Error::MessagepackEncodeFailure(e.to_string()))?;
        }
    }

    if let Some(span_type) = &span.span_type {
        rmp::encode::write_str(buffer, "type").map_err(str_err)?;
        rmp::encode::write_str(buffer, span_type).map_err(str_err)?;
    }

    Ok(())
}

/// Parses the agent's `/v0.4/traces` response body: `{"rate_by_service":
/// {"service:web,env:prod": 0.5, ...}}`, grounded on
/// `original_source/src/datadog/datadog_agent.cpp`'s
/// `parse_agent_traces_response`.
pub fn parse_traces_response(body: &[u8]) -> Result<std::collections::HashMap<String, crate::rate::Rate>> {
    #[derive(serde::Deserialize)]
    struct Response {
        #[serde(default)]
        rate_by_service: std::collections::HashMap<String, f64>,
    }
    let response: Response =
        serde_json::from_slice(body).map_err(|e| Error::HttpRequestFailure(e.to_string()))?;
    response
        .rate_by_service
        .into_iter()
        .map(|(key, value)| Ok((key, crate::rate::Rate::new(value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_empty_batch() {
        let encoded = encode_chunks(&[]).unwrap();
        assert_eq!(encoded, vec![0x90]);
    }

    #[test]
    fn encodes_single_span_chunk() {
        let span = SpanData::new_for_test("svc", "op", "res");
        let encoded = encode_chunks(&[vec![span]]).unwrap();
        assert!(!encoded.is_empty());
    }

    #[test]
    fn parses_rate_by_service_response() {
        let body = br#"{"rate_by_service": {"service:web,env:prod": 0.5}}"#;
        let rates = parse_traces_response(body).unwrap();
        assert_eq!(rates.get("service:web,env:prod").unwrap().value(), 0.5);
    }
}
