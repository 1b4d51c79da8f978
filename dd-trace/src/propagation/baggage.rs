//! Encodes and decodes the W3C `baggage` header, turning it into (and out
//! of) [`crate::baggage::Baggage`]. Grounded on `SPEC_FULL.md` §3/§4.2;
//! `original_source` predates baggage support entirely, so this style has
//! no C++ counterpart to follow and is written directly against the W3C
//! Baggage spec's percent-encoded `key=value` list grammar.

use crate::baggage::Baggage;
use crate::error::{Error, Result};
use crate::propagation::{Reader, Writer};

const HEADER: &str = "baggage";

pub fn extract(reader: &dyn Reader, max_items: usize) -> Result<Baggage> {
    let value = match reader.get(HEADER) {
        Some(v) => v,
        None => return Ok(Baggage::new()),
    };
    decode(value, max_items)
}

pub fn decode(value: &str, max_items: usize) -> Result<Baggage> {
    let mut baggage = Baggage::new();
    if value.trim().is_empty() {
        return Ok(baggage);
    }
    for (count, member) in value.split(',').enumerate() {
        if count >= max_items {
            break;
        }
        // A member may carry `;property=value` metadata after the pair;
        // this crate has no use for it and drops it on extraction.
        let pair = member.split(';').next().unwrap_or(member).trim();
        let (key, val) = pair
            .split_once('=')
            .ok_or_else(|| Error::MalformedBaggage(format!("missing '=' in member {pair:?}")))?;
        let key = percent_decode(key.trim())?;
        let val = percent_decode(val.trim())?;
        baggage.set(key, val);
    }
    Ok(baggage)
}

pub fn inject(baggage: &Baggage, max_items: usize, max_bytes: usize, writer: &mut dyn Writer) -> Result<()> {
    if baggage.is_empty() {
        return Ok(());
    }
    let encoded = encode(baggage, max_items, max_bytes)?;
    if !encoded.is_empty() {
        writer.set(HEADER, encoded);
    }
    Ok(())
}

pub fn encode(baggage: &Baggage, max_items: usize, max_bytes: usize) -> Result<String> {
    let mut out = String::new();
    for (index, (key, value)) in baggage.iter().enumerate() {
        if index >= max_items {
            break;
        }
        let member = format!("{}={}", percent_encode(key), percent_encode(value));
        let candidate_len = if out.is_empty() {
            member.len()
        } else {
            out.len() + 1 + member.len()
        };
        if candidate_len > max_bytes {
            return Err(Error::BaggageMaxBytes);
        }
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(&member);
    }
    Ok(out)
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::MalformedBaggage(format!("truncated percent-escape in {value:?}")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::MalformedBaggage(format!("invalid percent-escape in {value:?}")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::MalformedBaggage(format!("invalid UTF-8 in {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::CarrierMap;

    #[test]
    fn round_trips_through_header() {
        let mut baggage = Baggage::new();
        baggage.set("userId", "alice");
        baggage.set("serverNode", "DF 28");

        let mut carrier = CarrierMap::default();
        inject(&baggage, 64, 8192, &mut carrier).unwrap();
        let decoded = extract(&carrier, 64).unwrap();
        assert_eq!(decoded.get("userId"), Some("alice"));
        assert_eq!(decoded.get("serverNode"), Some("DF 28"));
    }

    #[test]
    fn missing_header_is_empty() {
        let carrier = CarrierMap::default();
        assert!(extract(&carrier, 64).unwrap().is_empty());
    }

    #[test]
    fn oversized_encoding_is_rejected() {
        let mut baggage = Baggage::new();
        baggage.set("k", "v".repeat(100));
        assert!(encode(&baggage, 64, 10).is_err());
    }
}
