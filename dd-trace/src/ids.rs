//! 128-bit trace identifiers and 63-bit span identifiers.
//!
//! Grounded on the semantics in `SPEC_FULL.md` §3; the Rust shape (a
//! `Copy` struct with hex/decimal parsing and an RNG-backed generator) is
//! grounded on `opentelemetry_sdk::trace::RandomIdGenerator` and
//! `opentelemetry::trace::TraceId`.

use std::fmt;

use crate::error::{Error, Result};

/// A 128-bit trace identifier.
///
/// `low` is the original, propagation-compatible 64-bit trace ID. `high` is
/// present only when 128-bit trace ID generation is enabled; it travels
/// across process boundaries as the `_dd.p.tid` propagation tag rather than
/// as part of any wire-level trace-id field, so most of this type's API
/// operates on `low` alone.
#[derive(Clone, Copy, Eq)]
pub struct TraceId {
    pub low: u64,
    pub high: u64,
}

impl TraceId {
    pub const fn new(low: u64, high: u64) -> Self {
        TraceId { low, high }
    }

    pub const fn from_low(low: u64) -> Self {
        TraceId { low, high: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    /// Parse a decimal string as the low 64 bits of a trace ID (the
    /// Datadog and B3 decimal/short-hex wire forms carry only this part).
    pub fn parse_decimal(value: &str) -> Result<Self> {
        let low = value
            .parse::<u64>()
            .map_err(|_| Error::MalformedTraceId(value.to_string()))?;
        Ok(TraceId::from_low(low))
    }

    /// Parse a hex string of 1 to 32 characters. Strings longer than 16
    /// characters are split so that the last 16 characters become `low` and
    /// any leading characters become `high`.
    pub fn parse_hex(value: &str) -> Result<Self> {
        if value.is_empty() || value.len() > 32 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::MalformedTraceId(value.to_string()));
        }
        if value.len() <= 16 {
            let low = u64::from_str_radix(value, 16)
                .map_err(|_| Error::MalformedTraceId(value.to_string()))?;
            return Ok(TraceId::from_low(low));
        }
        let split = value.len() - 16;
        let high = u64::from_str_radix(&value[..split], 16)
            .map_err(|_| Error::MalformedTraceId(value.to_string()))?;
        let low = u64::from_str_radix(&value[split..], 16)
            .map_err(|_| Error::MalformedTraceId(value.to_string()))?;
        Ok(TraceId::new(low, high))
    }

    /// Lowercase, zero-padded 32-hex-character representation (`high` then
    /// `low`), as used by B3 (when `high != 0`) and W3C `traceparent`.
    pub fn to_hex32(&self) -> String {
        format!("{:016x}{:016x}", self.high, self.low)
    }

    /// Lowercase, zero-padded 16-hex-character representation of `low`
    /// alone, as used by B3 when `high == 0`.
    pub fn to_hex16(&self) -> String {
        format!("{:016x}", self.low)
    }

    /// Hex string for the `_dd.p.tid` propagation tag: `high` alone,
    /// zero-padded to 16 characters. Callers should only emit this tag when
    /// `high != 0`.
    pub fn high_hex_tag(&self) -> String {
        format!("{:016x}", self.high)
    }
}

impl PartialEq for TraceId {
    fn eq(&self, other: &Self) -> bool {
        self.low == other.low && self.high == other.high
    }
}

impl PartialEq<u64> for TraceId {
    fn eq(&self, other: &u64) -> bool {
        self.low == *other && self.high == 0
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self.to_hex32())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.low)
    }
}

/// A 63-bit span identifier. The top bit of the underlying `u64` is always
/// zero, so the value interoperates with tracers on other languages whose
/// span-id type is a signed 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanId(u64);

impl SpanId {
    /// The span-id value used as `parent_id` on a local-root span.
    pub const ROOT: SpanId = SpanId(0);

    pub fn new(value: u64) -> Self {
        SpanId(value & 0x7fff_ffff_ffff_ffff)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }

    pub fn parse_decimal(value: &str) -> Result<Self> {
        let raw = value
            .parse::<u64>()
            .map_err(|_| Error::InvalidInteger(value.to_string()))?;
        Ok(SpanId::new(raw))
    }

    pub fn parse_hex16(value: &str) -> Result<Self> {
        if value.len() != 16 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::MalformedTraceId(value.to_string()));
        }
        let raw =
            u64::from_str_radix(value, 16).map_err(|_| Error::MalformedTraceId(value.to_string()))?;
        Ok(SpanId::new(raw))
    }

    pub fn to_hex16(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates trace and span IDs. The default implementation is
/// thread-local, reseeded from the OS RNG on first use per thread and again
/// after a `fork` (see `fork` module), matching `SPEC_FULL.md` §9's
/// fork-safety note.
pub trait IdGenerator: Send + Sync {
    fn new_trace_id(&self, use_128_bit: bool) -> TraceId;
    fn new_span_id(&self) -> SpanId;
}

std::thread_local! {
    static THREAD_RNG: std::cell::RefCell<rand::rngs::StdRng> = std::cell::RefCell::new(seed_rng());
}

fn seed_rng() -> rand::rngs::StdRng {
    use rand::SeedableRng;
    rand::rngs::StdRng::from_os_rng()
}

/// Re-seeds the thread-local RNG. Must be called on the child side of a
/// `fork()` before any span is created, since the parent's RNG state would
/// otherwise be duplicated across both processes.
pub fn reseed_thread_rng() {
    THREAD_RNG.with(|rng| *rng.borrow_mut() = seed_rng());
}

/// The default [`IdGenerator`], backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self, use_128_bit: bool) -> TraceId {
        use rand::RngCore;
        THREAD_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            let low = loop {
                let v = rng.next_u64();
                if v != 0 {
                    break v;
                }
            };
            let high = if use_128_bit {
                let seconds_since_epoch = std::time::SystemTime::now()
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                // Upper 32 bits carry a timestamp, matching the shape used
                // by other Datadog tracers for 128-bit trace ID generation.
                (seconds_since_epoch & 0xffff_ffff) << 32
            } else {
                0
            };
            TraceId::new(low, high)
        })
    }

    fn new_span_id(&self) -> SpanId {
        use rand::RngCore;
        THREAD_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let v = rng.next_u64() & 0x7fff_ffff_ffff_ffff;
                if v != 0 {
                    return SpanId::new(v);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_decimal_round_trip() {
        let id = TraceId::parse_decimal("123").unwrap();
        assert_eq!(id, 123u64);
        assert_eq!(id.to_string(), "123");
    }

    #[test]
    fn trace_id_hex_split() {
        let id = TraceId::parse_hex("0000000000000001000000000000002a").unwrap();
        assert_eq!(id.high, 1);
        assert_eq!(id.low, 0x2a);
        assert_eq!(id.to_hex32(), "0000000000000001000000000000002a");
    }

    #[test]
    fn trace_id_short_hex_is_low_only() {
        let id = TraceId::parse_hex("2a").unwrap();
        assert_eq!(id.high, 0);
        assert_eq!(id.low, 0x2a);
    }

    #[test]
    fn trace_id_rejects_garbage() {
        assert!(TraceId::parse_hex("").is_err());
        assert!(TraceId::parse_hex("zz").is_err());
        assert!(TraceId::parse_hex(&"a".repeat(33)).is_err());
    }

    #[test]
    fn span_id_top_bit_is_cleared() {
        let id = SpanId::new(u64::MAX);
        assert_eq!(id.value(), 0x7fff_ffff_ffff_ffff);
    }

    #[test]
    fn generated_ids_are_nonzero() {
        let gen = RandomIdGenerator;
        for _ in 0..100 {
            assert!(!gen.new_trace_id(false).is_zero());
            assert_ne!(gen.new_span_id().value(), 0);
        }
    }
}
