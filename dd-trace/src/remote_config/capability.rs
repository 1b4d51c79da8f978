//! The capabilities bitset advertised in the remote configuration request
//! payload, telling the backend which dynamic-config knobs this tracer
//! build understands. Grounded on
//! `original_source/src/datadog/remote_config/remote_config.h`'s
//! capability bit constants.

/// Each constant is a single set bit; combine with bitwise OR.
pub mod bit {
    pub const APM_TRACING_SAMPLE_RATE: u64 = 1 << 12;
    pub const APM_TRACING_LOGS_INJECTION: u64 = 1 << 13;
    pub const APM_TRACING_HTTP_HEADER_TAGS: u64 = 1 << 14;
    pub const APM_TRACING_CUSTOM_TAGS: u64 = 1 << 15;
    pub const APM_TRACING_ENABLED: u64 = 1 << 19;
    pub const APM_TRACING_SAMPLE_RULES: u64 = 1 << 29;
}

/// A small wrapper so callers build a capability set declaratively instead
/// of hand-assembling `u64` bit arithmetic at every call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u64);

impl Capabilities {
    pub fn new() -> Self {
        Capabilities(0)
    }

    pub fn with(mut self, bit: u64) -> Self {
        self.0 |= bit;
        self
    }

    /// Unions this capability set with another, as `Manager` does when
    /// merging every subscribed listener's declared capabilities.
    pub fn union(self, other: Self) -> Self {
        Capabilities(self.0 | other.0)
    }

    /// Big-endian bytes, as the backend expects capabilities encoded.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

pub fn default_capabilities() -> Capabilities {
    Capabilities::new()
        .with(bit::APM_TRACING_SAMPLE_RATE)
        .with(bit::APM_TRACING_SAMPLE_RULES)
        .with(bit::APM_TRACING_ENABLED)
        .with(bit::APM_TRACING_CUSTOM_TAGS)
}
