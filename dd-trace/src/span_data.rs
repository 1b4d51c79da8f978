//! The immutable, exportable shape of a finished span, grounded on
//! `original_source/src/datadog/span_data.h` and the wire fields consumed by
//! `collector::msgpack`.

use std::collections::HashMap;

use crate::clock::TimePoint;
use crate::ids::{SpanId, TraceId};

/// A finished (or in-flight, for sampling purposes) span, decoupled from the
/// `Arc<Mutex<..>>` plumbing that [`crate::span::Span`] wraps around it
/// while the span is still open.
#[derive(Debug, Clone)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: SpanId,
    pub service: String,
    pub name: String,
    pub resource: String,
    pub span_type: Option<String>,
    pub start: TimePoint,
    pub duration: std::time::Duration,
    pub error: bool,
    pub tags: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
    /// Set once a span-sampling rule has been evaluated for this span;
    /// `None` means "not yet decided" (e.g. while the enclosing trace chunk
    /// is still being assembled).
    pub span_sampling_mechanism: Option<i64>,
}

impl SpanData {
    /// Constructs a span with placeholder identity, for use by tests that
    /// only care about the matching fields (service/name/resource/tags).
    #[cfg(test)]
    pub fn new_for_test(service: &str, name: &str, resource: &str) -> Self {
        SpanData {
            trace_id: TraceId::from_low(1),
            span_id: SpanId::new(1),
            parent_id: SpanId::ROOT,
            service: service.to_string(),
            name: name.to_string(),
            resource: resource.to_string(),
            span_type: None,
            start: TimePoint {
                wall: std::time::SystemTime::now(),
                tick: std::time::Instant::now(),
            },
            duration: std::time::Duration::ZERO,
            error: false,
            tags: HashMap::new(),
            metrics: HashMap::new(),
            span_sampling_mechanism: None,
        }
    }
}
