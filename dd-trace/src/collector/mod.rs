//! Where finished trace chunks go, grounded on
//! `original_source/include/datadog/collector.h`'s `Collector` interface.

pub mod agent;
pub mod msgpack;

use crate::span_data::SpanData;

/// Accepts finished trace chunks for export. The trait seam lets tests
/// substitute an in-memory collector (see `crate::testing`) for
/// [`agent::AgentCollector`].
pub trait Collector: Send + Sync {
    fn send(&self, chunk: Vec<SpanData>);

    /// Gives the collector a bounded window to flush anything buffered
    /// before the process exits. The default does nothing, matching
    /// collectors (like an in-memory test double) that never buffer.
    fn shutdown(&self, _deadline: std::time::Instant) {}
}
