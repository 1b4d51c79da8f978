//! A single span: a mutable handle over [`crate::span_data::SpanData`]
//! that finalizes itself (computing duration, notifying its
//! [`crate::trace_segment::TraceSegment`]) on `Drop`, grounded on
//! `original_source/include/datadog/span.h`'s RAII span lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, TimePoint};
use crate::error::Result;
use crate::ids::{IdGenerator, SpanId, TraceId};
use crate::propagation::Writer;
use crate::sampling::decision::SamplingPriority;
use crate::span_data::SpanData;
use crate::trace_segment::TraceSegment;

/// Per-span overrides supplied at creation time, layered on top of the
/// tracer's [`crate::config::SpanDefaults`].
#[derive(Debug, Clone, Default)]
pub struct SpanConfig {
    pub service: Option<String>,
    pub name: Option<String>,
    pub resource: Option<String>,
    pub span_type: Option<String>,
    pub tags: HashMap<String, String>,
    pub start_time: Option<TimePoint>,
}

impl SpanConfig {
    pub fn new(name: impl Into<String>) -> Self {
        SpanConfig {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_span_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = Some(span_type.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A span. Dropping the last clone of a span's handle finishes it
/// exactly once; finishing sets `duration` from the tracer's clock and
/// notifies the owning [`TraceSegment`] so it can finalize once every span
/// in the trace has finished.
pub struct Span {
    data: Arc<Mutex<SpanData>>,
    segment: Arc<TraceSegment>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    start: TimePoint,
    finished: Arc<AtomicBool>,
}

impl Span {
    pub(crate) fn new(
        data: Arc<Mutex<SpanData>>,
        segment: Arc<TraceSegment>,
        id_generator: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        start: TimePoint,
    ) -> Span {
        Span {
            data,
            segment,
            id_generator,
            clock,
            start,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.data.lock().unwrap().trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.data.lock().unwrap().span_id
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.lock().unwrap().tags.insert(key.into(), value.into());
    }

    pub fn set_metric(&self, key: impl Into<String>, value: f64) {
        self.data.lock().unwrap().metrics.insert(key.into(), value);
    }

    pub fn set_error(&self, error: bool) {
        self.data.lock().unwrap().error = error;
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.data.lock().unwrap().name = name.into();
    }

    pub fn set_resource(&self, resource: impl Into<String>) {
        self.data.lock().unwrap().resource = resource.into();
    }

    /// Creates a child span in the same trace segment, with `parent_id`
    /// set to this span's id and `service`/tags defaulted from the
    /// segment's tracer defaults the same way the root span was.
    pub fn create_child(&self, config: SpanConfig) -> Span {
        let start = config.start_time.unwrap_or_else(|| self.clock.now());
        let parent = self.data.lock().unwrap();
        let span_id = self.id_generator.new_span_id();
        let child_data = SpanData {
            trace_id: parent.trace_id,
            span_id,
            parent_id: parent.span_id,
            service: config.service.unwrap_or_else(|| parent.service.clone()),
            name: config.name.unwrap_or_else(|| parent.name.clone()),
            resource: config.resource.unwrap_or_else(|| parent.resource.clone()),
            span_type: config.span_type,
            start,
            duration: std::time::Duration::ZERO,
            error: false,
            tags: config.tags,
            metrics: HashMap::new(),
            span_sampling_mechanism: None,
        };
        drop(parent);

        let data = Arc::new(Mutex::new(child_data));
        self.segment.register_span(data.clone());
        Span::new(data, self.segment.clone(), self.id_generator.clone(), self.clock.clone(), start)
    }

    /// Sets the trace's sampling priority, e.g. in response to a user
    /// calling `manual.keep()`/`manual.drop()` on any span in the trace.
    pub fn set_sampling_priority(&self, priority: SamplingPriority) {
        self.segment.override_sampling_priority(priority);
    }

    /// Baggage is carried per trace, not per span; every span in the same
    /// trace segment sees the same entries.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.segment.baggage_item(key)
    }

    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.segment.set_baggage_item(key, value);
    }

    pub fn remove_baggage_item(&self, key: &str) -> Option<String> {
        self.segment.remove_baggage_item(key)
    }

    /// Injects this span's identity (and the trace's current sampling
    /// decision, if one has been made) into `writer`.
    pub fn inject(&self, writer: &mut dyn Writer) -> Result<()> {
        self.segment.inject(self.span_id(), writer)
    }

    fn finish_now(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let end = self.clock.now();
        {
            let mut data = self.data.lock().unwrap();
            data.duration = end.duration_since(self.start);
        }
        self.segment.span_finished();
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.finish_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::collector::Collector;
    use crate::config::SpanDefaults;
    use crate::ids::RandomIdGenerator;
    use crate::runtime_id::RuntimeId;
    use crate::sampling::span_sampler::SpanSampler;
    use crate::sampling::trace_sampler::DefaultTraceSampler;
    use crate::telemetry::Counters;
    use crate::testing::InMemoryCollector;
    use crate::trace_segment::SegmentConfig;

    fn make_segment(collector: Arc<dyn Collector>) -> Arc<TraceSegment> {
        TraceSegment::new(
            SegmentConfig {
                defaults: Arc::new(SpanDefaults {
                    service: "svc".to_string(),
                    ..Default::default()
                }),
                trace_sampler: Arc::new(DefaultTraceSampler::new(vec![], 100.0)),
                span_sampler: Arc::new(SpanSampler::new(vec![])),
                collector,
                counters: Counters::new(),
                runtime_id: RuntimeId::current(),
                injection_styles: vec![],
                hostname: None,
                tags_header_max_size: 512,
                report_traces: true,
                baggage_max_items: crate::baggage::DEFAULT_MAX_ITEMS,
                baggage_max_bytes: crate::baggage::DEFAULT_MAX_BYTES,
            },
            None,
            HashMap::new(),
            None,
        )
    }

    #[test]
    fn dropping_a_span_finishes_and_exports_it() {
        let collector = Arc::new(InMemoryCollector::new());
        let segment = make_segment(collector.clone());
        let generator: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let data = Arc::new(Mutex::new(SpanData::new_for_test("svc", "op", "res")));
        segment.register_span(data.clone());
        let span = Span::new(data, segment, generator, clock.clone(), clock.now());
        drop(span);

        assert_eq!(collector.chunks().len(), 1);
    }

    #[test]
    fn child_span_inherits_trace_id_and_sets_parent() {
        let collector = Arc::new(InMemoryCollector::new());
        let segment = make_segment(collector.clone());
        let generator: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let data = Arc::new(Mutex::new(SpanData::new_for_test("svc", "op", "res")));
        segment.register_span(data.clone());
        let root = Span::new(data, segment, generator, clock.clone(), clock.now());

        let child = root.create_child(SpanConfig::new("child-op"));
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.data.lock().unwrap().parent_id, root.span_id());
    }
}
