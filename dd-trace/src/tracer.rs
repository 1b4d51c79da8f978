//! The tracer: the crate's main entry point, grounded on
//! `original_source/include/datadog/tracer.h`'s `Tracer` class.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dd_trace_runtime::{HttpClient, Scheduler, ThreadScheduler};

use crate::clock::{Clock, SystemClock};
use crate::collector::agent::AgentCollector;
use crate::collector::Collector;
use crate::config::manager::ConfigManager;
use crate::config::FinalizedConfig;
use crate::error::{Error, Result};
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::platform;
use crate::propagation::{self, ExtractedData, Reader};
use crate::runtime_id::RuntimeId;
use crate::sampling::decision::{Origin, SamplingDecision, SamplingPriority};
use crate::span::{Span, SpanConfig};
use crate::span_data::SpanData;
use crate::telemetry::{Counters, TelemetryClient};
use crate::trace_segment::{SegmentConfig, TraceSegment};

/// The live tracer. Construct via [`Tracer::new`] with a
/// [`FinalizedConfig`] (see [`crate::config::finalize_config`]), or
/// [`Tracer::with_collector`] to install a test double in place of the
/// default agent-backed collector.
pub struct Tracer {
    config_manager: Arc<ConfigManager>,
    span_sampler: Arc<crate::sampling::span_sampler::SpanSampler>,
    collector: Arc<dyn Collector>,
    counters: Arc<Counters>,
    telemetry: Option<Arc<TelemetryClient>>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    runtime_id: RuntimeId,
    hostname: Option<String>,
    extraction_styles: Vec<crate::propagation::PropagationStyle>,
    injection_styles: Vec<crate::propagation::PropagationStyle>,
    tags_header_max_size: usize,
    report_traces: bool,
    use_128_bit_trace_ids: bool,
    baggage_max_items: usize,
    baggage_max_bytes: usize,
    _tracer_info_file: Option<platform::TracerInfoFile>,
}

impl Tracer {
    /// Builds a tracer backed by an HTTP agent collector, with a
    /// background flush/telemetry thread started via
    /// [`dd_trace_runtime::ThreadScheduler`].
    pub fn new(config: FinalizedConfig, http: Arc<dyn HttpClient>) -> Tracer {
        let scheduler: Arc<dyn Scheduler> = Arc::new(ThreadScheduler::default());
        let counters = Counters::new();
        let collector = AgentCollector::start(
            http.clone(),
            scheduler.clone(),
            config.agent_url.clone(),
            config.trace_sampler.clone(),
            counters.clone(),
            Duration::from_secs(2),
        );
        Tracer::build(config, collector, Some((http, scheduler)), counters)
    }

    /// Builds a tracer against an arbitrary [`Collector`] (e.g.
    /// [`crate::testing::InMemoryCollector`]), skipping the agent HTTP
    /// transport and telemetry entirely.
    pub fn with_collector(config: FinalizedConfig, collector: Arc<dyn Collector>) -> Tracer {
        Tracer::build(config, collector, None, Counters::new())
    }

    fn build(
        config: FinalizedConfig,
        collector: Arc<dyn Collector>,
        telemetry_transport: Option<(Arc<dyn HttpClient>, Arc<dyn Scheduler>)>,
        counters: Arc<Counters>,
    ) -> Tracer {
        let runtime_id = RuntimeId::current();
        let hostname = platform::hostname();
        let config_manager = Arc::new(ConfigManager::new(
            config.trace_sampler.clone(),
            config.defaults.clone(),
        ));

        let telemetry = telemetry_transport.map(|(http, scheduler)| {
            let signature = crate::remote_config::signature_from_defaults(runtime_id.to_string(), &config.defaults);
            TelemetryClient::start(
                http,
                scheduler,
                config.agent_url.clone(),
                signature,
                counters.clone(),
                config.telemetry_heartbeat_interval,
            )
        });

        let tracer_info_file = platform::TracerInfoFile::create(&platform::TracerInfoSchema {
            runtime_id: runtime_id.to_string(),
            tracer_version: env!("CARGO_PKG_VERSION"),
            tracer_language: "rust",
            hostname: hostname.clone().unwrap_or_default(),
            service_name: config.defaults.service.clone(),
            service_env: config.defaults.env.clone().unwrap_or_default(),
            service_version: config.defaults.version.clone().unwrap_or_default(),
        });

        Tracer {
            config_manager,
            span_sampler: config.span_sampler,
            collector,
            counters,
            telemetry,
            id_generator: Arc::new(RandomIdGenerator),
            clock: Arc::new(SystemClock),
            runtime_id,
            hostname,
            extraction_styles: config.extraction_styles,
            injection_styles: config.injection_styles,
            tags_header_max_size: config.tags_header_max_size,
            report_traces: config.report_traces,
            use_128_bit_trace_ids: false,
            baggage_max_items: config.baggage_max_items,
            baggage_max_bytes: config.baggage_max_bytes,
            _tracer_info_file: tracer_info_file,
        }
    }

    fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            defaults: self.config_manager.span_defaults(),
            trace_sampler: self.config_manager.trace_sampler(),
            span_sampler: self.span_sampler.clone(),
            collector: self.collector.clone(),
            counters: self.counters.clone(),
            runtime_id: self.runtime_id,
            injection_styles: self.injection_styles.clone(),
            hostname: self.hostname.clone(),
            tags_header_max_size: self.tags_header_max_size,
            report_traces: self.report_traces,
            baggage_max_items: self.baggage_max_items,
            baggage_max_bytes: self.baggage_max_bytes,
        }
    }

    pub fn create_span(&self) -> Span {
        self.create_span_with_config(SpanConfig::default())
    }

    pub fn create_span_with_config(&self, config: SpanConfig) -> Span {
        let start = config.start_time.unwrap_or_else(|| self.clock.now());
        let trace_id = self.id_generator.new_trace_id(self.use_128_bit_trace_ids);
        let span_id = crate::ids::SpanId::new(trace_id.low);
        let defaults = self.config_manager.span_defaults();

        let mut tags = defaults.tags.clone();
        tags.extend(config.tags);

        let mut trace_tags = HashMap::new();
        if trace_id.high != 0 {
            trace_tags.insert("_dd.p.tid".to_string(), trace_id.high_hex_tag());
        }

        let name = config.name.unwrap_or_else(|| "span".to_string());
        let span_data = SpanData {
            trace_id,
            span_id,
            parent_id: crate::ids::SpanId::ROOT,
            service: config.service.unwrap_or_else(|| defaults.service.clone()),
            resource: config.resource.unwrap_or_else(|| name.clone()),
            name,
            span_type: config.span_type,
            start,
            duration: std::time::Duration::ZERO,
            error: false,
            tags,
            metrics: HashMap::new(),
            span_sampling_mechanism: None,
        };

        let segment = TraceSegment::new(self.segment_config(), None, trace_tags, None);
        let data = Arc::new(Mutex::new(span_data));
        segment.register_span(data.clone());
        Span::new(data, segment, self.id_generator.clone(), self.clock.clone(), start)
    }

    /// Extracts a span context from `reader` using the tracer's
    /// configured extraction styles. Returns
    /// [`Error::NoSpanToExtract`] when no style found any context.
    pub fn extract_span(&self, reader: &dyn Reader) -> Result<Span> {
        self.extract_span_with_config(reader, SpanConfig::default())
    }

    pub fn extract_span_with_config(&self, reader: &dyn Reader, config: SpanConfig) -> Result<Span> {
        let extracted = propagation::extract(&self.extraction_styles, reader)?;
        if extracted.is_empty() {
            return Err(Error::NoSpanToExtract);
        }
        let baggage = self.extract_baggage(reader)?;
        Ok(self.span_from_extracted(extracted, baggage, config))
    }

    /// Extracts a span context if present, otherwise creates a new root
    /// span; never fails.
    pub fn extract_or_create_span(&self, reader: &dyn Reader) -> Span {
        match propagation::extract(&self.extraction_styles, reader) {
            Ok(extracted) if !extracted.is_empty() => {
                let baggage = self.extract_baggage(reader).unwrap_or_default();
                self.span_from_extracted(extracted, baggage, SpanConfig::default())
            }
            _ => self.create_span(),
        }
    }

    /// Decodes the `baggage` header when `Baggage` is among the tracer's
    /// configured extraction styles; otherwise a no-op, same as every
    /// other style that isn't configured.
    fn extract_baggage(&self, reader: &dyn Reader) -> Result<crate::baggage::Baggage> {
        if self
            .extraction_styles
            .contains(&crate::propagation::PropagationStyle::Baggage)
        {
            crate::propagation::baggage::extract(reader, self.baggage_max_items)
        } else {
            Ok(crate::baggage::Baggage::new())
        }
    }

    fn span_from_extracted(&self, extracted: ExtractedData, baggage: crate::baggage::Baggage, config: SpanConfig) -> Span {
        let start = config.start_time.unwrap_or_else(|| self.clock.now());
        let trace_id = extracted.trace_id.unwrap_or_else(|| self.id_generator.new_trace_id(false));
        let span_id = self.id_generator.new_span_id();
        let defaults = self.config_manager.span_defaults();

        let mut tags = defaults.tags.clone();
        tags.extend(config.tags);

        let name = config.name.unwrap_or_else(|| "span".to_string());
        let span_data = SpanData {
            trace_id,
            span_id,
            parent_id: extracted.parent_id.unwrap_or(crate::ids::SpanId::ROOT),
            service: config.service.unwrap_or_else(|| defaults.service.clone()),
            resource: config.resource.unwrap_or_else(|| name.clone()),
            name,
            span_type: config.span_type,
            start,
            duration: std::time::Duration::ZERO,
            error: false,
            tags,
            metrics: HashMap::new(),
            span_sampling_mechanism: None,
        };

        let sampling_decision = extracted.sampling_priority.map(|priority| SamplingDecision {
            priority: priority_from_wire(priority),
            mechanism: extracted
                .trace_tags
                .get("_dd.p.dm")
                .and_then(|v| v.trim_start_matches('-').parse::<i64>().ok())
                .unwrap_or(0),
            origin: Origin::Remote,
            configured_rate: None,
            limiter_effective_rate: None,
            limiter_max_per_second: None,
        });

        let segment = TraceSegment::new(
            self.segment_config(),
            extracted.origin,
            extracted.trace_tags,
            sampling_decision,
        );
        segment.set_baggage(baggage);
        segment.set_additional_w3c_tracestate(extracted.additional_w3c_tracestate);
        let data = Arc::new(Mutex::new(span_data));
        segment.register_span(data.clone());
        Span::new(data, segment, self.id_generator.clone(), self.clock.clone(), start)
    }

    /// Flushes any buffered trace chunks and stops telemetry reporting.
    /// Call before process exit so the last batch isn't lost.
    pub fn shutdown(&self, deadline: std::time::Instant) {
        self.collector.shutdown(deadline);
        if let Some(telemetry) = &self.telemetry {
            telemetry.shutdown();
        }
    }
}

fn priority_from_wire(priority: i8) -> SamplingPriority {
    match priority {
        i8::MIN..=-1 => SamplingPriority::UserDrop,
        0 => SamplingPriority::AutoDrop,
        1 => SamplingPriority::AutoKeep,
        _ => SamplingPriority::UserKeep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{finalize_config, TracerConfig};
    use crate::propagation::CarrierMap;
    use crate::testing::InMemoryCollector;

    fn test_tracer(collector: Arc<InMemoryCollector>) -> Tracer {
        let config = finalize_config(TracerConfig::new().with_service("svc")).unwrap();
        Tracer::with_collector(config, collector)
    }

    #[test]
    fn create_span_and_drop_exports_a_chunk() {
        let collector = Arc::new(InMemoryCollector::new());
        let tracer = test_tracer(collector.clone());
        let span = tracer.create_span_with_config(SpanConfig::new("web.request"));
        drop(span);
        assert_eq!(collector.chunks().len(), 1);
    }

    #[test]
    fn extract_span_without_context_fails() {
        let collector = Arc::new(InMemoryCollector::new());
        let tracer = test_tracer(collector);
        let carrier = CarrierMap::default();
        assert!(tracer.extract_span(&carrier).is_err());
    }

    #[test]
    fn extract_or_create_falls_back_to_new_root() {
        let collector = Arc::new(InMemoryCollector::new());
        let tracer = test_tracer(collector.clone());
        let carrier = CarrierMap::default();
        let span = tracer.extract_or_create_span(&carrier);
        assert!(span.trace_id().low != 0 || span.trace_id().high != 0);
    }

    #[test]
    fn extracted_baggage_is_visible_on_the_span() {
        let collector = Arc::new(InMemoryCollector::new());
        let config = finalize_config(
            TracerConfig::new()
                .with_service("svc")
                .with_extraction_styles(vec![
                    crate::propagation::PropagationStyle::Datadog,
                    crate::propagation::PropagationStyle::Baggage,
                ]),
        )
        .unwrap();
        let tracer = Tracer::with_collector(config, collector);

        let mut carrier = CarrierMap::default();
        carrier.0.insert("x-datadog-trace-id".to_string(), "123".to_string());
        carrier.0.insert("x-datadog-parent-id".to_string(), "456".to_string());
        carrier.0.insert("baggage".to_string(), "userId=alice".to_string());

        let span = tracer.extract_span(&carrier).unwrap();
        assert_eq!(span.baggage_item("userId"), Some("alice".to_string()));
    }
}
