//! A trace segment: the set of spans created by this process for one
//! trace, tracked until every span finishes so a single sampling decision
//! and a single export can cover the whole chunk. Grounded on
//! `original_source/include/datadog/trace_segment.h`.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::baggage::Baggage;
use crate::collector::Collector;
use crate::config::SpanDefaults;
use crate::error::{Error, Result};
use crate::ids::SpanId;
use crate::propagation::{self, PropagationStyle, Writer};
use crate::runtime_id::RuntimeId;
use crate::sampling::decision::{mechanism, Origin, SamplingDecision, SamplingPriority};
use crate::sampling::span_sampler::SpanSampler;
use crate::sampling::trace_sampler::TraceSampler;
use crate::span_data::SpanData;
use crate::telemetry::Counters;

/// Everything a [`TraceSegment`] needs that is shared across every span in
/// the trace and does not change once the segment is created.
pub struct SegmentConfig {
    pub defaults: Arc<SpanDefaults>,
    pub trace_sampler: Arc<dyn TraceSampler>,
    pub span_sampler: Arc<SpanSampler>,
    pub collector: Arc<dyn Collector>,
    pub counters: Arc<Counters>,
    pub runtime_id: RuntimeId,
    pub injection_styles: Vec<PropagationStyle>,
    pub hostname: Option<String>,
    pub tags_header_max_size: usize,
    pub report_traces: bool,
    pub baggage_max_items: usize,
    pub baggage_max_bytes: usize,
}

struct SegmentState {
    spans: Vec<Arc<Mutex<SpanData>>>,
    num_finished: usize,
    origin: Option<String>,
    sampling_decision: Option<SamplingDecision>,
    trace_tags: HashMap<String, String>,
    baggage: Baggage,
    additional_w3c_tracestate: Option<String>,
}

pub struct TraceSegment {
    config: SegmentConfig,
    state: Mutex<SegmentState>,
}

impl TraceSegment {
    pub fn new(
        config: SegmentConfig,
        origin: Option<String>,
        trace_tags: HashMap<String, String>,
        sampling_decision: Option<SamplingDecision>,
    ) -> Arc<TraceSegment> {
        Arc::new(TraceSegment {
            config,
            state: Mutex::new(SegmentState {
                spans: Vec::new(),
                num_finished: 0,
                origin,
                sampling_decision,
                trace_tags,
                baggage: Baggage::new(),
                additional_w3c_tracestate: None,
            }),
        })
    }

    pub fn register_span(&self, span_data: Arc<Mutex<SpanData>>) {
        self.state.lock().unwrap().spans.push(span_data);
    }

    /// Called once per span as it finishes. When every registered span has
    /// finished, runs the sampling decision and hands the chunk to the
    /// collector.
    pub fn span_finished(&self) {
        let should_finalize = {
            let mut state = self.state.lock().unwrap();
            state.num_finished += 1;
            state.num_finished >= state.spans.len()
        };
        if should_finalize {
            self.finalize();
        }
    }

    fn finalize(&self) {
        let mut state = self.state.lock().unwrap();
        if !self.config.report_traces {
            return;
        }
        let Some(root) = state.spans.first().cloned() else {
            return;
        };

        let decision = match state.sampling_decision {
            Some(decision) => decision,
            None => {
                let decision = {
                    let root_locked = root.lock().unwrap();
                    self.config.trace_sampler.decide(&root_locked)
                };
                state.sampling_decision = Some(decision);
                decision
            }
        };

        {
            let mut root_locked = root.lock().unwrap();
            root_locked
                .metrics
                .insert("_sampling_priority_v1".to_string(), decision.priority.value() as f64);
            if decision.priority.value() > 0 {
                state
                    .trace_tags
                    .insert("_dd.p.dm".to_string(), format!("-{}", decision.mechanism));
            } else {
                state.trace_tags.remove("_dd.p.dm");
            }
            if let Some(rate) = decision.configured_rate {
                match decision.origin {
                    Origin::Rule => {
                        root_locked.tags.insert("_dd.rule_psr".to_string(), rate.to_string());
                    }
                    Origin::AgentRate => {
                        root_locked.tags.insert("_dd.agent_psr".to_string(), rate.to_string());
                    }
                    _ => {}
                }
            }
            if let Some(rate) = decision.limiter_effective_rate {
                root_locked.tags.insert("_dd.limit_psr".to_string(), rate.to_string());
            }
            if let Some(origin) = &state.origin {
                root_locked.tags.insert("_dd.origin".to_string(), origin.clone());
            }
            root_locked
                .metrics
                .insert("process_id".to_string(), std::process::id() as f64);
            root_locked.tags.insert("language".to_string(), "rust".to_string());
            if let Some(hostname) = &self.config.hostname {
                root_locked.tags.insert("_dd.hostname".to_string(), hostname.clone());
            }
            root_locked
                .tags
                .insert("runtime-id".to_string(), self.config.runtime_id.to_string());
            for (key, value) in &state.trace_tags {
                root_locked.tags.insert(key.clone(), value.clone());
            }
        }

        let chunk: Vec<SpanData> = if decision.keep() {
            state.spans.iter().map(|span| span.lock().unwrap().clone()).collect()
        } else {
            state
                .spans
                .iter()
                .filter_map(|span| {
                    let mut locked = span.lock().unwrap();
                    let outcome = self.config.span_sampler.decide(&locked)?;
                    locked.span_sampling_mechanism = Some(outcome.mechanism);
                    locked
                        .metrics
                        .insert("_dd.span_sampling.mechanism".to_string(), outcome.mechanism as f64);
                    locked
                        .metrics
                        .insert("_dd.span_sampling.rule_rate".to_string(), outcome.rule_rate);
                    if let Some(max_per_second) = outcome.max_per_second {
                        locked
                            .metrics
                            .insert("_dd.span_sampling.max_per_second".to_string(), max_per_second);
                    }
                    Some(locked.clone())
                })
                .collect()
        };

        if chunk.is_empty() {
            self.config.counters.trace_chunks_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.config.collector.send(chunk);
        }
    }

    /// Overrides the trace's sampling decision, e.g. in response to
    /// `Span::set_tag("manual.keep", ...)`. Takes effect immediately if the
    /// trace has already finalized isn't possible (the decision is only
    /// read at finalize time), so a late override before the last span
    /// finishes always wins.
    pub fn override_sampling_priority(&self, priority: SamplingPriority) {
        let mut state = self.state.lock().unwrap();
        state.sampling_decision = Some(SamplingDecision {
            priority,
            mechanism: mechanism::MANUAL,
            origin: Origin::Manual,
            configured_rate: None,
            limiter_effective_rate: None,
            limiter_max_per_second: None,
        });
    }

    pub fn inject(&self, span_id: SpanId, writer: &mut dyn Writer) -> Result<()> {
        let state = self.state.lock().unwrap();
        let root = state.spans.first().ok_or(Error::NoSpanToExtract)?;
        let trace_id = root.lock().unwrap().trace_id;
        let priority = state.sampling_decision.map(|d| d.priority.value());
        propagation::inject(
            &self.config.injection_styles,
            trace_id,
            span_id,
            priority,
            state.origin.as_deref(),
            &state.trace_tags,
            state.additional_w3c_tracestate.as_deref(),
            writer,
        )?;
        if self.config.injection_styles.contains(&PropagationStyle::Baggage) {
            propagation::baggage::inject(
                &state.baggage,
                self.config.baggage_max_items,
                self.config.baggage_max_bytes,
                writer,
            )?;
        }
        Ok(())
    }

    /// Replaces the segment's baggage wholesale, e.g. right after decoding
    /// an incoming `baggage` header.
    pub fn set_baggage(&self, baggage: Baggage) {
        self.state.lock().unwrap().baggage = baggage;
    }

    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().baggage.get(key).map(str::to_string)
    }

    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().unwrap().baggage.set(key, value);
    }

    pub fn remove_baggage_item(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().baggage.remove(key)
    }

    pub fn baggage_snapshot(&self) -> Baggage {
        self.state.lock().unwrap().baggage.clone()
    }

    /// Records the other vendors' `tracestate` members from an inbound W3C
    /// extraction so they're re-appended on injection instead of dropped.
    pub fn set_additional_w3c_tracestate(&self, value: Option<String>) {
        self.state.lock().unwrap().additional_w3c_tracestate = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::span_sampler::SpanSampler;
    use crate::sampling::trace_sampler::DefaultTraceSampler;
    use crate::testing::InMemoryCollector;

    fn test_config(collector: Arc<dyn Collector>) -> SegmentConfig {
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
            injection_styles: vec![PropagationStyle::Datadog],
            hostname: None,
            tags_header_max_size: 512,
            report_traces: true,
            baggage_max_items: crate::baggage::DEFAULT_MAX_ITEMS,
            baggage_max_bytes: crate::baggage::DEFAULT_MAX_BYTES,
        }
    }

    #[test]
    fn finalizes_and_sends_when_last_span_finishes() {
        let collector = Arc::new(InMemoryCollector::new());
        let segment = TraceSegment::new(test_config(collector.clone()), None, HashMap::new(), None);
        let root = Arc::new(Mutex::new(SpanData::new_for_test("svc", "op", "res")));
        segment.register_span(root.clone());

        segment.span_finished();

        assert_eq!(collector.chunks().len(), 1);
    }

    #[test]
    fn waits_for_every_span_before_finalizing() {
        let collector = Arc::new(InMemoryCollector::new());
        let segment = TraceSegment::new(test_config(collector.clone()), None, HashMap::new(), None);
        segment.register_span(Arc::new(Mutex::new(SpanData::new_for_test("svc", "a", "a"))));
        segment.register_span(Arc::new(Mutex::new(SpanData::new_for_test("svc", "b", "b"))));

        segment.span_finished();
        assert!(collector.chunks().is_empty());
        segment.span_finished();
        assert_eq!(collector.chunks().len(), 1);
    }

    #[test]
    fn manual_keep_override_is_honored() {
        let collector = Arc::new(InMemoryCollector::new());
        let segment = TraceSegment::new(test_config(collector.clone()), None, HashMap::new(), None);
        let root = Arc::new(Mutex::new(SpanData::new_for_test("svc", "op", "res")));
        segment.register_span(root.clone());
        segment.override_sampling_priority(SamplingPriority::UserKeep);

        segment.span_finished();
        let chunks = collector.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0][0].metrics.get("_sampling_priority_v1"),
            Some(&(SamplingPriority::UserKeep.value() as f64))
        );
    }

    #[test]
    fn baggage_round_trips_through_inject_when_style_enabled() {
        let collector = Arc::new(InMemoryCollector::new());
        let mut config = test_config(collector);
        config.injection_styles = vec![PropagationStyle::Baggage];
        let segment = TraceSegment::new(config, None, HashMap::new(), None);
        segment.register_span(Arc::new(Mutex::new(SpanData::new_for_test("svc", "op", "res"))));
        segment.set_baggage_item("userId", "alice");

        let mut carrier = crate::propagation::CarrierMap::default();
        segment.inject(SpanId::new(1), &mut carrier).unwrap();

        assert_eq!(carrier.0.get("baggage").map(String::as_str), Some("userId=alice"));
        assert_eq!(segment.baggage_item("userId"), Some("alice".to_string()));
    }

    #[test]
    fn baggage_is_not_injected_when_style_absent() {
        let collector = Arc::new(InMemoryCollector::new());
        let segment = TraceSegment::new(test_config(collector), None, HashMap::new(), None);
        segment.register_span(Arc::new(Mutex::new(SpanData::new_for_test("svc", "op", "res"))));
        segment.set_baggage_item("userId", "alice");

        let mut carrier = crate::propagation::CarrierMap::default();
        segment.inject(SpanId::new(1), &mut carrier).unwrap();

        assert!(!carrier.0.contains_key("baggage"));
    }
}
