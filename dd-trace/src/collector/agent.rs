//! Buffers finished trace chunks and flushes them to the Datadog Agent's
//! `/v0.4/traces` endpoint on a schedule, grounded on
//! `original_source/src/datadog/datadog_agent.cpp`.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dd_trace_runtime::{CancelHandle, HttpClient, HttpRequest, Scheduler};

use crate::collector::{msgpack, Collector};
use crate::sampling::trace_sampler::TraceSampler;
use crate::span_data::SpanData;
use crate::telemetry::{Counters, TRACER_LANGUAGE, TRACER_VERSION};

const TRACES_PATH: &str = "/v0.4/traces";

pub struct AgentCollector {
    http: Arc<dyn HttpClient>,
    agent_url: String,
    trace_sampler: Arc<dyn TraceSampler>,
    counters: Arc<Counters>,
    buffer: Mutex<Vec<Vec<SpanData>>>,
    cancel: Mutex<Option<CancelHandle>>,
}

impl AgentCollector {
    pub fn start(
        http: Arc<dyn HttpClient>,
        scheduler: Arc<dyn Scheduler>,
        agent_url: String,
        trace_sampler: Arc<dyn TraceSampler>,
        counters: Arc<Counters>,
        flush_interval: Duration,
    ) -> Arc<AgentCollector> {
        let collector = Arc::new(AgentCollector {
            http,
            agent_url,
            trace_sampler,
            counters,
            buffer: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
        });

        let flush_target = Arc::clone(&collector);
        let cancel = scheduler.schedule(flush_interval, Box::new(move || flush_target.flush()));
        *collector.cancel.lock().unwrap() = Some(cancel);
        collector
    }

    fn flush(&self) {
        let chunks = {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let body = match msgpack::encode_chunks(&chunks) {
            Ok(body) => body,
            Err(_err) => {
                #[cfg(feature = "internal-logs")]
                tracing::warn!(error = ?_err, "failed to encode trace chunks; dropping batch");
                self.counters
                    .trace_chunks_dropped
                    .fetch_add(chunks.len() as u64, Ordering::Relaxed);
                return;
            }
        };

        let request = HttpRequest::new(format!("{}{TRACES_PATH}", self.agent_url), body)
            .with_header("Content-Type", "application/msgpack")
            .with_header("X-Datadog-Trace-Count", chunks.len().to_string())
            .with_header("Datadog-Meta-Lang", TRACER_LANGUAGE)
            .with_header("Datadog-Meta-Lang-Version", "")
            .with_header("Datadog-Meta-Tracer-Version", TRACER_VERSION);
        let deadline = Instant::now() + Duration::from_secs(2);

        self.counters.trace_api_requests.fetch_add(1, Ordering::Relaxed);
        match self.http.post(request, deadline) {
            Ok(response) if response.is_success() => {
                self.counters.trace_api_responses.fetch_add(1, Ordering::Relaxed);
                if let Ok(rates) = msgpack::parse_traces_response(&response.body) {
                    self.trace_sampler.handle_collector_response(rates);
                }
            }
            Ok(_response) => {
                self.counters
                    .trace_api_errors_status_code
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(_err) => {
                self.counters.trace_api_errors_network.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "internal-logs")]
                tracing::warn!(error = ?_err, "failed to reach the Datadog Agent");
            }
        }
    }
}

impl Collector for AgentCollector {
    fn send(&self, chunk: Vec<SpanData>) {
        self.buffer.lock().unwrap().push(chunk);
        self.counters.trace_chunks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn shutdown(&self, deadline: Instant) {
        self.flush();
        self.http.drain(deadline);
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
    }
}
