//! Internal product-usage telemetry: periodic `app-started`/heartbeat/
//! metrics payloads sent to the Agent's telemetry intake, grounded on
//! `original_source/src/datadog/telemetry/telemetry_impl.{h,cpp}`'s
//! `Telemetry` class. Not present in the distilled module list but
//! supplemented per `SPEC_FULL.md` §10.5: every other Datadog tracer ships
//! this, and dropping it would leave product-usage visibility dark.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dd_trace_runtime::{CancelHandle, HttpClient, HttpRequest, Scheduler};

use crate::remote_config::TracerSignature;

/// Monotonic counters fed by the collector and span lifecycle, flushed to
/// the Agent as telemetry metrics on each heartbeat.
#[derive(Default)]
pub struct Counters {
    pub trace_api_requests: AtomicU64,
    pub trace_api_responses: AtomicU64,
    pub trace_api_errors_network: AtomicU64,
    pub trace_api_errors_status_code: AtomicU64,
    pub trace_chunks_enqueued: AtomicU64,
    pub trace_chunks_dropped: AtomicU64,
}

impl Counters {
    pub fn new() -> Arc<Counters> {
        Arc::new(Counters::default())
    }

    /// Reads and zeroes every counter, for emission as a telemetry
    /// "metrics" payload whose values are deltas since the last heartbeat.
    fn take_snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("trace_api.requests", self.trace_api_requests.swap(0, Ordering::Relaxed)),
            ("trace_api.responses", self.trace_api_responses.swap(0, Ordering::Relaxed)),
            (
                "trace_api.errors_network",
                self.trace_api_errors_network.swap(0, Ordering::Relaxed),
            ),
            (
                "trace_api.errors_status_code",
                self.trace_api_errors_status_code.swap(0, Ordering::Relaxed),
            ),
            (
                "trace_chunks_enqueued",
                self.trace_chunks_enqueued.swap(0, Ordering::Relaxed),
            ),
            (
                "trace_chunks_dropped",
                self.trace_chunks_dropped.swap(0, Ordering::Relaxed),
            ),
        ]
    }
}

pub(crate) const TRACER_LANGUAGE: &str = "rust";
pub(crate) const TRACER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sends `app-started`, periodic `app-heartbeat` + `generate-metrics`, and
/// a final `app-closing` payload to the Agent's `/telemetry/proxy/api/v2/apmtelemetry`
/// endpoint.
pub struct TelemetryClient {
    http: Arc<dyn HttpClient>,
    agent_url: String,
    signature: TracerSignature,
    counters: Arc<Counters>,
    seq_id: AtomicU64,
    cancel: Mutex<Option<CancelHandle>>,
}

impl TelemetryClient {
    /// Builds the client, sends `app-started` immediately, and schedules a
    /// heartbeat (which also flushes the metrics snapshot) every
    /// `heartbeat_interval`.
    pub fn start(
        http: Arc<dyn HttpClient>,
        scheduler: Arc<dyn Scheduler>,
        agent_url: String,
        signature: TracerSignature,
        counters: Arc<Counters>,
        heartbeat_interval: Duration,
    ) -> Arc<TelemetryClient> {
        let client = Arc::new(TelemetryClient {
            http,
            agent_url,
            signature,
            counters,
            seq_id: AtomicU64::new(0),
            cancel: Mutex::new(None),
        });

        client.send_app_started();

        let heartbeat_client = Arc::clone(&client);
        let cancel = scheduler.schedule(
            heartbeat_interval,
            Box::new(move || heartbeat_client.send_heartbeat()),
        );
        *client.cancel.lock().unwrap() = Some(cancel);
        client
    }

    fn next_seq_id(&self) -> u64 {
        self.seq_id.fetch_add(1, Ordering::Relaxed)
    }

    fn application_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "language_name": TRACER_LANGUAGE,
            "language_version": "",
            "tracer_version": TRACER_VERSION,
            "service_name": self.signature.service,
            "env": self.signature.env,
        })
    }

    fn send_telemetry(&self, request_type: &str, payload: serde_json::Value) {
        let body = serde_json::json!({
            "api_version": "v2",
            "request_type": request_type,
            "tracer_time": 0,
            "runtime_id": self.signature.runtime_id,
            "seq_id": self.next_seq_id(),
            "application": self.application_payload(),
            "payload": payload,
        });
        let Ok(body) = serde_json::to_vec(&body) else {
            return;
        };
        let request = HttpRequest::new(
            format!("{}/telemetry/proxy/api/v2/apmtelemetry", self.agent_url),
            body,
        )
        .with_header("Content-Type", "application/json")
        .with_header("DD-Telemetry-API-Version", "v2")
        .with_header("DD-Telemetry-Request-Type", request_type)
        .with_header("DD-Client-Library-Language", TRACER_LANGUAGE)
        .with_header("DD-Client-Library-Version", TRACER_VERSION);
        let deadline = Instant::now() + Duration::from_secs(2);
        // Telemetry delivery is best-effort: a failure here is logged, not
        // propagated, since it must never affect trace delivery.
        if let Err(_err) = self.http.post(request, deadline) {
            #[cfg(feature = "internal-logs")]
            tracing::debug!(request_type, "failed to deliver telemetry payload");
        }
    }

    fn send_app_started(&self) {
        self.send_telemetry("app-started", serde_json::json!({}));
    }

    fn send_heartbeat(&self) {
        self.send_telemetry("app-heartbeat", serde_json::json!({}));
        self.send_metrics();
    }

    fn send_metrics(&self) {
        let series: Vec<_> = self
            .counters
            .take_snapshot()
            .into_iter()
            .filter(|(_, value)| *value > 0)
            .map(|(metric, value)| {
                serde_json::json!({
                    "metric": metric,
                    "points": [[0, value]],
                    "type": "count",
                    "common": true,
                })
            })
            .collect();
        if series.is_empty() {
            return;
        }
        self.send_telemetry(
            "generate-metrics",
            serde_json::json!({ "namespace": "tracers", "series": series }),
        );
    }

    pub fn shutdown(&self) {
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        self.send_metrics();
        self.send_telemetry("app-closing", serde_json::json!({}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_resets_counters() {
        let counters = Counters::new();
        counters.trace_api_requests.fetch_add(5, Ordering::Relaxed);
        let snapshot = counters.take_snapshot();
        assert_eq!(
            snapshot.iter().find(|(k, _)| *k == "trace_api.requests").map(|(_, v)| *v),
            Some(5)
        );
        assert_eq!(counters.trace_api_requests.load(Ordering::Relaxed), 0);
    }
}
