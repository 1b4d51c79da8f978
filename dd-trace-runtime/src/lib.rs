//! External-collaborator traits consumed by `dd-trace`'s core: an HTTP
//! transport and a recurring-task scheduler, plus small local-default
//! implementations so the crate is runnable end to end without the host
//! application supplying its own.
//!
//! The core never assumes a cooperative async runtime (see the concurrency
//! model in `dd-trace`'s documentation): [`HttpClient::post`] is a blocking
//! call the scheduler thread makes, bounded by a deadline, mirroring how the
//! C++ original's `curl`-backed default client behaves.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A request to POST a body to a URL with a fixed set of headers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, body: Vec<u8>) -> Self {
        HttpRequest {
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The response to an [`HttpRequest`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure: the request never produced an HTTP response.
#[derive(Debug, thiserror::Error)]
#[error("HTTP transport error: {0}")]
pub struct TransportError(pub String);

/// A minimal interface for sending trace payloads, remote-config polls, and
/// telemetry events over HTTP.
///
/// Implementations are expected to enforce `deadline` themselves; callers
/// (the agent collector's flush task, the remote-config poller) rely on
/// `post` never blocking past it.
pub trait HttpClient: Debug + Send + Sync {
    fn post(&self, request: HttpRequest, deadline: Instant) -> Result<HttpResponse, TransportError>;

    /// Block the calling thread until in-flight requests complete or
    /// `deadline` elapses, whichever comes first. Called once, from the
    /// collector's destructor path, during shutdown.
    fn drain(&self, _deadline: Instant) {}
}

/// A cancellation handle for a recurring scheduled task. Canceling is
/// idempotent; after `cancel()` returns, the task is guaranteed not to run
/// again (it may already be mid-execution).
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A minimal interface for running a task repeatedly on a fixed interval.
///
/// Out of scope for the core's own implementation per the library's scope
/// (the event scheduler is an external collaborator); [`ThreadScheduler`] is
/// a usable default so the crate's own tests and examples run without a host
/// application supplying one.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, interval: Duration, task: Box<dyn Fn() + Send + Sync>) -> CancelHandle;
}

/// A [`Scheduler`] backed by one detached OS thread per scheduled task. This
/// is the default used by `AgentCollector` and the remote-config poller when
/// no other scheduler is supplied.
#[derive(Debug, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, interval: Duration, task: Box<dyn Fn() + Send + Sync>) -> CancelHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = CancelHandle {
            cancelled: cancelled.clone(),
        };
        std::thread::Builder::new()
            .name("dd-trace-scheduler".to_string())
            .spawn(move || {
                while !cancelled.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    task();
                }
            })
            .expect("failed to spawn scheduler thread");
        handle
    }
}

/// Adapts an `http::HeaderMap` to a key/value reader, for hosts that carry
/// propagation headers in that type (e.g. from a `reqwest`/`hyper` request).
pub struct HeaderMapReader<'a>(pub &'a http::HeaderMap);

impl<'a> HeaderMapReader<'a> {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Adapts an `http::HeaderMap` to a key/value writer.
pub struct HeaderMapWriter<'a>(pub &'a mut http::HeaderMap);

impl<'a> HeaderMapWriter<'a> {
    pub fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

#[cfg(feature = "reqwest-client")]
mod reqwest_client {
    use super::*;

    /// The default [`HttpClient`], backed by a blocking `reqwest` client.
    /// Grounded on `opentelemetry-datadog`'s `reqwest-blocking-client`
    /// feature, which wraps the same crate the same way for the same reason
    /// (a local agent is typically reached over a short-lived blocking
    /// POST).
    #[derive(Debug)]
    pub struct ReqwestHttpClient {
        client: reqwest::blocking::Client,
    }

    impl Default for ReqwestHttpClient {
        fn default() -> Self {
            ReqwestHttpClient {
                client: reqwest::blocking::Client::new(),
            }
        }
    }

    impl HttpClient for ReqwestHttpClient {
        fn post(
            &self,
            request: HttpRequest,
            deadline: Instant,
        ) -> Result<HttpResponse, TransportError> {
            let timeout = deadline.saturating_duration_since(Instant::now());
            let mut builder = self
                .client
                .post(&request.url)
                .timeout(timeout)
                .body(request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            let response = builder.send().map_err(|e| TransportError(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .map_err(|e| TransportError(e.to_string()))?
                .to_vec();
            Ok(HttpResponse { status, body })
        }
    }
}

#[cfg(feature = "reqwest-client")]
pub use reqwest_client::ReqwestHttpClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_round_trip() {
        let mut map = http::HeaderMap::new();
        HeaderMapWriter(&mut map).set("x-datadog-trace-id", "123".to_string());
        assert_eq!(
            HeaderMapReader(&map).get("X-Datadog-Trace-Id"),
            Some("123")
        );
    }

    #[test]
    fn cancel_handle_is_idempotent() {
        let scheduler = ThreadScheduler;
        let counter = Arc::new(AtomicBool::new(false));
        let c = counter.clone();
        let handle = scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                c.store(true, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(20));
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(counter.load(Ordering::SeqCst));
    }
}
