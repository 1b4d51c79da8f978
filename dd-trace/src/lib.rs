//! Core APM tracing runtime for Datadog's Rust tracer: span and trace
//! segment lifecycle, context propagation, sampling, the agent collector,
//! remote configuration, and internal telemetry.
//!
//! This crate has no async runtime dependency by design: [`tracer::Tracer`]
//! talks to the Datadog Agent over a blocking, deadline-bounded
//! [`dd_trace_runtime::HttpClient`], scheduled from a background thread via
//! [`dd_trace_runtime::Scheduler`]. Integrations that expose this as a
//! `tracing`-subscriber layer, an OpenTelemetry bridge, or a language-runtime
//! binding live in their own crates upstream of this one.
//!
//! ```no_run
//! use dd_trace::config::{finalize_config, TracerConfig};
//! use dd_trace::tracer::Tracer;
//! use dd_trace_runtime::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let config = finalize_config(TracerConfig::new().with_service("my-service")).unwrap();
//! let tracer = Tracer::new(config, Arc::new(ReqwestHttpClient::default()));
//! let span = tracer.create_span();
//! span.set_tag("http.method", "GET");
//! ```

pub mod baggage;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod ids;
pub mod platform;
pub mod propagation;
pub mod rate;
pub mod remote_config;
pub mod runtime_id;
pub mod sampling;
pub mod span;
pub mod span_data;
pub mod span_matcher;
pub mod trace_segment;
pub mod tracer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use span::{Span, SpanConfig};
pub use tracer::Tracer;
