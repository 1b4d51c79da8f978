//! The error taxonomy for this crate's fallible public APIs.
//!
//! Internal, non-fatal faults (a malformed `x-datadog-tags` header, an HTTP
//! transport failure during flush) are not represented here — they are
//! logged and, where applicable, counted, but never surface to a user thread
//! as a `Result::Err`. Only configuration-time and extraction-time failures
//! are.

use crate::propagation::PropagationStyle;

/// Every way a fallible call into this crate can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a non-empty service name is required")]
    ServiceNameRequired,

    #[error("agent URL {0:?} is missing a \"://\" separator")]
    UrlMissingSeparator(String),

    #[error("agent URL {0:?} uses an unsupported scheme (expected one of http, https, unix, http+unix, https+unix)")]
    UrlUnsupportedScheme(String),

    #[error("could not parse {0:?} as an integer")]
    InvalidInteger(String),

    #[error("integer {0:?} is out of the allowed range")]
    OutOfRangeInteger(String),

    #[error("could not parse {0:?} as a floating point number")]
    InvalidDouble(String),

    #[error("value {0} is out of the allowed range [0.0, 1.0]")]
    OutOfRangeDouble(f64),

    #[error("malformed traceparent header: {0}")]
    MalformedTraceparent(String),

    #[error("malformed trace ID: {0:?}")]
    MalformedTraceId(String),

    #[error("malformed baggage header: {0}")]
    MalformedBaggage(String),

    #[error("baggage propagation is disabled")]
    BaggageDisabled,

    #[error("baggage header would exceed the configured max-bytes limit")]
    BaggageMaxBytes,

    #[error("baggage header would exceed the configured max-items limit")]
    BaggageMaxItems,

    #[error("no trace context was present to extract")]
    NoSpanToExtract,

    #[error("a parent span ID was extracted in style {style:?} without a trace ID, and no origin was present")]
    MissingTraceId { style: Option<PropagationStyle> },

    #[error("a trace ID was extracted in style {style:?} without a parent span ID")]
    MissingParentSpanId { style: Option<PropagationStyle> },

    #[error("the trace ID extracted in style {style:?} was all zero")]
    ZeroTraceId { style: Option<PropagationStyle> },

    #[error("extraction styles disagreed on trace identity: {0}")]
    InconsistentExtractionStyles(String),

    #[error("DD_TRACE_SAMPLING_RULES is not valid JSON: {0}")]
    TraceSamplingRulesInvalidJson(String),

    #[error("DD_TRACE_SAMPLING_RULES has the wrong shape: {0}")]
    TraceSamplingRulesWrongType(String),

    #[error("max_per_second must be a positive, finite number, got {0}")]
    MaxPerSecondOutOfRange(f64),

    #[error("failed to MessagePack-encode trace payload: {0}")]
    MessagepackEncodeFailure(String),

    #[error("HTTP request failed: {0}")]
    HttpRequestFailure(String),

    #[error("no collector is configured")]
    CollectorNull,

    #[error("remote configuration input was invalid: {0}")]
    RemoteConfigurationInvalidInput(String),

    #[error("propagation style {0:?} was configured more than once")]
    DuplicatePropagationStyle(PropagationStyle),

    #[error("unknown propagation style: {0:?}")]
    UnknownPropagationStyle(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
