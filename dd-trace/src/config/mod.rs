//! Tracer configuration: a builder ([`TracerConfig`]) and its validated,
//! immutable counterpart ([`FinalizedConfig`]), grounded on
//! `original_source/src/datadog/tracer_config.h` and its
//! `finalize_config` free function, and on the teacher's
//! `opentelemetry_sdk::trace::Config`/builder split.

pub mod manager;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::propagation::PropagationStyle;
use crate::rate::Rate;
use crate::sampling::span_sampler::{SpanSampler, SpanSamplerRule};
use crate::sampling::trace_sampler::{DefaultTraceSampler, TraceSamplerRule};
use crate::span_matcher::SpanMatcher;

/// The service/env/version/global-tags quadruple applied to every span
/// created by a tracer, unless overridden per-span. Named and shaped after
/// `original_source/src/datadog/span_defaults.h`.
#[derive(Debug, Clone, Default)]
pub struct SpanDefaults {
    pub service: String,
    pub env: Option<String>,
    pub version: Option<String>,
    pub tags: HashMap<String, String>,
}

/// A single JSON-configured `DD_TRACE_SAMPLING_RULES` / `DD_SPAN_SAMPLING_RULES`
/// entry, prior to constructing its [`crate::span_matcher::SpanMatcher`] and
/// optional [`crate::sampling::limiter::Limiter`].
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SamplingRuleConfig {
    #[serde(default = "default_glob")]
    pub service: String,
    #[serde(default = "default_glob")]
    pub name: String,
    #[serde(default = "default_glob")]
    pub resource: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub sample_rate: f64,
    pub max_per_second: Option<f64>,
}

fn default_glob() -> String {
    "*".to_string()
}

/// Default ceiling on traces kept per second by the global trace sampler
/// when no rule-scoped limit applies, matching the original's
/// `TraceSampler` default.
pub const DEFAULT_TRACE_RATE_LIMIT: f64 = 100.0;

/// The builder for tracer configuration. Every field has a sensible
/// default; `service` is the only one that `finalize_config` requires be
/// non-empty.
#[derive(Debug, Clone, Default)]
pub struct TracerConfig {
    pub service: Option<String>,
    pub env: Option<String>,
    pub version: Option<String>,
    pub tags: HashMap<String, String>,
    pub agent_url: Option<String>,
    pub trace_sampling_rules: Vec<SamplingRuleConfig>,
    pub span_sampling_rules: Vec<SamplingRuleConfig>,
    pub trace_rate_limit: Option<f64>,
    pub extraction_styles: Option<Vec<PropagationStyle>>,
    pub injection_styles: Option<Vec<PropagationStyle>>,
    pub report_traces: bool_flag::BoolFlag,
    pub tags_header_max_size: Option<usize>,
    pub telemetry_enabled: bool_flag::BoolFlag,
    pub telemetry_heartbeat_interval: Option<Duration>,
    pub baggage_max_items: Option<usize>,
    pub baggage_max_bytes: Option<usize>,
}

/// A tri-state default so `finalize_config` can tell "not set, use the
/// crate default" apart from an explicit `false`, without every caller
/// needing to remember which boolean fields default to true.
mod bool_flag {
    #[derive(Debug, Clone, Copy, Default)]
    pub struct BoolFlag(Option<bool>);

    impl BoolFlag {
        pub fn set(&mut self, value: bool) {
            self.0 = Some(value);
        }

        pub fn resolve(self, default: bool) -> bool {
            self.0.unwrap_or(default)
        }
    }
}

impl TracerConfig {
    pub fn new() -> Self {
        TracerConfig::default()
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_agent_url(mut self, url: impl Into<String>) -> Self {
        self.agent_url = Some(url.into());
        self
    }

    pub fn with_trace_sampling_rules(mut self, rules: Vec<SamplingRuleConfig>) -> Self {
        self.trace_sampling_rules = rules;
        self
    }

    pub fn with_span_sampling_rules(mut self, rules: Vec<SamplingRuleConfig>) -> Self {
        self.span_sampling_rules = rules;
        self
    }

    pub fn with_trace_rate_limit(mut self, limit: f64) -> Self {
        self.trace_rate_limit = Some(limit);
        self
    }

    pub fn with_propagation_styles(mut self, styles: Vec<PropagationStyle>) -> Self {
        self.extraction_styles = Some(styles.clone());
        self.injection_styles = Some(styles);
        self
    }

    pub fn with_extraction_styles(mut self, styles: Vec<PropagationStyle>) -> Self {
        self.extraction_styles = Some(styles);
        self
    }

    pub fn with_injection_styles(mut self, styles: Vec<PropagationStyle>) -> Self {
        self.injection_styles = Some(styles);
        self
    }

    pub fn with_report_traces(mut self, enabled: bool) -> Self {
        self.report_traces.set(enabled);
        self
    }

    pub fn with_telemetry_enabled(mut self, enabled: bool) -> Self {
        self.telemetry_enabled.set(enabled);
        self
    }

    pub fn with_baggage_max_items(mut self, max_items: usize) -> Self {
        self.baggage_max_items = Some(max_items);
        self
    }

    pub fn with_baggage_max_bytes(mut self, max_bytes: usize) -> Self {
        self.baggage_max_bytes = Some(max_bytes);
        self
    }

    /// Reads `DD_*` environment variables into a config, as a convenience
    /// for this crate's own tests and examples. This is deliberately not
    /// positioned as the authoritative environment-variable binding layer
    /// for end users; that matrix is owned by whatever integration wires
    /// this crate into a runtime.
    pub fn from_env() -> Self {
        let mut config = TracerConfig::new();
        if let Ok(service) = std::env::var("DD_SERVICE") {
            config = config.with_service(service);
        }
        if let Ok(env) = std::env::var("DD_ENV") {
            config = config.with_env(env);
        }
        if let Ok(version) = std::env::var("DD_VERSION") {
            config = config.with_version(version);
        }
        if let Ok(tags) = std::env::var("DD_TAGS") {
            for entry in tags.split(',').filter(|s| !s.is_empty()) {
                if let Some((key, value)) = entry.split_once(':') {
                    config = config.with_tag(key.trim(), value.trim());
                }
            }
        }
        if let Ok(url) = std::env::var("DD_TRACE_AGENT_URL") {
            config = config.with_agent_url(url);
        } else if let Ok(host) = std::env::var("DD_AGENT_HOST") {
            let port = std::env::var("DD_TRACE_AGENT_PORT").unwrap_or_else(|_| "8126".to_string());
            config = config.with_agent_url(format!("http://{host}:{port}"));
        }
        if let Ok(limit) = std::env::var("DD_TRACE_RATE_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config = config.with_trace_rate_limit(limit);
            }
        }
        if let Ok(rules_json) = std::env::var("DD_TRACE_SAMPLING_RULES") {
            if let Ok(rules) = serde_json::from_str::<Vec<SamplingRuleConfig>>(&rules_json) {
                config = config.with_trace_sampling_rules(rules);
            }
        }
        if let Ok(enabled) = std::env::var("DD_TRACE_ENABLED") {
            config = config.with_report_traces(parse_bool_env(&enabled));
        }
        if let Ok(styles) = std::env::var("DD_TRACE_PROPAGATION_STYLE") {
            if let Ok(parsed) = styles
                .split(',')
                .map(|s| PropagationStyle::parse(s.trim()))
                .collect::<Result<Vec<_>>>()
            {
                config = config.with_propagation_styles(parsed);
            }
        }
        if let Ok(max_items) = std::env::var("DD_TRACE_BAGGAGE_MAX_ITEMS") {
            if let Ok(max_items) = max_items.parse() {
                config = config.with_baggage_max_items(max_items);
            }
        }
        if let Ok(max_bytes) = std::env::var("DD_TRACE_BAGGAGE_MAX_BYTES") {
            if let Ok(max_bytes) = max_bytes.parse() {
                config = config.with_baggage_max_bytes(max_bytes);
            }
        }
        config
    }
}

fn parse_bool_env(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// The validated, immutable result of [`finalize_config`]. Everything a
/// [`crate::tracer::Tracer`] needs to run is resolved here, so that no
/// fallible parsing remains on the hot span-creation path.
pub struct FinalizedConfig {
    pub defaults: Arc<SpanDefaults>,
    pub agent_url: String,
    pub trace_sampler: Arc<DefaultTraceSampler>,
    pub span_sampler: Arc<SpanSampler>,
    pub extraction_styles: Vec<PropagationStyle>,
    pub injection_styles: Vec<PropagationStyle>,
    pub tags_header_max_size: usize,
    pub report_traces: bool,
    pub telemetry_enabled: bool,
    pub telemetry_heartbeat_interval: Duration,
    pub baggage_max_items: usize,
    pub baggage_max_bytes: usize,
}

fn validate_agent_url(url: &str) -> Result<()> {
    let Some((scheme, _)) = url.split_once("://") else {
        return Err(Error::UrlMissingSeparator(url.to_string()));
    };
    const SUPPORTED: &[&str] = &["http", "https", "unix", "http+unix", "https+unix"];
    if !SUPPORTED.contains(&scheme) {
        return Err(Error::UrlUnsupportedScheme(url.to_string()));
    }
    Ok(())
}

fn build_matcher(rule: &SamplingRuleConfig) -> SpanMatcher {
    SpanMatcher {
        service: rule.service.clone(),
        name: rule.name.clone(),
        resource: rule.resource.clone(),
        tags: rule.tags.clone(),
    }
}

pub fn finalize_config(config: TracerConfig) -> Result<FinalizedConfig> {
    let service = config
        .service
        .filter(|s| !s.is_empty())
        .ok_or(Error::ServiceNameRequired)?;

    let agent_url = config
        .agent_url
        .unwrap_or_else(|| "http://localhost:8126".to_string());
    validate_agent_url(&agent_url)?;

    let defaults = Arc::new(SpanDefaults {
        service,
        env: config.env,
        version: config.version,
        tags: config.tags,
    });

    let mut trace_rules = Vec::with_capacity(config.trace_sampling_rules.len());
    for rule in &config.trace_sampling_rules {
        let rate = Rate::new(rule.sample_rate)?;
        let mut built = TraceSamplerRule::new(build_matcher(rule), rate);
        if let Some(max_per_second) = rule.max_per_second {
            built = built.with_max_per_second(max_per_second);
        }
        trace_rules.push(built);
    }

    let mut span_rules = Vec::with_capacity(config.span_sampling_rules.len());
    for rule in &config.span_sampling_rules {
        let rate = Rate::new(rule.sample_rate)?;
        let mut built = SpanSamplerRule::new(build_matcher(rule), rate);
        if let Some(max_per_second) = rule.max_per_second {
            built = built.with_max_per_second(max_per_second);
        }
        span_rules.push(built);
    }

    let trace_sampler = Arc::new(DefaultTraceSampler::new(
        trace_rules,
        config.trace_rate_limit.unwrap_or(DEFAULT_TRACE_RATE_LIMIT),
    ));
    let span_sampler = Arc::new(SpanSampler::new(span_rules));

    let extraction_styles = config.extraction_styles.unwrap_or_else(default_styles);
    let injection_styles = config.injection_styles.unwrap_or_else(default_styles);

    Ok(FinalizedConfig {
        defaults,
        agent_url,
        trace_sampler,
        span_sampler,
        extraction_styles,
        injection_styles,
        tags_header_max_size: config.tags_header_max_size.unwrap_or(512),
        report_traces: config.report_traces.resolve(true),
        telemetry_enabled: config.telemetry_enabled.resolve(true),
        telemetry_heartbeat_interval: config
            .telemetry_heartbeat_interval
            .unwrap_or(Duration::from_secs(10)),
        baggage_max_items: config
            .baggage_max_items
            .unwrap_or(crate::baggage::DEFAULT_MAX_ITEMS),
        baggage_max_bytes: config
            .baggage_max_bytes
            .unwrap_or(crate::baggage::DEFAULT_MAX_BYTES),
    })
}

fn default_styles() -> Vec<PropagationStyle> {
    vec![
        PropagationStyle::Datadog,
        PropagationStyle::TraceContext,
        PropagationStyle::Baggage,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_rejects_missing_service() {
        let config = TracerConfig::new();
        assert!(matches!(
            finalize_config(config),
            Err(Error::ServiceNameRequired)
        ));
    }

    #[test]
    fn finalize_rejects_bad_agent_url() {
        let config = TracerConfig::new().with_service("svc").with_agent_url("not-a-url");
        assert!(finalize_config(config).is_err());
    }

    #[test]
    fn finalize_accepts_minimal_config() {
        let config = TracerConfig::new().with_service("svc");
        let finalized = finalize_config(config).unwrap();
        assert_eq!(finalized.defaults.service, "svc");
        assert_eq!(finalized.agent_url, "http://localhost:8126");
    }

    #[test]
    fn from_env_reads_service() {
        temp_env::with_var("DD_SERVICE", Some("env-svc"), || {
            let config = TracerConfig::from_env();
            assert_eq!(config.service.as_deref(), Some("env-svc"));
        });
    }
}
