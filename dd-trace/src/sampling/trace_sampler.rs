//! Trace-level sampling, grounded on
//! `original_source/src/datadog/trace_sampler.{h,cpp}`: rule matching, then
//! a Knuth-hash threshold test, then a shared rate limiter, falling back to
//! agent-fed per-service rates and finally `Rate::ONE` when nothing else
//! applies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::clock::{Clock, SystemClock, TimePoint};
use crate::rate::Rate;
use crate::sampling::decision::{mechanism, Origin, SamplingDecision, SamplingPriority};
use crate::sampling::{knuth_hash, limiter::Limiter};
use crate::span_data::SpanData;
use crate::span_matcher::SpanMatcher;

/// A single `DD_TRACE_SAMPLING_RULES` entry: a matcher, the rate to apply
/// when it matches, and an optional rule-scoped rate limit (distinct from
/// the sampler's shared limiter).
pub struct TraceSamplerRule {
    pub matcher: SpanMatcher,
    pub rate: Rate,
    pub limiter: Option<Limiter>,
}

impl TraceSamplerRule {
    pub fn new(matcher: SpanMatcher, rate: Rate) -> Self {
        TraceSamplerRule {
            matcher,
            rate,
            limiter: None,
        }
    }

    pub fn with_max_per_second(mut self, max_per_second: f64) -> Self {
        self.limiter = Some(Limiter::new(max_per_second));
        self
    }
}

/// Trait-object seam so `ConfigManager` can swap the active sampler (e.g. in
/// response to remote configuration) without the rest of the tracer caring
/// which concrete implementation is installed. Mirrors the C++ original's
/// `ErasedTraceSampler` type erasure, expressed in Rust as a plain trait
/// object rather than a hand-rolled vtable.
pub trait TraceSampler: Send + Sync {
    fn decide(&self, root: &SpanData) -> SamplingDecision;

    /// Applies an agent `rate_by_service` feedback payload. A no-op for
    /// samplers (like [`ApmDisabledTraceSampler`]) that don't consult it.
    fn handle_collector_response(&self, _rates: HashMap<String, Rate>) {}
}

/// The default [`TraceSampler`]: user/remote rules first, then agent
/// feedback rates, then an always-`Rate::ONE` fallback.
pub struct DefaultTraceSampler {
    rules: Vec<TraceSamplerRule>,
    limiter: Limiter,
    agent_rates: Mutex<HashMap<String, Rate>>,
    default_rate: Rate,
}

impl DefaultTraceSampler {
    pub fn new(rules: Vec<TraceSamplerRule>, max_per_second: f64) -> Self {
        DefaultTraceSampler {
            rules,
            limiter: Limiter::new(max_per_second),
            agent_rates: Mutex::new(HashMap::new()),
            default_rate: Rate::ONE,
        }
    }

    fn agent_rate_key(service: &str, env: Option<&str>) -> String {
        match env {
            Some(env) => format!("service:{service},env:{env}"),
            None => format!("service:{service}"),
        }
    }

    fn keep(low: u64, rate: Rate) -> bool {
        knuth_hash(low) <= rate.max_id_threshold()
    }
}

impl TraceSampler for DefaultTraceSampler {
    fn decide(&self, root: &SpanData) -> SamplingDecision {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matcher.matches(root)) {
            let sampled = Self::keep(root.trace_id.low, rule.rate);
            if !sampled {
                return SamplingDecision {
                    priority: SamplingPriority::UserDrop,
                    mechanism: mechanism::LOCAL_USER_RULE,
                    origin: Origin::Rule,
                    configured_rate: Some(rule.rate.value()),
                    limiter_effective_rate: None,
                    limiter_max_per_second: None,
                };
            }
            let limiter = rule.limiter.as_ref().unwrap_or(&self.limiter);
            let allowed = limiter.allow();
            let priority = if allowed {
                SamplingPriority::UserKeep
            } else {
                SamplingPriority::UserDrop
            };
            return SamplingDecision {
                priority,
                mechanism: mechanism::LOCAL_USER_RULE,
                origin: Origin::Rule,
                configured_rate: Some(rule.rate.value()),
                limiter_effective_rate: Some(limiter.effective_rate()),
                limiter_max_per_second: Some(limiter.max_per_second()),
            };
        }

        let env = root.tags.get("env").map(|s| s.as_str());
        let agent_rates = self.agent_rates.lock().unwrap();
        if let Some(rate) = agent_rates
            .get(&Self::agent_rate_key(&root.service, env))
            .or_else(|| agent_rates.get(&Self::agent_rate_key(&root.service, None)))
        {
            let priority = if Self::keep(root.trace_id.low, *rate) {
                SamplingPriority::AutoKeep
            } else {
                SamplingPriority::AutoDrop
            };
            return SamplingDecision {
                priority,
                mechanism: mechanism::AGENT_RATE,
                origin: Origin::AgentRate,
                configured_rate: Some(rate.value()),
                limiter_effective_rate: None,
                limiter_max_per_second: None,
            };
        }
        drop(agent_rates);

        let priority = if Self::keep(root.trace_id.low, self.default_rate) {
            SamplingPriority::AutoKeep
        } else {
            SamplingPriority::AutoDrop
        };
        SamplingDecision {
            priority,
            mechanism: mechanism::DEFAULT,
            origin: Origin::Default,
            configured_rate: Some(self.default_rate.value()),
            limiter_effective_rate: None,
            limiter_max_per_second: None,
        }
    }

    fn handle_collector_response(&self, rates: HashMap<String, Rate>) {
        let mut agent_rates = self.agent_rates.lock().unwrap();
        *agent_rates = rates;
    }
}

/// The trace sampler installed when APM tracing is disabled but a tracer is
/// still running for its side channels (e.g. CI visibility). Keeps exactly
/// one trace per second, via a compare-and-swap on the last-kept timestamp
/// rather than a full [`Limiter`], matching
/// `original_source/src/datadog/trace_sampler.cpp`'s `ApmDisabledTraceSampler`.
pub struct ApmDisabledTraceSampler {
    clock: std::sync::Arc<dyn Clock>,
    last_kept_nanos: AtomicU64,
    num_asked: AtomicU64,
    num_allowed: AtomicU64,
}

const ALLOWED_PER_SECOND: f64 = 1.0;

impl Default for ApmDisabledTraceSampler {
    fn default() -> Self {
        ApmDisabledTraceSampler::new(std::sync::Arc::new(SystemClock))
    }
}

impl ApmDisabledTraceSampler {
    pub fn new(clock: std::sync::Arc<dyn Clock>) -> Self {
        ApmDisabledTraceSampler {
            clock,
            last_kept_nanos: AtomicU64::new(0),
            num_asked: AtomicU64::new(0),
            num_allowed: AtomicU64::new(0),
        }
    }

    fn now_nanos(&self) -> u64 {
        let TimePoint { wall, .. } = self.clock.now();
        wall.duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    }

    pub fn effective_rate(&self) -> f64 {
        let asked = self.num_asked.load(Ordering::Relaxed);
        if asked == 0 {
            return 1.0;
        }
        (self.num_allowed.load(Ordering::Relaxed) as f64 / asked as f64).min(1.0)
    }
}

impl TraceSampler for ApmDisabledTraceSampler {
    fn decide(&self, _root: &SpanData) -> SamplingDecision {
        self.num_asked.fetch_add(1, Ordering::Relaxed);
        let now = self.now_nanos();
        let min_interval_nanos = (1_000_000_000.0 / ALLOWED_PER_SECOND) as u64;
        let previous = self.last_kept_nanos.load(Ordering::Relaxed);
        let due = now.saturating_sub(previous) >= min_interval_nanos;
        let kept = due
            && self
                .last_kept_nanos
                .compare_exchange(previous, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok();
        if kept {
            self.num_allowed.fetch_add(1, Ordering::Relaxed);
        }
        SamplingDecision {
            priority: if kept {
                SamplingPriority::UserKeep
            } else {
                SamplingPriority::UserDrop
            },
            mechanism: mechanism::MANUAL,
            origin: Origin::Manual,
            configured_rate: None,
            limiter_effective_rate: Some(self.effective_rate()),
            limiter_max_per_second: Some(ALLOWED_PER_SECOND),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_root(trace_id_low: u64, service: &str) -> SpanData {
        let mut span = SpanData::new_for_test(service, "op", "res");
        span.trace_id.low = trace_id_low;
        span
    }

    #[test]
    fn default_sampler_with_no_rules_keeps_everything() {
        let sampler = DefaultTraceSampler::new(vec![], 200.0);
        let decision = sampler.decide(&sample_root(42, "svc"));
        assert!(decision.keep());
        assert_eq!(decision.mechanism, mechanism::DEFAULT);
    }

    #[test]
    fn rule_with_zero_rate_always_drops() {
        let rule = TraceSamplerRule::new(SpanMatcher::default(), Rate::ZERO);
        let sampler = DefaultTraceSampler::new(vec![rule], 200.0);
        let decision = sampler.decide(&sample_root(1, "svc"));
        assert!(!decision.keep());
        assert_eq!(decision.mechanism, mechanism::LOCAL_USER_RULE);
    }

    #[test]
    fn apm_disabled_sampler_keeps_first_ask() {
        let sampler = ApmDisabledTraceSampler::default();
        let decision = sampler.decide(&sample_root(1, "svc"));
        assert!(decision.keep());
    }
}
