//! Span-level sampling, applied to individual spans within a trace chunk
//! that the trace sampler decided to drop, grounded on
//! `original_source/src/datadog/span_sampler.cpp`.

use crate::rate::Rate;
use crate::sampling::decision::mechanism;
use crate::sampling::{knuth_hash, limiter::Limiter};
use crate::span_data::SpanData;
use crate::span_matcher::SpanMatcher;

/// A single `DD_SPAN_SAMPLING_RULES` entry.
pub struct SpanSamplerRule {
    pub matcher: SpanMatcher,
    pub rate: Rate,
    pub limiter: Option<Limiter>,
}

impl SpanSamplerRule {
    pub fn new(matcher: SpanMatcher, rate: Rate) -> Self {
        SpanSamplerRule {
            matcher,
            rate,
            limiter: None,
        }
    }

    pub fn with_max_per_second(mut self, max_per_second: f64) -> Self {
        self.limiter = Some(Limiter::new(max_per_second));
        self
    }

    /// Evaluates this rule against `span`. `Some(outcome)` means the span
    /// should be kept and carries the mechanism/rate/limit to tag onto it
    /// (`_dd.span_sampling.mechanism` / `_dd.span_sampling.rule_rate` /
    /// `_dd.span_sampling.max_per_second`); `None` means this rule does not
    /// apply or rejected the span.
    pub fn decide(&self, span: &SpanData) -> Option<SpanSamplingOutcome> {
        if !self.matcher.matches(span) {
            return None;
        }
        if knuth_hash(span.span_id.value()) >= self.rate.max_id_threshold() {
            return None;
        }
        if let Some(limiter) = &self.limiter {
            if !limiter.allow() {
                return None;
            }
        }
        Some(SpanSamplingOutcome {
            mechanism: mechanism::SPAN_SAMPLING_RULE,
            rule_rate: self.rate.value(),
            max_per_second: self.limiter.as_ref().map(Limiter::max_per_second),
        })
    }
}

/// What kept a span under span-level sampling, and the rate/limit to tag
/// it with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanSamplingOutcome {
    pub mechanism: i64,
    pub rule_rate: f64,
    pub max_per_second: Option<f64>,
}

/// Evaluates `rules` in order against every span of a dropped trace chunk,
/// keeping the first rule that matches each span.
pub struct SpanSampler {
    pub rules: Vec<SpanSamplerRule>,
}

impl SpanSampler {
    pub fn new(rules: Vec<SpanSamplerRule>) -> Self {
        SpanSampler { rules }
    }

    pub fn decide(&self, span: &SpanData) -> Option<SpanSamplingOutcome> {
        self.rules.iter().find_map(|rule| rule.decide(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rules_never_keeps() {
        let sampler = SpanSampler::new(vec![]);
        assert_eq!(sampler.decide(&SpanData::new_for_test("s", "o", "r")), None);
    }

    #[test]
    fn matching_rule_with_full_rate_keeps() {
        let rule = SpanSamplerRule::new(SpanMatcher::default(), Rate::ONE);
        let sampler = SpanSampler::new(vec![rule]);
        assert_eq!(
            sampler.decide(&SpanData::new_for_test("s", "o", "r")),
            Some(SpanSamplingOutcome {
                mechanism: mechanism::SPAN_SAMPLING_RULE,
                rule_rate: 1.0,
                max_per_second: None,
            })
        );
    }

    #[test]
    fn matching_rule_with_zero_rate_drops() {
        let rule = SpanSamplerRule::new(SpanMatcher::default(), Rate::ZERO);
        let sampler = SpanSampler::new(vec![rule]);
        assert_eq!(sampler.decide(&SpanData::new_for_test("s", "o", "r")), None);
    }
}
