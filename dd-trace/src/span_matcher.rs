//! Glob matching and [`SpanMatcher`], grounded on
//! `original_source/src/datadog/span_matcher.cpp` and its `glob.h` helper.
//! Supports the small glob grammar used throughout trace/span sampling
//! rules: literal characters, `*` (any run, including empty) and `?` (any
//! single character).

use std::collections::HashMap;

use crate::span_data::SpanData;

/// Case-sensitive glob match of `pattern` against `subject`. `"*"` always
/// matches and is special-cased by callers to skip the scan entirely.
pub fn glob_match(pattern: &str, subject: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let subject: Vec<char> = subject.chars().collect();
    match_from(&pattern, &subject)
}

fn match_from(pattern: &[char], subject: &[char]) -> bool {
    // Standard glob matcher via DP over (pattern index, subject index),
    // implemented iteratively to avoid recursion depth concerns on
    // pathological patterns.
    let (p_len, s_len) = (pattern.len(), subject.len());
    let mut dp = vec![vec![false; s_len + 1]; p_len + 1];
    dp[0][0] = true;
    for pi in 1..=p_len {
        if pattern[pi - 1] == '*' {
            dp[pi][0] = dp[pi - 1][0];
        }
    }
    for pi in 1..=p_len {
        for si in 1..=s_len {
            dp[pi][si] = match pattern[pi - 1] {
                '*' => dp[pi - 1][si] || dp[pi][si - 1],
                '?' => dp[pi - 1][si - 1],
                c => dp[pi - 1][si - 1] && c == subject[si - 1],
            };
        }
    }
    dp[p_len][s_len]
}

fn is_match(pattern: &str, subject: &str) -> bool {
    pattern == "*" || glob_match(pattern, subject)
}

/// `{service, name, resource, tags}` matcher used by trace-sampler and
/// span-sampler rules. A field whose pattern is the default `"*"` always
/// matches without inspecting the span at all.
#[derive(Debug, Clone)]
pub struct SpanMatcher {
    pub service: String,
    pub name: String,
    pub resource: String,
    pub tags: HashMap<String, String>,
}

impl Default for SpanMatcher {
    fn default() -> Self {
        SpanMatcher {
            service: "*".to_string(),
            name: "*".to_string(),
            resource: "*".to_string(),
            tags: HashMap::new(),
        }
    }
}

impl SpanMatcher {
    pub fn matches(&self, span: &SpanData) -> bool {
        is_match(&self.service, &span.service)
            && is_match(&self.name, &span.name)
            && is_match(&self.resource, &span.resource)
            && self.tags.iter().all(|(name, pattern)| {
                span.tags
                    .get(name)
                    .map(|value| is_match(pattern, value))
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_anything() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn prefix_glob() {
        assert!(glob_match("a*", "alpha"));
        assert!(!glob_match("a*", "beta"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("a?pha", "alpha"));
        assert!(!glob_match("a?pha", "appppha"));
    }

    #[test]
    fn matcher_is_and_across_fields() {
        let mut span = SpanData::new_for_test("svc", "op", "res");
        span.tags.insert("http.method".to_string(), "GET".to_string());

        let matcher = SpanMatcher {
            service: "s*".to_string(),
            name: "*".to_string(),
            resource: "*".to_string(),
            tags: [("http.method".to_string(), "GET".to_string())]
                .into_iter()
                .collect(),
        };
        assert!(matcher.matches(&span));

        let mismatching = SpanMatcher {
            tags: [("http.method".to_string(), "POST".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert!(!mismatching.matches(&span));
    }
}
