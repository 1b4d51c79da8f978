//! Sampling decisions and the priority/mechanism vocabulary, grounded on
//! `original_source/src/datadog/sampling_decision.h` and
//! `original_source/src/datadog/sampling_priority.h`.

/// The `_sampling_priority_v1` wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPriority {
    UserDrop = -1,
    AutoDrop = 0,
    AutoKeep = 1,
    UserKeep = 2,
}

impl SamplingPriority {
    pub fn value(self) -> i8 {
        self as i8
    }

    pub fn is_keep(self) -> bool {
        matches!(self, SamplingPriority::AutoKeep | SamplingPriority::UserKeep)
    }
}

/// The `_dd.p.dm` ("decision maker") mechanism tag values, one per way a
/// trace sampling decision can be reached.
pub mod mechanism {
    pub const DEFAULT: i64 = 0;
    pub const AGENT_RATE: i64 = 1;
    pub const REMOTE_USER_RULE: i64 = 3;
    pub const MANUAL: i64 = 4;
    pub const LOCAL_USER_RULE: i64 = 3;
    pub const REMOTE_DYNAMIC_RULE: i64 = 11;
    pub const SPAN_SAMPLING_RULE: i64 = 8;
}

/// The outcome of running the trace sampler over a trace's root span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDecision {
    pub priority: SamplingPriority,
    pub mechanism: i64,
    pub origin: Origin,
    /// The rule/agent-fed rate that was consulted to reach this decision,
    /// tagged onto the trace as `_dd.rule_psr` or `_dd.agent_psr` depending
    /// on `origin`. `None` when no rate was consulted, e.g. a manual
    /// override.
    pub configured_rate: Option<f64>,
    /// The rate limiter's effective keep ratio, present only when a
    /// limiter was actually consulted for this decision. Tagged as
    /// `_dd.limit_psr`, distinct from `configured_rate` since a rule's
    /// sample rate and the limiter's actual throughput can diverge under
    /// load.
    pub limiter_effective_rate: Option<f64>,
    /// The configured ceiling of the limiter consulted, if any.
    pub limiter_max_per_second: Option<f64>,
}

/// Which subsystem produced a [`SamplingDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Rule,
    AgentRate,
    Default,
    Manual,
    Remote,
    /// A decision explicitly handed off to an external collaborator via
    /// `delegate_trace_sampling`; always a no-op in this build (see
    /// `DESIGN.md`).
    Delegated,
}

impl SamplingDecision {
    pub fn keep(self) -> bool {
        self.priority.is_keep()
    }
}
