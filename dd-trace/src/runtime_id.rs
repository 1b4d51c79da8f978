//! Process identity tags attached to every trace segment, grounded on
//! `original_source/src/datadog/runtime_id.h` (a UUID generated once per
//! process) and the `process_id`/`runtime-id` tags it feeds into span
//! finalization.

use once_cell::sync::Lazy;
use uuid::Uuid;

/// A UUID generated once per process and reused for every trace segment's
/// `runtime-id` tag, so the backend can group spans by originating
/// process even when the host reuses PIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeId(Uuid);

static RUNTIME_ID: Lazy<RuntimeId> = Lazy::new(|| RuntimeId(Uuid::new_v4()));

impl RuntimeId {
    pub fn current() -> RuntimeId {
        *RUNTIME_ID
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The OS process id, as attached to the `process_id` tag.
pub fn process_id() -> u32 {
    std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable_within_a_process() {
        assert_eq!(RuntimeId::current(), RuntimeId::current());
    }
}
