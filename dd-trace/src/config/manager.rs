//! Holds the tracer's currently-active trace sampler and span defaults,
//! swapping them in response to remote configuration without requiring
//! every in-flight [`crate::span::Span`] to re-resolve its own copy.
//! Grounded on `original_source/src/datadog/config_manager.{h,cpp}`'s
//! `ConfigManager`.

use std::sync::{Arc, Mutex};

use crate::config::SpanDefaults;
use crate::remote_config::capability::{bit, Capabilities};
use crate::remote_config::product::Product;
use crate::remote_config::{AppliedConfig, ConfigUpdate, Listener};
use crate::sampling::trace_sampler::TraceSampler;

struct State {
    current_trace_sampler: Arc<dyn TraceSampler>,
    current_defaults: Arc<SpanDefaults>,
}

/// Owns the tracer's mutable, remotely-updatable configuration: the active
/// trace sampler and span defaults. Reverts to the statically-configured
/// defaults when remote configuration is withdrawn.
pub struct ConfigManager {
    default_trace_sampler: Arc<dyn TraceSampler>,
    default_defaults: Arc<SpanDefaults>,
    state: Mutex<State>,
}

impl ConfigManager {
    pub fn new(default_trace_sampler: Arc<dyn TraceSampler>, default_defaults: Arc<SpanDefaults>) -> Self {
        ConfigManager {
            default_trace_sampler: default_trace_sampler.clone(),
            default_defaults: default_defaults.clone(),
            state: Mutex::new(State {
                current_trace_sampler: default_trace_sampler,
                current_defaults: default_defaults,
            }),
        }
    }

    pub fn trace_sampler(&self) -> Arc<dyn TraceSampler> {
        self.state.lock().unwrap().current_trace_sampler.clone()
    }

    pub fn span_defaults(&self) -> Arc<SpanDefaults> {
        self.state.lock().unwrap().current_defaults.clone()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.current_trace_sampler = self.default_trace_sampler.clone();
        state.current_defaults = self.default_defaults.clone();
    }
}

impl Listener for ConfigManager {
    fn get_products(&self) -> Vec<Product> {
        vec![Product::ApmTracing]
    }

    fn get_capabilities(&self) -> Capabilities {
        Capabilities::new()
            .with(bit::APM_TRACING_SAMPLE_RATE)
            .with(bit::APM_TRACING_SAMPLE_RULES)
            .with(bit::APM_TRACING_CUSTOM_TAGS)
    }

    fn on_update(&self, update: &ConfigUpdate) -> Result<AppliedConfig, String> {
        let mut state = self.state.lock().unwrap();
        if let Some(sampler) = &update.trace_sampler {
            state.current_trace_sampler = sampler.clone();
        }
        if let Some(tags) = &update.extra_global_tags {
            let mut defaults = (*state.current_defaults).clone();
            defaults.tags.extend(tags.clone());
            state.current_defaults = Arc::new(defaults);
        }
        Ok(AppliedConfig)
    }

    fn on_revert(&self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::trace_sampler::DefaultTraceSampler;

    #[test]
    fn reset_restores_defaults() {
        let default_sampler: Arc<dyn TraceSampler> = Arc::new(DefaultTraceSampler::new(vec![], 100.0));
        let defaults = Arc::new(SpanDefaults {
            service: "svc".to_string(),
            ..Default::default()
        });
        let manager = ConfigManager::new(default_sampler, defaults.clone());

        let other_sampler: Arc<dyn TraceSampler> = Arc::new(DefaultTraceSampler::new(vec![], 5.0));
        manager
            .on_update(&ConfigUpdate {
                trace_sampler: Some(other_sampler),
                extra_global_tags: None,
            })
            .unwrap();
        manager.reset();
        assert!(Arc::ptr_eq(&manager.span_defaults(), &defaults));
    }
}
