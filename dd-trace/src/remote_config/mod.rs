//! The remote configuration client: polls (via whatever transport the
//! embedding collector uses) the Datadog Agent's `/v0.7/config` endpoint
//! and dispatches updates to per-product [`Listener`]s. Grounded on
//! `original_source/src/datadog/remote_config/remote_config.{h,cpp}`'s
//! `Manager` class.

pub mod capability;
pub mod product;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use base64::Engine;
use regex::Regex;
use serde::Deserialize;

use crate::config::SpanDefaults;
use crate::error::{Error, Result};
use crate::rate::Rate;
use crate::sampling::trace_sampler::{DefaultTraceSampler, TraceSampler};
use crate::span_matcher::SpanMatcher;

use self::capability::Capabilities;
use self::product::Product;

/// What a remote configuration update asks a [`ConfigManager`] to change.
/// Deliberately a plain data struct rather than a trait object so that
/// testing doesn't need a fake listener just to inspect what was applied.
#[derive(Clone)]
pub struct ConfigUpdate {
    pub trace_sampler: Option<Arc<dyn TraceSampler>>,
    pub extra_global_tags: Option<HashMap<String, String>>,
}

/// Returned by [`Listener::on_update`] on success; currently carries no
/// data, but is a distinct type (rather than `()`) so a future field can be
/// added without changing every call site's return type.
pub struct AppliedConfig;

/// Receives updates for one remote configuration product.
/// [`crate::config::manager::ConfigManager`] is the only implementation in
/// this crate, but the trait seam lets other products (`AGENT_CONFIG`,
/// `AGENT_TASK`) be wired in independently.
pub trait Listener: Send + Sync {
    /// Products this listener subscribes to, unioned into the request
    /// payload's `client.products`.
    fn get_products(&self) -> Vec<Product>;

    /// Capabilities this listener supports, unioned into the request
    /// payload's `client.capabilities` bitmap.
    fn get_capabilities(&self) -> Capabilities;

    fn on_update(&self, update: &ConfigUpdate) -> std::result::Result<AppliedConfig, String>;
    fn on_revert(&self);

    /// Called once per processed response, after every `on_update`/
    /// `on_revert` dispatch, regardless of whether any config changed.
    fn on_post_process(&self) {}
}

/// Identifies the tracer whose updates are relevant, mirroring
/// `original_source/src/datadog/tracer_signature.h`'s use in
/// `process_response` to filter updates meant for a different
/// service/env.
#[derive(Debug, Clone)]
pub struct TracerSignature {
    pub runtime_id: String,
    pub service: String,
    pub env: String,
}

/// A config's acknowledged/error status, reported back to the backend in
/// the next request payload's `config_state`.
#[derive(Clone)]
enum ApplyState {
    Acknowledged,
    Error(String),
}

impl ApplyState {
    fn as_str(&self) -> &'static str {
        match self {
            ApplyState::Acknowledged => "acknowledged",
            ApplyState::Error(_) => "error",
        }
    }
}

struct AppliedFile {
    id: String,
    version: u64,
    product: Product,
    hash: String,
    content_len: usize,
    apply_state: ApplyState,
}

struct State {
    targets_version: u64,
    opaque_backend_state: Option<String>,
    applied: HashMap<String, AppliedFile>,
    error_message: Option<String>,
}

/// Polls and applies remote configuration. Owns no transport itself: the
/// embedding collector is responsible for actually sending
/// `make_request_payload`'s output to `/v0.7/config` and handing the
/// response body to `process_response`, matching `SPEC_FULL.md` §4's
/// separation between the collector's transport and this type's protocol
/// state machine.
pub struct RemoteConfigurationManager {
    client_id: String,
    signature: TracerSignature,
    products: Vec<Product>,
    capabilities: Capabilities,
    listeners: HashMap<Product, Arc<dyn Listener>>,
    state: Mutex<State>,
}

#[derive(Deserialize)]
struct TargetsFile {
    signed: SignedTargets,
}

#[derive(Deserialize)]
struct SignedTargets {
    targets_version: u64,
    custom: Option<TargetsCustom>,
    targets: HashMap<String, TargetMeta>,
}

#[derive(Deserialize)]
struct TargetsCustom {
    opaque_backend_state: Option<String>,
}

#[derive(Deserialize)]
struct TargetMeta {
    hashes: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ResponseBody {
    targets: String,
    #[serde(default)]
    target_files: Vec<TargetFile>,
    #[serde(default)]
    client_configs: Vec<String>,
}

#[derive(Deserialize)]
struct TargetFile {
    path: String,
    raw: String,
}

#[derive(Deserialize)]
struct ServiceTarget {
    service: String,
    env: String,
}

#[derive(Deserialize)]
struct ConfigFileContents {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    revision: Option<u64>,
    lib_config: LibConfig,
    service_target: Option<ServiceTarget>,
}

#[derive(Deserialize, Default)]
struct LibConfig {
    sampling_rate: Option<f64>,
    tracing_tags: Option<HashMap<String, String>>,
}

impl RemoteConfigurationManager {
    pub fn new(
        client_id: String,
        signature: TracerSignature,
        products: Vec<Product>,
        capabilities: Capabilities,
    ) -> Self {
        RemoteConfigurationManager {
            client_id,
            signature,
            products,
            capabilities,
            listeners: HashMap::new(),
            state: Mutex::new(State {
                targets_version: 0,
                opaque_backend_state: None,
                applied: HashMap::new(),
                error_message: None,
            }),
        }
    }

    pub fn register_listener(&mut self, product: Product, listener: Arc<dyn Listener>) {
        self.listeners.insert(product, listener);
    }

    /// Builds the JSON body POSTed to `/v0.7/config`.
    pub fn make_request_payload(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        let mut client_state = serde_json::json!({
            "root_version": 1,
            "targets_version": state.targets_version,
            "backend_client_state": state.opaque_backend_state,
        });

        if let Some(message) = &state.error_message {
            client_state["has_error"] = serde_json::json!(true);
            client_state["error"] = serde_json::json!(message);
        }

        if !state.applied.is_empty() {
            let config_states: Vec<_> = state
                .applied
                .values()
                .map(|config| {
                    let mut config_state = serde_json::json!({
                        "id": config.id,
                        "version": config.version,
                        "product": config.product.as_str(),
                        "apply_state": config.apply_state.as_str(),
                    });
                    if let ApplyState::Error(message) = &config.apply_state {
                        config_state["apply_error"] = serde_json::json!(message);
                    }
                    config_state
                })
                .collect();
            client_state["config_states"] = serde_json::json!(config_states);
        }

        let cached_target_files: Vec<_> = state
            .applied
            .iter()
            .map(|(path, config)| {
                serde_json::json!({
                    "path": path,
                    "length": config.content_len,
                    "hashes": [{"algorithm": "sha256", "hash": config.hash}],
                })
            })
            .collect();

        serde_json::json!({
            "client": {
                "id": self.client_id,
                "products": self.products.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                "capabilities": self.capabilities.to_be_bytes().to_vec(),
                "client_tracer": {
                    "runtime_id": self.signature.runtime_id,
                    "service": self.signature.service,
                    "env": self.signature.env,
                },
                "state": client_state,
            },
            "cached_target_files": cached_target_files,
        })
    }

    /// Applies one polling response, dispatching per-product updates to
    /// registered listeners and reverting any product no longer present in
    /// `client_configs`.
    pub fn process_response(&self, response_body: &[u8]) -> Result<()> {
        let response: ResponseBody = serde_json::from_slice(response_body)
            .map_err(|e| Error::RemoteConfigurationInvalidInput(e.to_string()))?;

        let decoded_targets = base64::engine::general_purpose::STANDARD
            .decode(response.targets.as_bytes())
            .map_err(|e| Error::RemoteConfigurationInvalidInput(e.to_string()))?;
        let targets: TargetsFile = serde_json::from_slice(&decoded_targets)
            .map_err(|e| Error::RemoteConfigurationInvalidInput(e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        state.error_message = None;
        state.targets_version = targets.signed.targets_version;
        state.opaque_backend_state = targets.signed.custom.and_then(|c| c.opaque_backend_state);

        if response.client_configs.is_empty() {
            if !state.applied.is_empty() {
                for listener in self.listeners.values() {
                    listener.on_revert();
                }
                state.applied.clear();
            }
            for listener in self.listeners.values() {
                listener.on_post_process();
            }
            return Ok(());
        }

        let path_pattern = Regex::new(r"^(?:datadog/\d+|employee)/([^/]+)/[^/]+/[^/]+$")
            .expect("static remote-config path pattern is valid");

        let mut still_present = HashSet::new();
        for path in &response.client_configs {
            still_present.insert(path.clone());

            let Some(captures) = path_pattern.captures(path) else {
                state.error_message = Some(format!("malformed remote config path {path:?}"));
                continue;
            };
            let Some(product) = Product::parse(&captures[1]) else {
                continue;
            };
            let Some(listener) = self.listeners.get(&product) else {
                continue;
            };

            let Some(meta) = targets.signed.targets.get(path) else {
                state.error_message = Some(format!("no target metadata for {path:?}"));
                continue;
            };
            let hash = meta.hashes.get("sha256").cloned().unwrap_or_default();
            if state.applied.get(path).map(|f| &f.hash) == Some(&hash) {
                continue; // already applied this exact content
            }

            let Some(file) = response.target_files.iter().find(|f| &f.path == path) else {
                state.error_message = Some(format!("{path:?} listed in client_configs but not in target_files"));
                continue;
            };
            let raw = match base64::engine::general_purpose::STANDARD.decode(file.raw.as_bytes()) {
                Ok(raw) => raw,
                Err(e) => {
                    state.error_message = Some(e.to_string());
                    continue;
                }
            };
            let contents: ConfigFileContents = match serde_json::from_slice(&raw) {
                Ok(contents) => contents,
                Err(e) => {
                    state.error_message = Some(e.to_string());
                    continue;
                }
            };

            let id = contents.id.clone().unwrap_or_else(|| path.clone());
            let version = contents.revision.unwrap_or(0);
            let content_len = raw.len();

            let wrong_service = contents
                .service_target
                .as_ref()
                .is_some_and(|target| target.service != self.signature.service || target.env != self.signature.env);

            let apply_state = if wrong_service {
                ApplyState::Error("Wrong service targeted".to_string())
            } else {
                let update = build_update(&contents.lib_config);
                match listener.on_update(&update) {
                    Ok(_) => ApplyState::Acknowledged,
                    Err(message) => ApplyState::Error(message),
                }
            };

            if let ApplyState::Error(message) = &apply_state {
                state.error_message = Some(message.clone());
            }

            state.applied.insert(
                path.clone(),
                AppliedFile {
                    id,
                    version,
                    product,
                    hash,
                    content_len,
                    apply_state,
                },
            );
        }

        let stale: Vec<String> = state
            .applied
            .keys()
            .filter(|path| !still_present.contains(*path))
            .cloned()
            .collect();
        if !stale.is_empty() {
            for listener in self.listeners.values() {
                listener.on_revert();
            }
            for path in stale {
                state.applied.remove(&path);
            }
        }

        for listener in self.listeners.values() {
            listener.on_post_process();
        }

        Ok(())
    }
}

fn build_update(lib_config: &LibConfig) -> ConfigUpdate {
    let trace_sampler = lib_config.sampling_rate.and_then(|rate| {
        Rate::new(rate).ok().map(|rate| {
            let rule = crate::sampling::trace_sampler::TraceSamplerRule::new(SpanMatcher::default(), rate);
            Arc::new(DefaultTraceSampler::new(vec![rule], super::config::DEFAULT_TRACE_RATE_LIMIT))
                as Arc<dyn TraceSampler>
        })
    });
    ConfigUpdate {
        trace_sampler,
        extra_global_tags: lib_config.tracing_tags.clone(),
    }
}

/// Convenience constructor for a [`TracerSignature`] from a tracer's
/// resolved defaults, used by callers that don't already have one handy.
pub fn signature_from_defaults(runtime_id: String, defaults: &SpanDefaults) -> TracerSignature {
    TracerSignature {
        runtime_id,
        service: defaults.service.clone(),
        env: defaults.env.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        updates: AtomicUsize,
        reverts: AtomicUsize,
    }

    impl Listener for CountingListener {
        fn get_products(&self) -> Vec<Product> {
            vec![Product::ApmTracing]
        }

        fn get_capabilities(&self) -> Capabilities {
            Capabilities::new()
        }

        fn on_update(&self, _update: &ConfigUpdate) -> std::result::Result<AppliedConfig, String> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(AppliedConfig)
        }

        fn on_revert(&self) {
            self.reverts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn empty_client_configs_reverts_all_listeners() {
        let mut manager = RemoteConfigurationManager::new(
            "client-1".to_string(),
            TracerSignature {
                runtime_id: "rt".to_string(),
                service: "svc".to_string(),
                env: "prod".to_string(),
            },
            vec![Product::ApmTracing],
            Capabilities::new(),
        );
        let listener = Arc::new(CountingListener {
            updates: AtomicUsize::new(0),
            reverts: AtomicUsize::new(0),
        });
        manager.register_listener(Product::ApmTracing, listener.clone());

        let targets = serde_json::json!({
            "signed": { "targets_version": 1, "targets": {} }
        });
        let body = serde_json::json!({
            "targets": base64::engine::general_purpose::STANDARD.encode(targets.to_string()),
            "target_files": [],
            "client_configs": [],
        });
        manager.process_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(listener.reverts.load(Ordering::SeqCst), 1);
    }
}
