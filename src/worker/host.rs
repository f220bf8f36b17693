//! Worker Host - Controls the interception layer lifecycle
//!
//! Registers, replaces and unregisters the cache engine, and routes fetches
//! through it once it controls clients.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::{
    CacheEngine, CacheError, CacheGeneration, CacheStorage, EngineConfig, Fetcher, Request,
    Response, WorkerState,
};
use crate::config::{BuildMode, Config};
use crate::session::KeyValueStore;

/// Path of the interception layer script
pub const WORKER_SCRIPT: &str = "/sw.js";

/// Persisted key recording the installed registration
const REGISTRATION_KEY: &str = "worker_registration";

/// Script URL for a build: every deploy is a distinct registration
pub fn script_url(build_id: &str) -> String {
    format!("{}?v={}", WORKER_SCRIPT, urlencoding::encode(build_id))
}

/// Information about the active registration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    pub script_url: String,
    pub generation: String,
    pub state: WorkerState,
}

/// An installed engine
struct Registration {
    script_url: String,
    engine: CacheEngine,
}

/// Hosts at most one cache engine
pub struct WorkerHost {
    /// Active registration
    active: RwLock<Option<Registration>>,
    /// Network used directly when no engine controls clients
    network: Arc<dyn Fetcher>,
    /// Cache storage shared by every engine generation
    store: Arc<CacheStorage>,
    /// Where the registration survives restarts
    state: Arc<KeyValueStore>,
}

impl WorkerHost {
    pub fn new(network: Arc<dyn Fetcher>, store: Arc<CacheStorage>, state: Arc<KeyValueStore>) -> Self {
        Self {
            active: RwLock::new(None),
            network,
            store,
            state,
        }
    }

    /// Register or unregister according to the build mode
    pub async fn apply_build_mode(&self, config: &Config) -> Result<()> {
        match config.build_mode {
            BuildMode::Production => {
                let origin = Url::parse(&config.origin)
                    .with_context(|| format!("Invalid origin: {}", config.origin))?;
                let engine = CacheEngine::new(
                    EngineConfig::new(origin, CacheGeneration::for_build(&config.build_id)),
                    Arc::clone(&self.network),
                    Arc::clone(&self.store),
                );
                self.register(&script_url(&config.build_id), engine).await
            }
            BuildMode::Development => {
                if self.unregister().await? {
                    info!("Development build: removed previously installed interception layer");
                }
                Ok(())
            }
        }
    }

    /// Install and activate `engine` under `script_url`.
    ///
    /// Each lifecycle phase completes before the next starts. Registering the
    /// URL that is already active is a no-op.
    pub async fn register(&self, script_url: &str, engine: CacheEngine) -> Result<()> {
        {
            let active = self.active.read().await;
            if let Some(current) = active.as_ref() {
                if current.script_url == script_url {
                    debug!(script = script_url, "Interception layer already registered");
                    return Ok(());
                }
            }
        }

        info!(script = script_url, generation = %engine.generation(), "Registering interception layer...");

        engine.install().await;
        // No waiting for the previous engine to go idle
        engine.activate().await;

        let previous = {
            let mut active = self.active.write().await;
            active.replace(Registration {
                script_url: script_url.to_string(),
                engine,
            })
        };
        if let Some(previous) = previous {
            previous.engine.mark_redundant();
            info!(script = %previous.script_url, "Replaced previous interception layer");
        }

        self.state
            .set(REGISTRATION_KEY, script_url)
            .context("Failed to persist registration")?;
        info!(script = script_url, "Interception layer active");
        Ok(())
    }

    /// Remove the registration, including one left by a previous run.
    ///
    /// Returns whether anything was registered.
    pub async fn unregister(&self) -> Result<bool> {
        let previous = self.active.write().await.take();
        let persisted = self.state.get(REGISTRATION_KEY);

        if let Some(previous) = &previous {
            previous.engine.mark_redundant();
            info!(script = %previous.script_url, "Unregistered interception layer");
        }
        if persisted.is_some() {
            self.state
                .remove(REGISTRATION_KEY)
                .context("Failed to clear persisted registration")?;
        }

        Ok(previous.is_some() || persisted.is_some())
    }

    /// Route a request through the controlling engine, or straight to the network
    pub async fn fetch(&self, request: Request) -> Result<Response, CacheError> {
        let engine = {
            let active = self.active.read().await;
            active
                .as_ref()
                .filter(|r| r.engine.state() == WorkerState::Activated)
                .map(|r| r.engine.clone())
        };

        match engine {
            Some(engine) => engine.handle_fetch(request).await,
            None => self.network.fetch(&request).await,
        }
    }

    pub async fn info(&self) -> Option<RegistrationInfo> {
        let active = self.active.read().await;
        active.as_ref().map(|r| RegistrationInfo {
            script_url: r.script_url.clone(),
            generation: r.engine.generation().to_string(),
            state: r.engine.state(),
        })
    }

    pub fn store(&self) -> &Arc<CacheStorage> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseKind;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNetwork {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(
                request.url.clone(),
                StatusCode::OK,
                format!("body of {}", request.url.path()),
                ResponseKind::Basic,
            ))
        }
    }

    fn host() -> (WorkerHost, Arc<CountingNetwork>, Arc<KeyValueStore>) {
        let network = Arc::new(CountingNetwork::default());
        let state = Arc::new(KeyValueStore::in_memory());
        let host = WorkerHost::new(network.clone(), Arc::new(CacheStorage::new()), state.clone());
        (host, network, state)
    }

    fn config(build: &str, mode: BuildMode) -> Config {
        Config::default()
            .with_origin("https://portal.test")
            .with_build(build, mode)
    }

    #[test]
    fn test_script_url_carries_version() {
        assert_eq!(script_url("42"), "/sw.js?v=42");
        assert_eq!(script_url("1.2 beta"), "/sw.js?v=1.2%20beta");
    }

    #[tokio::test]
    async fn test_production_registers_and_activates() {
        let (host, _network, state) = host();
        host.apply_build_mode(&config("b7", BuildMode::Production))
            .await
            .unwrap();

        let info = host.info().await.unwrap();
        assert_eq!(info.script_url, "/sw.js?v=b7");
        assert_eq!(info.generation, "portal-cache-b7");
        assert_eq!(info.state, WorkerState::Activated);
        assert_eq!(state.get(REGISTRATION_KEY).as_deref(), Some("/sw.js?v=b7"));
    }

    #[tokio::test]
    async fn test_same_build_is_not_reinstalled() {
        let (host, network, _state) = host();
        let cfg = config("b7", BuildMode::Production);
        host.apply_build_mode(&cfg).await.unwrap();
        let after_first = network.calls.load(Ordering::SeqCst);

        host.apply_build_mode(&cfg).await.unwrap();
        assert_eq!(network.calls.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn test_new_build_replaces_and_purges_old_generation() {
        let (host, _network, _state) = host();
        host.apply_build_mode(&config("b1", BuildMode::Production))
            .await
            .unwrap();
        host.apply_build_mode(&config("b2", BuildMode::Production))
            .await
            .unwrap();

        assert_eq!(host.store().keys(), vec!["portal-cache-b2"]);
        assert_eq!(host.info().await.unwrap().script_url, "/sw.js?v=b2");
    }

    #[tokio::test]
    async fn test_development_unregisters_previous_run() {
        let (host, _network, state) = host();
        state.set(REGISTRATION_KEY, "/sw.js?v=old").unwrap();

        host.apply_build_mode(&config("dev", BuildMode::Development))
            .await
            .unwrap();
        assert!(state.get(REGISTRATION_KEY).is_none());
        assert!(host.info().await.is_none());
        assert!(!host.unregister().await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_without_controller_goes_to_network() {
        let (host, network, _state) = host();
        let url = Url::parse("https://portal.test/assets/a.js").unwrap();

        host.fetch(Request::get(url.clone())).await.unwrap();
        host.fetch(Request::get(url)).await.unwrap();
        assert_eq!(network.calls.load(Ordering::SeqCst), 2);
        assert!(host.store().keys().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_with_controller_uses_cache() {
        let (host, _network, _state) = host();
        host.apply_build_mode(&config("b3", BuildMode::Production))
            .await
            .unwrap();
        let url = Url::parse("https://portal.test/assets/a.js").unwrap();

        let response = host.fetch(Request::get(url.clone())).await.unwrap();
        assert_eq!(response.body, b"body of /assets/a.js");
        assert!(host
            .store()
            .lookup("portal-cache-b3", &Request::get(url).cache_key())
            .is_some());
    }
}
