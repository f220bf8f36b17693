//! Interception engine
//!
//! Sits between the running application and the network. Lifecycle:
//! `install` precaches the shell and activates without waiting, `activate`
//! purges every generation but the current one and claims clients, then
//! `handle_fetch` serves each request by its route class.

use std::fmt;
use std::sync::{Arc, RwLock};

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::errors::CacheError;
use super::fetch::{same_origin, Fetcher, Request, Response, ResponseKind};
use super::route::{RouteClass, RouteRules, Strategy};
use super::store::{CacheStorage, CachedEntry};

/// Prefix for generation names
const GENERATION_PREFIX: &str = "portal-cache-";

/// Shell document served when a navigation is offline
pub const SHELL_DOCUMENT: &str = "/index.html";

/// Documents fetched during install
pub const PRECACHE_URLS: &[&str] = &["/", SHELL_DOCUMENT];

/// Identifier of the build whose cache is current
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration(String);

impl CacheGeneration {
    pub fn for_build(build_id: &str) -> Self {
        Self(format!("{}{}", GENERATION_PREFIX, build_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Replaced or unregistered
    Redundant,
}

/// Static engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Origin the engine serves
    pub origin: Url,
    /// The current generation
    pub generation: CacheGeneration,
    pub rules: RouteRules,
    /// Path of the shell document used as navigation fallback
    pub shell_document: String,
    /// Paths fetched during install
    pub precache: Vec<String>,
}

impl EngineConfig {
    pub fn new(origin: Url, generation: CacheGeneration) -> Self {
        Self {
            origin,
            generation,
            rules: RouteRules::default(),
            shell_document: SHELL_DOCUMENT.to_string(),
            precache: PRECACHE_URLS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Caching network intermediary
#[derive(Clone)]
pub struct CacheEngine {
    config: Arc<EngineConfig>,
    /// Network transport
    fetcher: Arc<dyn Fetcher>,
    /// Shared generation store (owned by the host, written only by engines)
    store: Arc<CacheStorage>,
    state: Arc<RwLock<WorkerState>>,
}

impl CacheEngine {
    pub fn new(config: EngineConfig, fetcher: Arc<dyn Fetcher>, store: Arc<CacheStorage>) -> Self {
        Self {
            config: Arc::new(config),
            fetcher,
            store,
            state: Arc::new(RwLock::new(WorkerState::Parsed)),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap()
    }

    pub fn generation(&self) -> &CacheGeneration {
        &self.config.generation
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write().unwrap() = state;
        debug!(generation = %self.config.generation, state = ?state, "Engine state changed");
    }

    /// Open the current generation and precache the shell documents.
    ///
    /// Precache failures are logged and skipped; the engine is ready for
    /// activation as soon as this returns. Returns the number of documents cached.
    pub async fn install(&self) -> usize {
        self.set_state(WorkerState::Installing);
        self.store.open(self.config.generation.as_str());

        let mut cached = 0;
        for path in &self.config.precache {
            let url = match self.config.origin.join(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!(path = %path, error = %e, "Invalid precache path");
                    continue;
                }
            };

            let request = Request::get(url);
            match self.fetcher.fetch(&request).await {
                Ok(response) if self.store_if_eligible(&request, &response) => cached += 1,
                Ok(response) => {
                    warn!(url = %request.url, status = response.status.as_u16(), "Precache response not cacheable");
                }
                Err(e) => warn!(url = %request.url, error = %e, "Precache fetch failed"),
            }
        }

        self.set_state(WorkerState::Installed);
        info!(generation = %self.config.generation, cached = cached, "Engine installed");
        cached
    }

    /// Purge every generation except the current one and take control.
    ///
    /// Safe to repeat: afterwards exactly the current generation exists.
    /// Returns the number of generations deleted.
    pub async fn activate(&self) -> usize {
        self.set_state(WorkerState::Activating);

        let current = self.config.generation.as_str();
        self.store.open(current);

        let stale: Vec<String> = self
            .store
            .keys()
            .into_iter()
            .filter(|name| name != current)
            .collect();
        for name in &stale {
            self.store.delete(name);
        }

        self.set_state(WorkerState::Activated);
        info!(
            generation = current,
            purged = stale.len(),
            "Engine activated, claiming clients"
        );
        stale.len()
    }

    pub fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }

    /// Serve one intercepted request
    pub async fn handle_fetch(&self, request: Request) -> Result<Response, CacheError> {
        let class = self.config.rules.classify(&request);
        let strategy = self
            .config
            .rules
            .strategy(class, &request, &self.config.origin);
        trace!(
            method = %request.method,
            url = %request.url,
            class = ?class,
            strategy = ?strategy,
            "Intercepted request"
        );

        match strategy {
            Strategy::Bypass => self.fetcher.fetch(&request).await,
            Strategy::NetworkFirst { shell_fallback } => {
                self.network_first(&request, shell_fallback).await
            }
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        shell_fallback: bool,
    ) -> Result<Response, CacheError> {
        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_eligible(request, &response);
                return Ok(response);
            }
            Err(e) => e,
        };

        debug!(url = %request.url, error = %error, "Network failed, trying cache");
        if let Some(entry) = self.lookup(&request.cache_key()) {
            return Ok(entry.to_response());
        }
        if shell_fallback {
            if let Some(shell) = self.shell_key().and_then(|key| self.lookup(&key)) {
                debug!(url = %request.url, "Serving cached shell document");
                return Ok(shell.to_response());
            }
        }
        Err(CacheError::Unavailable(request.url.to_string()))
    }

    async fn stale_while_revalidate(&self, request: Request) -> Result<Response, CacheError> {
        if let Some(entry) = self.lookup(&request.cache_key()) {
            let engine = self.clone();
            tokio::spawn(async move { engine.revalidate(request).await });
            return Ok(entry.to_response());
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                self.store_if_eligible(&request, &response);
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset fetch failed with nothing cached");
                Err(CacheError::Unavailable(request.url.to_string()))
            }
        }
    }

    /// Background refresh of a cached asset; failures are discarded
    async fn revalidate(&self, request: Request) {
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if self.store_if_eligible(&request, &response) {
                    trace!(url = %request.url, "Revalidated cached asset");
                }
            }
            Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed, keeping stale copy"),
        }
    }

    /// Store a same-origin successful GET. Write failures never reach the caller.
    fn store_if_eligible(&self, request: &Request, response: &Response) -> bool {
        let eligible = request.method == Method::GET
            && response.status.is_success()
            && response.kind == ResponseKind::Basic
            && same_origin(&response.url, &self.config.origin)
            && self.config.rules.classify(request) != RouteClass::Api;
        if !eligible {
            trace!(url = %request.url, status = response.status.as_u16(), "Response not cacheable");
            return false;
        }

        let entry = CachedEntry::from_response(response);
        match self
            .store
            .put(self.config.generation.as_str(), &request.cache_key(), entry)
        {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Failed to cache response");
                false
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<CachedEntry>> {
        self.store.lookup(self.config.generation.as_str(), key)
    }

    fn shell_key(&self) -> Option<String> {
        let url = self.config.origin.join(&self.config.shell_document).ok()?;
        Some(Request::get(url).cache_key())
    }
}
