//! Agent wiring
//!
//! Builds the persisted state, request client and interception host from a
//! [`Config`] and hands them to the IPC server as one shared value.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Url;
use tracing::info;

use crate::api::{ApiBase, ApiClient};
use crate::cache::{CacheStorage, HttpFetcher};
use crate::config::Config;
use crate::session::{KeyValueStore, PersistentTokenStore, ReadMarkers, StatusNavigator};
use crate::worker::WorkerHost;

/// Everything a connection handler needs
pub struct Agent {
    pub config: Config,
    pub client: ApiClient,
    pub host: WorkerHost,
    pub markers: ReadMarkers,
    pub navigator: Arc<StatusNavigator>,
    origin: Url,
}

impl Agent {
    /// Build the agent and apply the build mode's registration policy
    pub async fn start(config: Config) -> Result<Self> {
        let origin = Url::parse(&config.origin)
            .with_context(|| format!("Invalid origin: {}", config.origin))?;
        let state = Arc::new(KeyValueStore::open(config.state_file()));

        let navigator = Arc::new(StatusNavigator::new());
        let base = ApiBase::new(&config.api_base, &config.origin)
            .with_context(|| format!("Invalid API base: {}", config.api_base))?;
        let client = ApiClient::new(
            base,
            Arc::new(PersistentTokenStore::new(Arc::clone(&state))),
            navigator.clone(),
        )
        .context("Failed to create API client")?;

        let fetcher = HttpFetcher::new(origin.clone()).context("Failed to create fetcher")?;
        let cache = CacheStorage::open_dir(&config.cache_dir).with_context(|| {
            format!("Failed to open cache directory: {}", config.cache_dir.display())
        })?;
        let host = WorkerHost::new(Arc::new(fetcher), Arc::new(cache), Arc::clone(&state));
        host.apply_build_mode(&config).await?;

        info!(
            origin = %origin,
            api_base = %client.base().as_str(),
            build = %config.build_id,
            mode = ?config.build_mode,
            authenticated = client.is_authenticated(),
            "Agent ready"
        );

        Ok(Self {
            markers: ReadMarkers::new(state),
            config,
            client,
            host,
            navigator,
            origin,
        })
    }

    /// Resolve a possibly relative resource URL against the app origin
    pub fn resource_url(&self, input: &str) -> Result<Url> {
        self.origin
            .join(input)
            .with_context(|| format!("Invalid resource URL: {}", input))
    }
}
