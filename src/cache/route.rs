//! Route classification
//!
//! Every intercepted request falls into exactly one [`RouteClass`], and the
//! class picks the caching [`Strategy`]. API routes always bypass the cache.

use reqwest::{Method, Url};
use serde::Serialize;

use super::fetch::{same_origin, Request, RequestMode};

/// Default API path prefix
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Default static asset path prefix (content-hashed build output)
pub const DEFAULT_ASSET_PREFIX: &str = "/assets/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteClass {
    Navigation,
    StaticAsset,
    Api,
    Other,
}

/// What the engine does with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Straight to the network, cache untouched
    Bypass,
    /// Network, falling back to the cached copy (and the shell document for navigations)
    NetworkFirst { shell_fallback: bool },
    /// Cached copy immediately, refreshed in the background
    StaleWhileRevalidate,
}

/// Path prefixes used for classification
#[derive(Debug, Clone)]
pub struct RouteRules {
    pub api_prefix: String,
    pub asset_prefix: String,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            asset_prefix: DEFAULT_ASSET_PREFIX.to_string(),
        }
    }
}

impl RouteRules {
    /// Classify by path, mode and declared Accept
    pub fn classify(&self, request: &Request) -> RouteClass {
        let path = request.url.path();

        if under_prefix(path, &self.api_prefix) {
            return RouteClass::Api;
        }
        if request.mode == RequestMode::Navigate
            || request.accept().is_some_and(|a| a.contains("text/html"))
        {
            return RouteClass::Navigation;
        }
        if under_prefix(path, &self.asset_prefix) {
            return RouteClass::StaticAsset;
        }
        RouteClass::Other
    }

    /// Pick the strategy for `request` served from `origin`
    pub fn strategy(&self, class: RouteClass, request: &Request, origin: &Url) -> Strategy {
        if class == RouteClass::Api
            || request.method != Method::GET
            || !same_origin(&request.url, origin)
        {
            return Strategy::Bypass;
        }

        match class {
            RouteClass::Navigation => Strategy::NetworkFirst {
                shell_fallback: true,
            },
            RouteClass::StaticAsset => Strategy::StaleWhileRevalidate,
            RouteClass::Other => Strategy::NetworkFirst {
                shell_fallback: false,
            },
            RouteClass::Api => Strategy::Bypass,
        }
    }
}

/// `/api` and `/api/...` are under `/api/`; `/apiary` is not
fn under_prefix(path: &str, prefix: &str) -> bool {
    let bare = prefix.trim_end_matches('/');
    if bare.is_empty() {
        return false;
    }
    path == bare
        || path
            .strip_prefix(bare)
            .is_some_and(|rest| rest.starts_with('/'))
}
