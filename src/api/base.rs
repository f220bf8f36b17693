//! Base address resolution
//!
//! Every call goes through one configured base. Relative inputs are joined onto
//! it, and an input that already carries the base's path prefix has that prefix
//! removed first so `/api/v1/tickets` and `tickets` land on the same URL.

use reqwest::Url;

use super::errors::ApiError;

/// Configured API base address
#[derive(Debug, Clone)]
pub struct ApiBase {
    /// Base URL without trailing slash
    root: String,
    /// Base path without surrounding slashes, e.g. `api/v1`
    prefix: String,
}

impl ApiBase {
    /// Build from a base that is either absolute or relative to `origin`
    pub fn new(base: &str, origin: &str) -> Result<Self, ApiError> {
        let url = if is_absolute(base) {
            Url::parse(base)
        } else {
            Url::parse(origin).and_then(|o| o.join(base))
        }
        .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base, e)))?;

        let prefix = url.path().trim_matches('/').to_string();
        let root = url.as_str().trim_end_matches('/').to_string();
        Ok(Self { root, prefix })
    }

    /// Resolve a caller-supplied path or URL to the final request URL
    pub fn resolve(&self, input: &str) -> Result<Url, ApiError> {
        if is_absolute(input) {
            return Url::parse(input).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", input, e)));
        }

        let mut path = input.trim_start_matches('/');
        if !self.prefix.is_empty() {
            if let Some(rest) = path.strip_prefix(self.prefix.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest.trim_start_matches('/');
                }
            }
        }

        let joined = format!("{}/{}", self.root, path);
        Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", joined, e)))
    }

    pub fn as_str(&self) -> &str {
        &self.root
    }
}

fn is_absolute(input: &str) -> bool {
    let lower = input.get(..8).unwrap_or(input).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "http://127.0.0.1:8000";

    fn base() -> ApiBase {
        ApiBase::new("/api/v1", ORIGIN).unwrap()
    }

    #[test]
    fn test_prefixed_and_bare_paths_resolve_identically() {
        let base = base();
        let expected = "http://127.0.0.1:8000/api/v1/tickets/";
        assert_eq!(base.resolve("/api/v1/tickets/").unwrap().as_str(), expected);
        assert_eq!(base.resolve("api/v1/tickets/").unwrap().as_str(), expected);
        assert_eq!(base.resolve("/tickets/").unwrap().as_str(), expected);
        assert_eq!(base.resolve("tickets/").unwrap().as_str(), expected);
    }

    #[test]
    fn test_prefix_only_stripped_on_segment_boundary() {
        let base = base();
        assert_eq!(
            base.resolve("/api/v10/items").unwrap().as_str(),
            "http://127.0.0.1:8000/api/v1/api/v10/items"
        );
        assert_eq!(
            base.resolve("/api/v1").unwrap().as_str(),
            "http://127.0.0.1:8000/api/v1/"
        );
    }

    #[test]
    fn test_absolute_input_used_as_is() {
        let base = base();
        assert_eq!(
            base.resolve("HTTPS://pay.example/checkout?id=5").unwrap().as_str(),
            "https://pay.example/checkout?id=5"
        );
    }

    #[test]
    fn test_query_preserved() {
        let base = base();
        assert_eq!(
            base.resolve("/api/v1/tickets?status=open").unwrap().as_str(),
            "http://127.0.0.1:8000/api/v1/tickets?status=open"
        );
    }

    #[test]
    fn test_absolute_base_with_trailing_slash() {
        let base = ApiBase::new("https://portal.example/api/v1/", ORIGIN).unwrap();
        assert_eq!(base.as_str(), "https://portal.example/api/v1");
        assert_eq!(
            base.resolve("/api/v1/me").unwrap().as_str(),
            "https://portal.example/api/v1/me"
        );
    }

    #[test]
    fn test_origin_only_base() {
        let base = ApiBase::new("http://127.0.0.1:8000", ORIGIN).unwrap();
        assert_eq!(
            base.resolve("/api/v1/me").unwrap().as_str(),
            "http://127.0.0.1:8000/api/v1/me"
        );
    }

    #[test]
    fn test_invalid_origin() {
        assert!(matches!(
            ApiBase::new("/api/v1", "not a url"),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
