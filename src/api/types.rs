//! Wire types for the auth endpoints and client status reporting

use serde::{Deserialize, Deserializer, Serialize};

use crate::session::TokenPair;

/// Deserialize an optional string, treating `""` and `null` as absent.
/// The backend has returned empty strings in place of missing tokens.
fn deserialize_non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Body of `POST auth/refresh`
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Response of `POST auth/refresh`
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub access_token: Option<String>,
    /// Present only when the backend rotates the refresh token
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    /// New pair, keeping `current_refresh` unless the backend rotated it
    pub fn into_pair(self, current_refresh: Option<String>) -> Option<TokenPair> {
        let access = self.access_token?;
        Some(TokenPair {
            access,
            refresh: self.refresh_token.or(current_refresh),
        })
    }
}

/// Body of `POST auth/login`
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub phone: &'a str,
    pub password: &'a str,
}

/// Response of `POST auth/login`
///
/// Older backend revisions named the access token `token` or `accessToken`,
/// and some send more than one spelling.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    access_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    token: Option<String>,
    #[serde(default, rename = "accessToken", deserialize_with = "deserialize_non_empty")]
    access_token_camel: Option<String>,
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    refresh_token: Option<String>,
    #[serde(default, rename = "refreshToken", deserialize_with = "deserialize_non_empty")]
    refresh_token_camel: Option<String>,
}

impl LoginResponse {
    /// First non-empty of `access_token`, `token`, `accessToken`
    pub fn into_pair(self) -> Option<TokenPair> {
        let access = self
            .access_token
            .or(self.token)
            .or(self.access_token_camel)?;
        Some(TokenPair {
            access,
            refresh: self.refresh_token.or(self.refresh_token_camel),
        })
    }
}

/// Connectivity as last observed by the request client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppStatus {
    Online,
    /// Last call got no response at all
    Offline,
    /// Last call got a 5xx
    ServerError,
}

impl AppStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            AppStatus::Online => 0,
            AppStatus::Offline => 1,
            AppStatus::ServerError => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => AppStatus::Online,
            1 => AppStatus::Offline,
            _ => AppStatus::ServerError,
        }
    }
}

/// A recent failed call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub method: String,
    pub path: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_response_rotates_when_present() {
        let json = r#"{"access_token":"new-a","refresh_token":"new-r","token_type":"bearer"}"#;
        let resp: RefreshResponse = serde_json::from_str(json).unwrap();
        let pair = resp.into_pair(Some("old-r".to_string())).unwrap();
        assert_eq!(pair, TokenPair::new("new-a", Some("new-r".to_string())));
    }

    #[test]
    fn test_refresh_response_keeps_old_refresh() {
        let json = r#"{"access_token":"new-a"}"#;
        let resp: RefreshResponse = serde_json::from_str(json).unwrap();
        let pair = resp.into_pair(Some("old-r".to_string())).unwrap();
        assert_eq!(pair.refresh.as_deref(), Some("old-r"));
    }

    #[test]
    fn test_refresh_response_without_access_is_failure() {
        for json in [r#"{}"#, r#"{"access_token":null}"#, r#"{"access_token":""}"#] {
            let resp: RefreshResponse = serde_json::from_str(json).unwrap();
            assert!(resp.into_pair(Some("r".to_string())).is_none(), "{json}");
        }
    }

    fn login(json: &str) -> Option<TokenPair> {
        serde_json::from_str::<LoginResponse>(json).unwrap().into_pair()
    }

    #[test]
    fn test_login_response_spellings() {
        assert_eq!(login(r#"{"token":"t1"}"#), Some(TokenPair::new("t1", None)));
        assert_eq!(
            login(r#"{"accessToken":"t2","refreshToken":"r2"}"#),
            Some(TokenPair::new("t2", Some("r2".to_string())))
        );
        assert_eq!(
            login(r#"{"access_token":"t3","refresh_token":"r3"}"#),
            Some(TokenPair::new("t3", Some("r3".to_string())))
        );
        assert_eq!(login(r#"{"user":{"id":1}}"#), None);
    }

    #[test]
    fn test_login_response_with_several_spellings() {
        assert_eq!(
            login(r#"{"access_token":"a","token":"a","refresh_token":"r","refreshToken":"r"}"#),
            Some(TokenPair::new("a", Some("r".to_string())))
        );
        // Empty values fall through to the next spelling
        assert_eq!(
            login(r#"{"access_token":"","token":null,"accessToken":"c"}"#),
            Some(TokenPair::new("c", None))
        );
        assert_eq!(
            login(r#"{"access_token":"first","token":"second"}"#).map(|p| p.access),
            Some("first".to_string())
        );
    }

    #[test]
    fn test_refresh_request_shape() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "r" }).unwrap();
        assert_eq!(body, serde_json::json!({ "refresh_token": "r" }));
    }
}
