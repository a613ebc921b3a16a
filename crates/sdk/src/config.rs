//! Configuration types for the directory client.

use std::time::Duration;
use url::Url;

/// Configuration for the directory client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the directory API. Always ends with `/` so relative
    /// endpoint paths join under it.
    pub base_url: Url,
    /// Bearer token; requests fail with a configuration error without it.
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a new configuration with the given base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Whether an API key is present and non-blank.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// `http://host/api` and `http://host/api/` both mean the `api/` prefix.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = ClientConfig::new(Url::parse("http://localhost:8080/api").unwrap());
        assert_eq!(config.base_url.as_str(), "http://localhost:8080/api/");

        let config = ClientConfig::new(Url::parse("http://localhost:8080/api/").unwrap());
        assert_eq!(config.base_url.as_str(), "http://localhost:8080/api/");
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let mut config = ClientConfig::new(Url::parse("http://localhost:8080/").unwrap());
        assert!(!config.has_api_key());

        config.api_key = Some("   ".to_string());
        assert!(!config.has_api_key());

        config.api_key = Some("sk-live".to_string());
        assert!(config.has_api_key());
    }
}
