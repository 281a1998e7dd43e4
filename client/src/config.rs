use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_DEBOUNCE_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// How long a resolved status is served from cache.
    pub debounce: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("{key} must be a whole number of milliseconds")),
                None => Ok(default),
            }
        };

        Ok(Self {
            base_url: lookup("ENTITLEMENT_API_BASE_URL").unwrap_or(defaults.base_url),
            debounce: millis("ENTITLEMENT_DEBOUNCE_MS", defaults.debounce)?,
            request_timeout: millis("ENTITLEMENT_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unset_variables_use_defaults() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.debounce, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn variables_override_defaults() {
        let env = HashMap::from([
            ("ENTITLEMENT_API_BASE_URL", "https://api.example.com"),
            ("ENTITLEMENT_DEBOUNCE_MS", "500"),
        ]);

        let config =
            ClientConfig::from_lookup(|key| env.get(key).map(|value| value.to_string())).unwrap();

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.debounce, Duration::from_millis(500));
    }

    #[test]
    fn garbage_durations_are_rejected() {
        let result = ClientConfig::from_lookup(|key| {
            (key == "ENTITLEMENT_REQUEST_TIMEOUT_MS").then(|| "soon".to_string())
        });

        assert!(result.is_err());
    }
}
