//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use lesson_hub_core::{RetryPolicy, SharePolicy};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_AI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub public_base_url: String,
    pub media_dir: PathBuf,
    pub seed_profile_path: Option<PathBuf>,
    pub ai_api_key: Option<String>,
    pub ai_api_base: String,
    pub import_model: String,
    pub title_model: String,
    pub shortener_url: Option<String>,
    pub share_policy: SharePolicy,
    pub retry: RetryPolicy,
    pub allowed_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds the configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let var = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address = or("BIND_ADDRESS", "0.0.0.0:3000")
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let public_base_url = or("PUBLIC_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        let media_dir = PathBuf::from(or("MEDIA_DIR", "./media"));
        let seed_profile_path = var("SEED_PROFILE_PATH").map(PathBuf::from);

        // --- LLM Settings (the key is optional; import fails politely without it) ---
        let ai_api_key = var("AI_API_KEY").or_else(|| var("GEMINI_API_KEY"));
        let ai_api_base = or("AI_API_BASE", DEFAULT_AI_API_BASE);
        let import_model = or("IMPORT_MODEL", DEFAULT_MODEL);
        let title_model = or("TITLE_MODEL", DEFAULT_MODEL);

        let shortener_url = var("SHORTENER_URL");
        if let Some(template) = &shortener_url {
            if !template.contains("{url}") {
                return Err(ConfigError::InvalidValue(
                    "SHORTENER_URL".to_string(),
                    "must contain a {url} placeholder".to_string(),
                ));
            }
        }

        // --- Sharing and Sync ---
        let share_policy = match or("SHARE_POLICY", "identity").to_lowercase().as_str() {
            "identity" => SharePolicy::TrustIdentity,
            "disabled" => SharePolicy::Disabled,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SHARE_POLICY".to_string(),
                    format!("'{}' is not one of identity, disabled", other),
                ))
            }
        };

        let attempts: u32 = parse_number(&or("SYNC_RETRY_ATTEMPTS", "3"), "SYNC_RETRY_ATTEMPTS")?;
        let base_ms: u64 = parse_number(&or("SYNC_RETRY_BASE_MS", "200"), "SYNC_RETRY_BASE_MS")?;
        let retry = RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(base_ms),
        };

        let allowed_origin = or("ALLOWED_ORIGIN", "http://localhost:3000");

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            public_base_url,
            media_dir,
            seed_profile_path,
            ai_api_key,
            ai_api_base,
            import_model,
            title_model,
            shortener_url,
            share_policy,
            retry,
            allowed_origin,
        })
    }
}

fn parse_number<T>(raw: &str, name: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(vars(&[("DATABASE_URL", "postgres://localhost/hub")])).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.share_policy, SharePolicy::TrustIdentity);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.import_model, "gemini-1.5-flash");
        assert!(config.ai_api_key.is_none());
    }

    #[test]
    fn test_missing_database_url() {
        let err = Config::from_vars(HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(name) if name == "DATABASE_URL"));
    }

    #[test]
    fn test_gemini_key_fallback_and_policy() {
        let config = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/hub"),
            ("GEMINI_API_KEY", "g-key"),
            ("SHARE_POLICY", "disabled"),
            ("PUBLIC_BASE_URL", "https://hub.example/"),
        ]))
        .unwrap();
        assert_eq!(config.ai_api_key.as_deref(), Some("g-key"));
        assert_eq!(config.share_policy, SharePolicy::Disabled);
        assert_eq!(config.public_base_url, "https://hub.example");
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = [("DATABASE_URL", "postgres://localhost/hub")];
        for (name, value) in [
            ("SHARE_POLICY", "everyone"),
            ("SYNC_RETRY_ATTEMPTS", "many"),
            ("SYNC_RETRY_ATTEMPTS", "5000000000"),
            ("SHORTENER_URL", "https://short.example/api"),
            ("RUST_LOG", "loud"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((name, value));
            let err = Config::from_vars(vars(&pairs)).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(ref n, _) if n == name), "{}", name);
        }
    }

    #[test]
    fn test_retry_attempts_within_range() {
        let config = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/hub"),
            ("SYNC_RETRY_ATTEMPTS", "4294967295"),
            ("SYNC_RETRY_BASE_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(config.retry.attempts, u32::MAX);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
    }
}
