use gemini_realtime::{DEFAULT_ENDPOINT, DEFAULT_MODEL, GeminiLiveConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Optional: clients may bring their own key in the settings document.
    pub gemini_api_key: Option<String>,
    pub live_model: String,
    pub live_endpoint: String,
    pub setup_timeout: Duration,
    pub log_level: Level,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let live_model =
            std::env::var("GEMINI_LIVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let live_endpoint =
            std::env::var("GEMINI_LIVE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let timeout_str =
            std::env::var("GEMINI_SETUP_TIMEOUT_SECS").unwrap_or_else(|_| "15".to_string());
        let setup_timeout = match timeout_str.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(ConfigError::InvalidValue(
                    "GEMINI_SETUP_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                ));
            }
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let static_dir = std::env::var("STATIC_DIR").ok().map(PathBuf::from);

        Ok(Self {
            bind_address,
            gemini_api_key,
            live_model,
            live_endpoint,
            setup_timeout,
            log_level,
            static_dir,
        })
    }

    /// The Gemini Live connection settings derived from this configuration.
    pub fn gemini_live(&self) -> GeminiLiveConfig {
        GeminiLiveConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.live_model.clone(),
            endpoint: self.live_endpoint.clone(),
            setup_timeout: self.setup_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_LIVE_MODEL");
            env::remove_var("GEMINI_LIVE_ENDPOINT");
            env::remove_var("GEMINI_SETUP_TIMEOUT_SECS");
            env::remove_var("RUST_LOG");
            env::remove_var("STATIC_DIR");
        }
    }

    #[test]
    fn test_config_error_display() {
        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.live_model, DEFAULT_MODEL);
        assert_eq!(config.live_endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.setup_timeout, Duration::from_secs(15));
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.static_dir, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("GEMINI_API_KEY", "custom-gemini-key");
            env::set_var("GEMINI_LIVE_MODEL", "gemini-live-2.5-flash-preview");
            env::set_var("GEMINI_LIVE_ENDPOINT", "ws://127.0.0.1:9999/live");
            env::set_var("GEMINI_SETUP_TIMEOUT_SECS", "3");
            env::set_var("RUST_LOG", "debug");
            env::set_var("STATIC_DIR", "/srv/frontend/dist");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.gemini_api_key, Some("custom-gemini-key".to_string()));
        assert_eq!(config.live_model, "gemini-live-2.5-flash-preview");
        assert_eq!(config.live_endpoint, "ws://127.0.0.1:9999/live");
        assert_eq!(config.setup_timeout, Duration::from_secs(3));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.static_dir, Some(PathBuf::from("/srv/frontend/dist")));

        let live = config.gemini_live();
        assert_eq!(live.api_key.as_deref(), Some("custom-gemini-key"));
        assert_eq!(live.setup_timeout, Duration::from_secs(3));
    }

    #[test]
    #[serial]
    fn test_blank_api_key_is_treated_as_missing() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "   ");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(config.gemini_api_key, None);
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        let ConfigError::InvalidValue(var, _) = err;
        assert_eq!(var, "BIND_ADDRESS");
    }

    #[test]
    #[serial]
    fn test_config_invalid_setup_timeout() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_SETUP_TIMEOUT_SECS", "0");
        }

        let err = Config::from_env().unwrap_err();
        let ConfigError::InvalidValue(var, _) = err;
        assert_eq!(var, "GEMINI_SETUP_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        let ConfigError::InvalidValue(var, _) = err;
        assert_eq!(var, "RUST_LOG");
    }
}
