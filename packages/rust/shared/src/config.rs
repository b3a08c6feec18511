//! Application configuration for itinera.
//!
//! User config lives at `~/.itinera/itinera.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ItineraError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "itinera.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".itinera";

// ---------------------------------------------------------------------------
// Config structs (matching itinera.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream chat service settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Stream interpretation settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Request defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// `[upstream]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Chat endpoint receiving the streaming POST.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Bot identifier sent with every request.
    #[serde(default)]
    pub bot_id: String,

    /// Whole-request timeout in seconds, stream included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            bot_id: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.coze.cn/v3/chat".into()
}
fn default_api_key_env() -> String {
    "COZE_API_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[stream]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// 1-based index of the answer delta that carries the complete answer.
    /// `0` disables the fast path.
    #[serde(default = "default_fast_path_delta")]
    pub fast_path_delta: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fast_path_delta: default_fast_path_delta(),
        }
    }
}

fn default_fast_path_delta() -> u32 {
    2
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Day count when the CLI gets none.
    #[serde(default = "default_days")]
    pub days: String,

    /// Traveler count when the CLI gets none.
    #[serde(default = "default_travelers")]
    pub travelers: String,

    /// Substitute the offline generator when the upstream call fails.
    #[serde(default = "default_true")]
    pub fallback_to_mock: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            travelers: default_travelers(),
            fallback_to_mock: true,
        }
    }
}

fn default_days() -> String {
    "3".into()
}
fn default_travelers() -> String {
    "1".into()
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.itinera/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ItineraError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.itinera/itinera.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ItineraError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ItineraError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ItineraError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ItineraError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ItineraError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Everything needed to open an authenticated upstream stream.
#[derive(Clone)]
pub struct Credentials {
    pub endpoint: Url,
    pub token: String,
    pub bot_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &"<redacted>")
            .field("bot_id", &self.bot_id)
            .finish()
    }
}

/// Resolve the endpoint, token, and bot id, failing with a config error if any is missing.
pub fn validate_credentials(config: &UpstreamConfig) -> Result<Credentials> {
    let endpoint = Url::parse(&config.endpoint).map_err(|e| {
        ItineraError::config(format!("invalid upstream endpoint '{}': {e}", config.endpoint))
    })?;

    let var_name = &config.api_key_env;
    let token = match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => {
            return Err(ItineraError::config(format!(
                "upstream API token not found. Set the {var_name} environment variable."
            )));
        }
    };

    if config.bot_id.trim().is_empty() {
        return Err(ItineraError::config(
            "upstream bot_id is not set. Add it under [upstream] or pass --bot-id.",
        ));
    }

    Ok(Credentials {
        endpoint,
        token,
        bot_id: config.bot_id.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("endpoint"));
        assert!(toml_str.contains("COZE_API_TOKEN"));
        assert!(toml_str.contains("fast_path_delta"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.stream.fast_path_delta, 2);
        assert_eq!(parsed.upstream.timeout_secs, 120);
        assert!(parsed.defaults.fallback_to_mock);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[upstream]
bot_id = "7350000000000"

[stream]
fast_path_delta = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.upstream.bot_id, "7350000000000");
        assert_eq!(config.upstream.api_key_env, "COZE_API_TOKEN");
        assert_eq!(config.stream.fast_path_delta, 0);
        assert_eq!(config.defaults.days, "3");
    }

    #[test]
    fn missing_token_is_config_error() {
        let config = UpstreamConfig {
            // Use a unique env var name to avoid interfering with other tests
            api_key_env: "ITINERA_TEST_NONEXISTENT_TOKEN_12345".into(),
            bot_id: "bot".into(),
            ..Default::default()
        };
        let err = validate_credentials(&config).unwrap_err();
        assert!(matches!(err, ItineraError::Config { .. }));
        assert!(err.to_string().contains("token not found"));
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let config = UpstreamConfig {
            endpoint: "not a url".into(),
            ..Default::default()
        };
        let err = validate_credentials(&config).unwrap_err();
        assert!(err.to_string().contains("invalid upstream endpoint"));
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = Credentials {
            endpoint: Url::parse("https://example.com/v3/chat").unwrap(),
            token: "secret-token".into(),
            bot_id: "bot".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("redacted"));
    }
}
