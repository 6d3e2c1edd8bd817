use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;

/// Environment variables with this prefix override values from the YAML file.
/// Nested keys are separated by `__`, e.g. `BEARER_RELAY_API__BASE_URL`.
pub const ENV_PREFIX: &str = "BEARER_RELAY_";

/// Errors raised while reading configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    pub api: ApiConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigV1 {
    /// Builds a config pointing at `base_url` with every other section defaulted.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        ConfigV1 {
            api: ApiConfig {
                base_url: base_url.into(),
                timeout_in_ms: default_api_timeout(),
            },
            renewal: RenewalConfig::default(),
            session: SessionConfig::default(),
            navigation: NavigationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if reqwest::Url::parse(&self.api.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "api.base_url '{}' is not an absolute URL",
                self.api.base_url
            )));
        }
        if !self.renewal.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "renewal.path '{}' must start with '/'",
                self.renewal.path
            )));
        }
        if self.renewal.timeout_in_ms == 0 {
            return Err(ConfigError::Invalid(
                "renewal.timeout_in_ms must be greater than zero".into(),
            ));
        }
        Ok(self)
    }
}

/// Load config from a YAML file, with environment overrides applied on top.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigV1, ConfigError> {
    let figment = Figment::new()
        .merge(Yaml::file(path.as_ref()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    extract(figment)
}

/// Parse config from an in-memory YAML document. Used by tests and embedders.
pub fn load_config_from_str(yaml: &str) -> Result<ConfigV1, ConfigError> {
    extract(Figment::new().merge(Yaml::string(yaml)))
}

fn extract(figment: Figment) -> Result<ConfigV1, ConfigError> {
    let config = figment.extract::<Config>().map_err(Box::new)?;
    match config {
        Config::ConfigV1(c) => c.validate(),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() -> Result<(), serde_json::Error> {
    let schema = schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Where the backend API lives and how long a single call may take.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_in_ms: u64,
}

/// The fixed credential-renewal call.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct RenewalConfig {
    /// Path of the renewal endpoint, relative to `api.base_url`.
    #[serde(default = "default_renewal_path")]
    pub path: String,
    /// JSON field in the renewal response holding the new bearer token.
    #[serde(default = "default_token_field")]
    pub token_field: String,
    /// A renewal still pending after this long is treated as failed.
    #[serde(default = "default_renewal_timeout")]
    pub timeout_in_ms: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        RenewalConfig {
            path: default_renewal_path(),
            token_field: default_token_field(),
            timeout_in_ms: default_renewal_timeout(),
        }
    }
}

/// Page-scoped persistence and cookie settings.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SessionConfig {
    /// Key under which the credential is mirrored.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// File backing the mirror. When unset the mirror only lives in memory.
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Name of the refresh-session cookie erased on teardown.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// `Path` the backend sets the cookie with. Eviction must use the same one.
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,
    /// `Domain` the backend sets the cookie with, if any.
    #[serde(default)]
    pub cookie_domain: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            storage_key: default_storage_key(),
            storage_path: None,
            cookie_name: default_cookie_name(),
            cookie_path: default_cookie_path(),
            cookie_domain: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct NavigationConfig {
    /// Login entry point the user is sent to when the session cannot be renewed.
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Query parameter carrying the human-readable reason.
    #[serde(default = "default_error_param")]
    pub error_param: String,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            login_path: default_login_path(),
            error_param: default_error_param(),
        }
    }
}

fn default_api_timeout() -> u64 {
    30_000
}

fn default_renewal_path() -> String {
    "/auth/refresh".to_string()
}

fn default_token_field() -> String {
    "access_token".to_string()
}

fn default_renewal_timeout() -> u64 {
    10_000
}

fn default_storage_key() -> String {
    "access_token".to_string()
}

fn default_cookie_name() -> String {
    "refresh_session".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_error_param() -> String {
    "error".to_string()
}
