use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/";
const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws/websocket";
const MAX_PAGE_SIZE: u32 = 100;

/// Errors raised while resolving the client configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid for its format
    #[error("failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The file extension or requested output format is not supported
    #[error("unsupported configuration format `{0}`; use yaml, json or toml")]
    UnsupportedFormat(String),

    /// An environment override could not be parsed
    #[error("invalid {var} value: {message}")]
    InvalidEnv { var: &'static str, message: String },

    /// The resolved configuration failed validation
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Output format of the log subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Log level and format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive when `RUST_LOG` is not set
    pub level: String,
    /// Line format written to stderr
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// The main configuration structure for the HelpDesk client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the ticket REST API
    pub api_base_url: Url,

    /// WebSocket endpoint of the STOMP broker
    pub ws_url: Url,

    /// Tickets per page on the listing screen
    pub page_size: u32,

    /// Fixed delay between broker reconnect attempts
    pub reconnect_delay_ms: u64,

    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<Url>,
    pub ws_url: Option<Url>,
    pub page_size: Option<u32>,
}

impl ClientConfig {
    /// Generates a default configuration.
    ///
    /// # Panics
    /// Never in practice; the default URLs are compile-time constants.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default API URL is valid"),
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default broker URL is valid"),
            page_size: 5,
            reconnect_delay_ms: 5_000,
            logging: LoggingConfig::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Precedence, lowest first: defaults, file, `HELPDESK_*` environment
    /// variables (only for values the file left at their default), then
    /// `overrides`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, an
    /// environment variable is malformed, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;

        if let Some(url) = &overrides.api_base_url {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &overrides.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(size) = overrides.page_size {
            config.page_size = size;
        }

        config.api_base_url = with_trailing_slash(config.api_base_url);
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let parsed = match extension.as_str() {
            "yaml" | "yml" => serde_yml::from_str(&content).map_err(|err| err.to_string()),
            "json" => serde_json::from_str(&content).map_err(|err| err.to_string()),
            "toml" => toml::from_str(&content).map_err(|err| err.to_string()),
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        parsed.map_err(|message| ConfigError::Parse { path, message })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let defaults = Self::with_defaults();

        if self.api_base_url == defaults.api_base_url
            && let Ok(value) = env::var("HELPDESK_API_URL")
        {
            self.api_base_url = Url::parse(&value).map_err(|err| ConfigError::InvalidEnv {
                var: "HELPDESK_API_URL",
                message: err.to_string(),
            })?;
        }
        if self.ws_url == defaults.ws_url
            && let Ok(value) = env::var("HELPDESK_WS_URL")
        {
            self.ws_url = Url::parse(&value).map_err(|err| ConfigError::InvalidEnv {
                var: "HELPDESK_WS_URL",
                message: err.to_string(),
            })?;
        }
        if self.page_size == defaults.page_size
            && let Ok(value) = env::var("HELPDESK_PAGE_SIZE")
        {
            self.page_size = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "HELPDESK_PAGE_SIZE",
                message: "must be a positive number".to_string(),
            })?;
        }
        if self.reconnect_delay_ms == defaults.reconnect_delay_ms
            && let Ok(value) = env::var("HELPDESK_RECONNECT_DELAY_MS")
        {
            self.reconnect_delay_ms = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "HELPDESK_RECONNECT_DELAY_MS",
                message: "must be a number of milliseconds".to_string(),
            })?;
        }
        if self.logging.level == defaults.logging.level
            && let Ok(value) = env::var("HELPDESK_LOG_LEVEL")
        {
            self.logging.level = value;
        }
        if self.logging.format == defaults.logging.format
            && let Ok(value) = env::var("HELPDESK_LOG_FORMAT")
        {
            self.logging.format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "HELPDESK_LOG_FORMAT",
                        message: "must be `text` or `json`".to_string(),
                    });
                }
            };
        }
        Ok(())
    }

    /// Validate the complete configuration
    ///
    /// # Errors
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            errors.push(format!(
                "api_base_url must use http or https, got `{}`",
                self.api_base_url.scheme()
            ));
        }
        if !matches!(self.ws_url.scheme(), "ws" | "wss") {
            errors.push(format!(
                "ws_url must use ws or wss, got `{}`",
                self.ws_url.scheme()
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            errors.push(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            ));
        }
        if self.reconnect_delay_ms == 0 {
            errors.push("reconnect_delay_ms must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Fixed delay between push reconnect attempts.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Renders the configuration in one of the supported file formats.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for unknown formats.
    pub fn render(&self, format: &str) -> Result<String, ConfigError> {
        let rendered = match format {
            "yaml" | "yml" => serde_yml::to_string(self).map_err(|err| err.to_string()),
            "json" => serde_json::to_string_pretty(self).map_err(|err| err.to_string()),
            "toml" => toml::to_string_pretty(self).map_err(|err| err.to_string()),
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        rendered.map_err(|message| ConfigError::Parse {
            path: PathBuf::from(format!("<{format}>")),
            message,
        })
    }
}

/// `Url::join` replaces the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
