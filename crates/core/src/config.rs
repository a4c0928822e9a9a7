//! Configuration management for the Tally client

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::session::SessionOptions;
use crate::tracing::LoggingConfig;

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Backend API configuration
    pub api: ApiSettings,

    /// Session persistence configuration
    pub session: SessionSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL every request path is appended to
    pub base_url: String,

    /// Endpoint exchanging a refresh token for a new token pair
    pub refresh_path: String,

    /// Endpoint exchanging credentials for a token pair
    pub login_path: String,

    /// Endpoint creating an account and returning a token pair
    pub signup_path: String,

    /// Endpoint notified when a session ends, if the backend has one
    #[serde(default)]
    pub logout_path: Option<String>,

    /// Request timeout in seconds; transport default when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Refresh call timeout in seconds; transport default when unset
    #[serde(default)]
    pub refresh_timeout_secs: Option<u64>,

    /// User agent sent with every request
    pub user_agent: String,
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Directory holding the persisted token pair
    pub storage_dir: PathBuf,

    /// Key (file stem) of the persisted token pair
    pub storage_key: String,

    /// Seconds before `exp` at which a token already counts as expired
    pub expiry_leeway_secs: i64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            signup_path: "/auth/signup".to_string(),
            logout_path: None,
            timeout_secs: None,
            refresh_timeout_secs: None,
            user_agent: concat!("tally-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let storage_dir = ProjectDirs::from("app", "Tally", "tally").map_or_else(
            || PathBuf::from(".tally"),
            |dirs| dirs.data_dir().to_path_buf(),
        );

        Self {
            storage_dir,
            storage_key: SessionOptions::DEFAULT_STORAGE_KEY.to_string(),
            expiry_leeway_secs: SessionOptions::DEFAULT_EXPIRY_LEEWAY_SECS,
        }
    }
}

impl SessionSettings {
    /// Session store options derived from these settings
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            storage_key: self.storage_key.clone(),
            expiry_leeway_secs: self.expiry_leeway_secs,
        }
    }
}

impl Settings {
    /// Load configuration from defaults, an optional file and `TALLY_*` environment variables
    ///
    /// Nested keys use a double underscore, e.g. `TALLY_API__BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`Settings::load`], reading environment variables from `env` instead of the process
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> CoreResult<Self> {
        let defaults = Self::default();

        let mut builder = config::Config::builder()
            // Set default values
            .set_default("api.base_url", defaults.api.base_url)?
            .set_default("api.refresh_path", defaults.api.refresh_path)?
            .set_default("api.login_path", defaults.api.login_path)?
            .set_default("api.signup_path", defaults.api.signup_path)?
            .set_default("api.user_agent", defaults.api.user_agent)?
            .set_default(
                "session.storage_dir",
                defaults.session.storage_dir.to_string_lossy().to_string(),
            )?
            .set_default("session.storage_key", defaults.session.storage_key)?
            .set_default(
                "session.expiry_leeway_secs",
                defaults.session.expiry_leeway_secs,
            )?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format.as_str())?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
