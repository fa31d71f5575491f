/*!
 * Configuration types for rods-grid
 */

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GridError, GridResult};

/// Environment variable overriding the ambient environment file location
pub const ENVIRONMENT_FILE_VAR: &str = "IRODS_ENVIRONMENT_FILE";

/// Where a session takes its gateway identity from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSource {
    /// Host, port, user and zone come from `~/.irods/irods_environment.json`
    #[default]
    EnvironmentDefined,

    /// Host, port, user and zone are supplied in [`SessionOptions`]
    UserDefined,
}

/// Options used to establish a session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionOptions {
    #[serde(default)]
    pub source: ConnectionSource,

    /// Gateway hostname (required for `UserDefined`)
    #[serde(default)]
    pub host: String,

    /// Gateway TCP port (required for `UserDefined`)
    #[serde(default)]
    pub port: Option<u16>,

    /// Logical zone name (required for `UserDefined`)
    #[serde(default)]
    pub zone: String,

    /// Authenticating principal (required for `UserDefined`)
    #[serde(default)]
    pub username: String,

    /// Only needed when the gateway demands password authentication.
    /// Never written back to disk.
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
}

impl SessionOptions {
    /// Identity from the ambient environment file
    pub fn environment() -> Self {
        Self::default()
    }

    /// Fully specified identity
    pub fn user_defined(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            source: ConnectionSource::UserDefined,
            host: host.into(),
            port: Some(port),
            zone: zone.into(),
            username: username.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into().into_boxed_str()));
        self
    }

    /// Check the options before any connection attempt.
    ///
    /// `UserDefined` requires non-empty `host`, `username` and `zone` and a
    /// non-zero `port`.
    pub fn validate(&self) -> GridResult<()> {
        if self.source == ConnectionSource::EnvironmentDefined {
            return Ok(());
        }

        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if matches!(self.port, None | Some(0)) {
            missing.push("port");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.zone.trim().is_empty() {
            missing.push("zone");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(GridError::InvalidConfig {
                message: format!("user-defined session requires {}", missing.join(", ")),
            })
        }
    }

    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> GridResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: SessionOptions = toml::from_str(&contents)?;
        Ok(options)
    }

    /// Save options to a TOML file (without the password)
    pub fn to_file(&self, path: &Path) -> GridResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Identity read from `irods_environment.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientEnv {
    #[serde(rename = "irods_host")]
    pub host: String,

    #[serde(rename = "irods_port")]
    pub port: u16,

    #[serde(rename = "irods_user_name")]
    pub username: String,

    #[serde(rename = "irods_zone_name")]
    pub zone: String,
}

impl AmbientEnv {
    /// `$IRODS_ENVIRONMENT_FILE`, or `$HOME/.irods/irods_environment.json`
    pub fn default_path() -> GridResult<PathBuf> {
        if let Some(path) = std::env::var_os(ENVIRONMENT_FILE_VAR) {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(".irods").join("irods_environment.json"))
            .ok_or_else(|| GridError::InvalidConfig {
                message: "cannot locate home directory for ambient environment".to_string(),
            })
    }

    pub fn load(path: &Path) -> GridResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| GridError::InvalidConfig {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let env: AmbientEnv = serde_json::from_str(&contents)?;
        Ok(env)
    }

    pub fn load_default() -> GridResult<Self> {
        Self::load(&Self::default_path()?)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout); file output is JSON
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for `log_level = debug`
    #[serde(default)]
    pub verbose: bool,
}
