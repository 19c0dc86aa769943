//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `UPMERGE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, optional)
//! 2. **Environment variables** - Variables prefixed with `UPMERGE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `UPMERGE_LIMITS__MAX_FILE_SIZE=1048576` sets the `limits.max_file_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use upmerge::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Extension**: `extension.name`, `extension.path`, `extension.mount` - where the endpoint is exposed
//! - **Limits**: `limits.max_json_size`, `limits.max_file_size`, `limits.max_total_size` - upload bounds in bytes
//! - **Authentication**: `auth.session`, `auth.proxy_header`
//! - **Security**: `secret_key`, `security.csrf_enabled`, `security.allowed_referers`
//! - **Telemetry**: `enable_otel_export`

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "UPMERGE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty (or missing) config file yields a runnable service
/// once `secret_key` is provided.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Secret used to sign session tokens and derive CSRF tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// Export traces over OTLP (configured through the standard OTEL_* variables)
    pub enable_otel_export: bool,
    pub extension: ExtensionConfig,
    pub limits: UploadLimitsConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
}

/// Where the extension is registered.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtensionConfig {
    /// Identifier the extension registers under
    pub name: String,
    /// Single path segment owned by the extension, e.g. "/mytest"
    pub path: String,
    /// Prefix under which all extensions are dispatched
    pub mount: String,
}

/// Upload size bounds, in bytes. Uploaded files are buffered in memory, so these are enforced
/// while the body streams in.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadLimitsConfig {
    /// Maximum size of the `jsondata` part
    pub max_json_size: u64,
    /// Maximum size of a single file part
    pub max_file_size: u64,
    /// Maximum size of all parts combined
    pub max_total_size: u64,
}

/// Authentication configuration for all supported auth methods.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Signed session token carried in a cookie
    pub session: SessionAuthConfig,
    /// Identity asserted by a trusted upstream proxy
    pub proxy_header: ProxyHeaderAuthConfig,
}

/// Session cookie authentication.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionAuthConfig {
    pub enabled: bool,
    /// Cookie name holding the session token
    pub cookie_name: String,
    /// Lifetime of issued session tokens
    #[serde(with = "humantime_serde")]
    pub token_expiry: Duration,
}

/// Proxy header-based authentication configuration.
///
/// Only enable this behind a proxy that strips the header from client requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderAuthConfig {
    pub enabled: bool,
    /// The name of the HTTP header containing the account identifier
    pub header_name: String,
}

/// CSRF and referrer checks applied to the pre-flight request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub csrf_enabled: bool,
    /// Request header carrying the CSRF token
    pub csrf_header: String,
    /// Hosts accepted in the Referer header
    pub allowed_referers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            secret_key: None,
            enable_otel_export: false,
            extension: ExtensionConfig::default(),
            limits: UploadLimitsConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            name: "MytestExtension".to_string(),
            path: "/mytest".to_string(),
            mount: "/service/extension".to_string(),
        }
    }
}

impl Default for UploadLimitsConfig {
    fn default() -> Self {
        Self {
            max_json_size: 1024 * 1024,       // 1 MiB
            max_file_size: 10 * 1024 * 1024,  // 10 MiB
            max_total_size: 25 * 1024 * 1024, // 25 MiB
        }
    }
}

impl Default for SessionAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "ZM_AUTH_TOKEN".to_string(),
            token_expiry: Duration::from_secs(12 * 60 * 60), // 12 hours
        }
    }
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "x-upmerge-user".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csrf_enabled: true,
            csrf_header: "x-csrf-token".to_string(),
            allowed_referers: vec!["localhost".to_string()],
        }
    }
}

impl ExtensionConfig {
    /// Full public path of the extension endpoint
    pub fn public_path(&self) -> String {
        format!("{}{}", self.mount.trim_end_matches('/'), self.path)
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.auth.session.enabled && self.secret_key.is_none() {
            return Err(Error::Internal {
                operation: "Config validation: Session authentication is enabled but secret_key is not configured. \
                 Please set UPMERGE_SECRET_KEY environment variable or add secret_key to config file."
                    .to_string(),
            });
        }

        if self.security.csrf_enabled && self.secret_key.is_none() {
            return Err(Error::Internal {
                operation: "Config validation: CSRF validation is enabled but secret_key is not configured".to_string(),
            });
        }

        let limits = &self.limits;
        if limits.max_json_size == 0 || limits.max_file_size == 0 || limits.max_total_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: upload limits must be greater than zero".to_string(),
            });
        }

        if limits.max_file_size > limits.max_total_size || limits.max_json_size > limits.max_total_size {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: per-part limits (json {}, file {}) cannot exceed max_total_size ({})",
                    limits.max_json_size, limits.max_file_size, limits.max_total_size
                ),
            });
        }

        let segment = self.extension.path.strip_prefix('/').unwrap_or_default();
        if segment.is_empty() || segment.contains('/') {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: extension.path must be a single segment like \"/mytest\", got \"{}\"",
                    self.extension.path
                ),
            });
        }

        if !self.extension.mount.starts_with('/') {
            return Err(Error::Internal {
                operation: format!("Config validation: extension.mount must start with '/', got \"{}\"", self.extension.mount),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values
            .merge(Env::prefixed("UPMERGE_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
