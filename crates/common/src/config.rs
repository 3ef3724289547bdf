//! Configuration management.
//!
//! Settings are loaded from configuration files and environment variables.
//!
//! ## Example Configuration
//!
//! ```toml
//! [telemetry]
//! service_name = "billing-api"
//! json_logging = true
//! log_level = "info"
//!
//! [interceptor]
//! system_field = "grpc"
//!
//! [interceptor.levels]
//! NotFound = "debug"
//! Unavailable = "warn"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub interceptor: InterceptorConfig,
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name reported by the subscriber
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable JSON logging format
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Logging interceptor configuration.
///
/// `levels` maps canonical gRPC code names (`"NotFound"`, `"Internal"`, ...)
/// to severity names and overrides the default code-to-level table for those
/// codes only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// Value of the `system` field attached to every call logger
    #[serde(default = "default_system_field")]
    pub system_field: String,

    /// Per-code severity overrides
    #[serde(default)]
    pub levels: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            json_logging: default_json_logging(),
            log_level: default_log_level(),
        }
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            system_field: default_system_field(),
            levels: HashMap::new(),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "grpc-ctxlog".to_string()
}

fn default_json_logging() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_system_field() -> String {
    "grpc".to_string()
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Whether `level` names a severity usable for a per-code override.
///
/// Accepts the same spellings as the interceptor's severity parser: any
/// case, plus `warning` for `warn`.
fn is_override_level(level: &str) -> bool {
    let level = level.to_ascii_lowercase();
    level == "warning" || VALID_LOG_LEVELS.contains(&level.as_str())
}

impl AppConfig {
    /// Load configuration from environment variables and configuration files.
    ///
    /// The configuration is loaded in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/{environment}.toml (if exists, where environment is from CTXLOG_ENV)
    /// 4. Environment variables (prefixed with CTXLOG__, nested keys split on __)
    ///
    /// Map keys from every source arrive lowercased, so per-code overrides
    /// are matched without regard to case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use grpc_ctxlog_common::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load configuration");
    /// println!("system field: {}", config.interceptor.system_field);
    /// ```
    pub fn load() -> Result<Self> {
        let env = std::env::var("CTXLOG_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Example: CTXLOG__INTERCEPTOR__SYSTEM_FIELD=rpc
            .add_source(
                config::Environment::with_prefix("CTXLOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already-built configuration source.
    pub fn from_config(config: config::Config) -> Result<Self> {
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.telemetry.service_name.is_empty() {
            anyhow::bail!("Service name is required");
        }

        if !VALID_LOG_LEVELS.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {}",
                self.telemetry.log_level,
                VALID_LOG_LEVELS.join(", ")
            );
        }

        if self.interceptor.system_field.trim().is_empty() {
            anyhow::bail!("Interceptor system field must not be empty");
        }

        for (code, level) in &self.interceptor.levels {
            if !is_override_level(level) {
                anyhow::bail!(
                    "Invalid level '{}' for code '{}'. Must be one of: {}, warning",
                    level,
                    code,
                    VALID_LOG_LEVELS.join(", ")
                );
            }
        }

        Ok(())
    }

    /// Create a development configuration with sensible defaults
    pub fn development() -> Self {
        Self {
            telemetry: TelemetryConfig {
                service_name: "grpc-ctxlog-dev".to_string(),
                json_logging: false,
                log_level: "debug".to_string(),
            },
            interceptor: InterceptorConfig {
                system_field: default_system_field(),
                levels: HashMap::new(),
            },
        }
    }

    /// Create a production configuration
    pub fn production() -> Self {
        Self {
            telemetry: TelemetryConfig {
                service_name: default_service_name(),
                json_logging: true,
                log_level: "info".to_string(),
            },
            interceptor: InterceptorConfig {
                system_field: default_system_field(),
                levels: HashMap::new(),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}
