//! Shared configuration and telemetry setup for grpc-ctxlog.
//!
//! This crate provides the ambient pieces a server embedding the logging
//! interceptors needs:
//! - Configuration loading (files + environment)
//! - Tracing subscriber initialization

pub mod config;
pub mod telemetry;

pub use config::{AppConfig, InterceptorConfig, TelemetryConfig};
pub use telemetry::{init_from_config, init_tracing};

/// Common error type used throughout the crate
pub type Result<T> = std::result::Result<T, anyhow::Error>;
