//! Interceptor policy: how outcomes become codes and codes become severities.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use grpc_ctxlog_common::InterceptorConfig;
use tonic::Code;

use crate::classifier::{default_code_to_level, default_error_to_code, parse_code_name};
use crate::error::{OptionsError, OptionsResult};
use crate::logger::Severity;

/// Maps the handler's terminal error (`None` on success) to a code.
///
/// Must be total: every input yields some code.
pub type CodeFn = Arc<dyn Fn(Option<&(dyn Error + 'static)>) -> Code + Send + Sync>;

/// Maps a code to the severity of the completion record.
///
/// Must be total over the code set.
pub type LevelFn = Arc<dyn Fn(Code) -> Severity + Send + Sync>;

pub const DEFAULT_SYSTEM_FIELD: &str = "grpc";

/// Immutable policy shared by every call an interceptor handles.
///
/// Builder methods apply in call order; a later call replaces an earlier one.
#[derive(Clone)]
pub struct InterceptorOptions {
    code_fn: CodeFn,
    level_fn: LevelFn,
    system_field: String,
}

impl InterceptorOptions {
    pub fn new() -> Self {
        Self {
            code_fn: Arc::new(default_error_to_code),
            level_fn: Arc::new(default_code_to_level),
            system_field: DEFAULT_SYSTEM_FIELD.to_string(),
        }
    }

    /// Replace the error-to-code function.
    #[must_use]
    pub fn with_codes<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&(dyn Error + 'static)>) -> Code + Send + Sync + 'static,
    {
        self.code_fn = Arc::new(f);
        self
    }

    /// Replace the code-to-severity function.
    #[must_use]
    pub fn with_levels<F>(mut self, f: F) -> Self
    where
        F: Fn(Code) -> Severity + Send + Sync + 'static,
    {
        self.level_fn = Arc::new(f);
        self
    }

    /// Value of the `system` field on every call logger.
    #[must_use]
    pub fn with_system_field(mut self, system: impl Into<String>) -> Self {
        self.system_field = system.into();
        self
    }

    /// Build options from configuration: the system field plus per-code
    /// severity overrides on top of the default table.
    pub fn from_config(config: &InterceptorConfig) -> OptionsResult<Self> {
        if config.system_field.trim().is_empty() {
            return Err(OptionsError::EmptySystemField);
        }

        let mut overrides = HashMap::with_capacity(config.levels.len());
        for (code, level) in &config.levels {
            overrides.insert(parse_code_name(code)? as i32, level.parse::<Severity>()?);
        }

        let options = Self::new().with_system_field(config.system_field.clone());
        if overrides.is_empty() {
            return Ok(options);
        }
        Ok(options.with_levels(move |code| {
            overrides
                .get(&(code as i32))
                .copied()
                .unwrap_or_else(|| default_code_to_level(code))
        }))
    }

    pub fn code_for(&self, err: Option<&(dyn Error + 'static)>) -> Code {
        (self.code_fn)(err)
    }

    pub fn level_for(&self, code: Code) -> Severity {
        (self.level_fn)(code)
    }

    pub fn system_field(&self) -> &str {
        &self.system_field
    }
}

impl Default for InterceptorOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterceptorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorOptions")
            .field("system_field", &self.system_field)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn test_defaults() {
        let options = InterceptorOptions::default();
        assert_eq!(options.system_field(), "grpc");
        assert_eq!(options.code_for(None), Code::Ok);
        assert_eq!(options.level_for(Code::Ok), Severity::Info);
        assert_eq!(options.level_for(Code::Internal), Severity::Error);
    }

    #[test]
    fn test_later_options_win() {
        let options = InterceptorOptions::new()
            .with_levels(|_| Severity::Debug)
            .with_levels(|_| Severity::Warn)
            .with_system_field("rpc")
            .with_system_field("grpc-internal");

        assert_eq!(options.level_for(Code::Ok), Severity::Warn);
        assert_eq!(options.system_field(), "grpc-internal");
    }

    #[test]
    fn test_custom_code_function() {
        let options = InterceptorOptions::new().with_codes(|err| match err {
            None => Code::Ok,
            Some(_) => Code::Unavailable,
        });
        let status = Status::not_found("gone");
        assert_eq!(options.code_for(Some(&status)), Code::Unavailable);
    }

    #[test]
    fn test_from_config_overrides_only_named_codes() {
        let mut config = InterceptorConfig::default();
        config.system_field = "rpc".to_string();
        config
            .levels
            .insert("NotFound".to_string(), "debug".to_string());
        config
            .levels
            .insert("Unavailable".to_string(), "warn".to_string());

        let options = InterceptorOptions::from_config(&config).unwrap();
        assert_eq!(options.system_field(), "rpc");
        assert_eq!(options.level_for(Code::NotFound), Severity::Debug);
        assert_eq!(options.level_for(Code::Unavailable), Severity::Warn);
        assert_eq!(options.level_for(Code::Internal), Severity::Error);
    }

    #[test]
    fn test_from_config_accepts_lowercased_code_names() {
        let mut config = InterceptorConfig::default();
        config
            .levels
            .insert("notfound".to_string(), "debug".to_string());
        config
            .levels
            .insert("resourceexhausted".to_string(), "warning".to_string());

        let options = InterceptorOptions::from_config(&config).unwrap();
        assert_eq!(options.level_for(Code::NotFound), Severity::Debug);
        assert_eq!(options.level_for(Code::ResourceExhausted), Severity::Warn);
    }

    #[test]
    fn test_from_config_rejects_unknown_names() {
        let mut config = InterceptorConfig::default();
        config
            .levels
            .insert("Teapot".to_string(), "info".to_string());
        assert_eq!(
            InterceptorOptions::from_config(&config).unwrap_err(),
            OptionsError::UnknownCode("Teapot".to_string())
        );

        let mut config = InterceptorConfig::default();
        config
            .levels
            .insert("Internal".to_string(), "fatal".to_string());
        assert_eq!(
            InterceptorOptions::from_config(&config).unwrap_err(),
            OptionsError::UnknownSeverity("fatal".to_string())
        );
    }

    #[test]
    fn test_from_config_rejects_empty_system_field() {
        let mut config = InterceptorConfig::default();
        config.system_field = String::new();
        assert_eq!(
            InterceptorOptions::from_config(&config).unwrap_err(),
            OptionsError::EmptySystemField
        );
    }
}
