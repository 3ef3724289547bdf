//! Structured call logger.
//!
//! A [`CallLogger`] is an immutable set of fields bound to a [`LogSink`].
//! Deriving a logger with [`CallLogger::with`] never changes the original;
//! it returns a new logger that carries the union of both field lists.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// Target used for every event the tracing sink emits.
pub const LOG_TARGET: &str = "grpc_ctxlog";

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    pub fn as_tracing(&self) -> tracing::Level {
        match self {
            Severity::Trace => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Info => tracing::Level::INFO,
            Severity::Warn => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            _ => Err(OptionsError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Value carried by a [`Field`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::I64(value) => Some(*value as f64),
            FieldValue::U64(value) => Some(*value as f64),
            FieldValue::F32(value) => Some(f64::from(*value)),
            FieldValue::F64(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(value) => {
                let needs_quotes = value.is_empty()
                    || value
                        .chars()
                        .any(|c| c.is_whitespace() || c == '"' || c == '=');
                if needs_quotes {
                    write!(f, "{value:?}")
                } else {
                    f.write_str(value)
                }
            }
            FieldValue::I64(value) => write!(f, "{value}"),
            FieldValue::U64(value) => write!(f, "{value}"),
            FieldValue::F32(value) => write!(f, "{value}"),
            FieldValue::F64(value) => write!(f, "{value}"),
            FieldValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// A single key/value pair attached to a logger or a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: Cow<'static, str>,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<Cow<'static, str>>, value: FieldValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn str(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self::new(key, FieldValue::Str(value.into()))
    }

    pub fn i64(key: impl Into<Cow<'static, str>>, value: i64) -> Self {
        Self::new(key, FieldValue::I64(value))
    }

    pub fn u64(key: impl Into<Cow<'static, str>>, value: u64) -> Self {
        Self::new(key, FieldValue::U64(value))
    }

    pub fn f32(key: impl Into<Cow<'static, str>>, value: f32) -> Self {
        Self::new(key, FieldValue::F32(value))
    }

    pub fn f64(key: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self::new(key, FieldValue::F64(value))
    }

    pub fn bool(key: impl Into<Cow<'static, str>>, value: bool) -> Self {
        Self::new(key, FieldValue::Bool(value))
    }

    /// `error` field holding the display form of `err`.
    pub fn error(err: &dyn std::error::Error) -> Self {
        Self::str("error", err.to_string())
    }
}

/// One emitted log line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub level: Severity,
    pub message: String,
    pub fields: Vec<Field>,
}

impl Record {
    /// Last value recorded under `key`.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .rev()
            .find(|field| field.key == key)
            .map(|field| &field.value)
    }
}

/// Where [`CallLogger`] records end up.
pub trait LogSink: Send + Sync {
    fn enabled(&self, level: Severity) -> bool;

    fn write(&self, record: &Record);
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn enabled(&self, _level: Severity) -> bool {
        false
    }

    fn write(&self, _record: &Record) {}
}

/// Field rendering used by [`TracingSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldFormat {
    /// `key=value key2="quoted value"`
    #[default]
    Logfmt,
    /// A JSON object, keys in insertion order.
    Json,
}

/// Emits records as `tracing` events under [`LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    format: FieldFormat,
}

impl TracingSink {
    pub fn new(format: FieldFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(FieldFormat::Json)
    }

    fn render(&self, fields: &[Field]) -> String {
        match self.format {
            FieldFormat::Logfmt => Logfmt(fields).to_string(),
            FieldFormat::Json => serde_json::to_string(&JsonFields(fields))
                .unwrap_or_else(|_| Logfmt(fields).to_string()),
        }
    }
}

impl LogSink for TracingSink {
    fn enabled(&self, level: Severity) -> bool {
        match level {
            Severity::Trace => tracing::enabled!(target: LOG_TARGET, tracing::Level::TRACE),
            Severity::Debug => tracing::enabled!(target: LOG_TARGET, tracing::Level::DEBUG),
            Severity::Info => tracing::enabled!(target: LOG_TARGET, tracing::Level::INFO),
            Severity::Warn => tracing::enabled!(target: LOG_TARGET, tracing::Level::WARN),
            Severity::Error => tracing::enabled!(target: LOG_TARGET, tracing::Level::ERROR),
        }
    }

    fn write(&self, record: &Record) {
        let fields = self.render(&record.fields);
        let message = record.message.as_str();
        match record.level {
            Severity::Trace => tracing::trace!(target: LOG_TARGET, fields = %fields, "{}", message),
            Severity::Debug => tracing::debug!(target: LOG_TARGET, fields = %fields, "{}", message),
            Severity::Info => tracing::info!(target: LOG_TARGET, fields = %fields, "{}", message),
            Severity::Warn => tracing::warn!(target: LOG_TARGET, fields = %fields, "{}", message),
            Severity::Error => tracing::error!(target: LOG_TARGET, fields = %fields, "{}", message),
        }
    }
}

struct Logfmt<'a>(&'a [Field]);

impl fmt::Display for Logfmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, field) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", field.key, field.value)?;
        }
        Ok(())
    }
}

struct JsonFields<'a>(&'a [Field]);

impl Serialize for JsonFields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for field in self.0 {
            map.serialize_entry(field.key.as_ref(), &field.value)?;
        }
        map.end()
    }
}

/// Structured logger carrying call-scoped fields.
#[derive(Clone)]
pub struct CallLogger {
    fields: Arc<[Field]>,
    sink: Arc<dyn LogSink>,
}

impl CallLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            fields: Arc::from(Vec::new()),
            sink,
        }
    }

    /// Logger writing to `tracing` with logfmt-rendered fields.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink::default()))
    }

    /// Logger that drops everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Derive a logger carrying `fields` after the current ones.
    #[must_use]
    pub fn with<I>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = Field>,
    {
        let merged: Vec<Field> = self.fields.iter().cloned().chain(fields).collect();
        Self {
            fields: Arc::from(merged),
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Last value bound under `key`.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .rev()
            .find(|field| field.key == key)
            .map(|field| &field.value)
    }

    pub fn is_enabled(&self, level: Severity) -> bool {
        self.sink.enabled(level)
    }

    /// Write one record with the bound fields followed by `fields`.
    pub fn emit<I>(&self, level: Severity, message: &str, fields: I)
    where
        I: IntoIterator<Item = Field>,
    {
        if !self.sink.enabled(level) {
            return;
        }
        let record = Record {
            level,
            message: message.to_string(),
            fields: self.fields.iter().cloned().chain(fields).collect(),
        };
        self.sink.write(&record);
    }

    pub fn debug(&self, message: &str) {
        self.emit(Severity::Debug, message, std::iter::empty());
    }

    pub fn info(&self, message: &str) {
        self.emit(Severity::Info, message, std::iter::empty());
    }

    pub fn warn(&self, message: &str) {
        self.emit(Severity::Warn, message, std::iter::empty());
    }

    pub fn error(&self, message: &str) {
        self.emit(Severity::Error, message, std::iter::empty());
    }
}

impl fmt::Debug for CallLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallLogger")
            .field("fields", &Logfmt(&self.fields).to_string())
            .finish_non_exhaustive()
    }
}
