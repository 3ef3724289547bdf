//! Call-scoped structured logging for gRPC servers
//!
//! This crate attaches a structured logger to every unary and streaming call,
//! lets handlers enrich it through the call context, and writes one
//! completion record per call with the outcome code, its severity and the
//! elapsed time.

pub mod classifier;
pub mod context;
pub mod ctxlog;
pub mod error;
pub mod interceptors;
pub mod logger;
pub mod method;
pub mod options;
pub mod stream;
pub mod transport;

pub use classifier::{code_name, default_code_to_level, default_error_to_code, parse_code_name};
pub use context::CallContext;
pub use error::{OptionsError, OptionsResult};
pub use interceptors::LoggingInterceptor;
pub use logger::{CallLogger, Field, FieldFormat, FieldValue, LogSink, NoopSink, Record, Severity, TracingSink};
pub use method::{MethodInfo, StreamServerInfo, UnaryServerInfo};
pub use options::{CodeFn, InterceptorOptions, LevelFn, DEFAULT_SYSTEM_FIELD};
pub use stream::{ServerStream, WrappedServerStream};
pub use transport::{context_from_request, parse_grpc_timeout, request_context, ChannelServerStream, ServiceStream, StreamFraming};

/// Re-exported so callers can name outcome codes without depending on tonic directly.
pub use tonic::Code;
