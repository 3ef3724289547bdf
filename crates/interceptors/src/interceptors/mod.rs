//! gRPC interceptors for cross-cutting concerns

pub mod logging;

pub use logging::{LoggingInterceptor, STREAM_FINISHED, UNARY_FINISHED};
