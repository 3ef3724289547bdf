//! Testing utilities for grpc-ctxlog
//!
//! This crate provides:
//! - A capturing log sink that records every emitted [`Record`](grpc_ctxlog::Record)
//! - An in-memory server stream for driving streaming handlers
//! - Fixtures for method names, loggers and interceptors
//!
//! # Examples
//!
//! ```
//! use grpc_ctxlog_testing::{capturing_interceptor, fixtures::SAMPLE_UNARY_METHOD};
//! use grpc_ctxlog::{CallContext, UnaryServerInfo};
//!
//! let (interceptor, sink) = capturing_interceptor();
//! let info = UnaryServerInfo::new(SAMPLE_UNARY_METHOD);
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(interceptor.unary(CallContext::background(), (), &info, |_, _| async {
//!     Ok::<_, tonic::Status>(())
//! }))
//! .unwrap();
//!
//! assert_eq!(sink.count(), 1);
//! ```

pub mod fixtures;
pub mod mocks;

// Re-export commonly used types
pub use fixtures::*;
pub use mocks::*;

// Re-export testing dependencies for convenience
pub use proptest;
