//! Test fixtures for method names, loggers and interceptors.

use grpc_ctxlog::{CallLogger, InterceptorOptions, LoggingInterceptor};
use std::sync::Arc;

use crate::mocks::CapturingSink;

pub const SAMPLE_UNARY_METHOD: &str = "/helloworld.Greeter/SayHello";
pub const SAMPLE_STREAM_METHOD: &str = "/routeguide.RouteGuide/RouteChat";
pub const SAMPLE_NESTED_METHOD: &str = "/mwitkow.testproto.v1.TestService/PingList";

/// Logger writing into a fresh [`CapturingSink`]
pub fn capturing_logger() -> (CallLogger, Arc<CapturingSink>) {
    let sink = Arc::new(CapturingSink::new());
    (CallLogger::new(sink.clone()), sink)
}

/// Interceptor with default options writing into a fresh [`CapturingSink`]
pub fn capturing_interceptor() -> (LoggingInterceptor, Arc<CapturingSink>) {
    capturing_interceptor_with(InterceptorOptions::default())
}

pub fn capturing_interceptor_with(options: InterceptorOptions) -> (LoggingInterceptor, Arc<CapturingSink>) {
    let (logger, sink) = capturing_logger();
    (LoggingInterceptor::new(logger, options), sink)
}
