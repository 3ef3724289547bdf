//! Logging interceptor for gRPC calls
//!
//! Every call gets a logger carrying `system`, `grpc.service` and
//! `grpc.method`, attached to the context the handler runs with. When the
//! handler returns, the logger is read back from that context, so anything the
//! handler added shows up on the single `finished ... call` record.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Code, Request, Response, Status};
use tracing::debug;

use crate::classifier::code_name;
use crate::context::CallContext;
use crate::ctxlog;
use crate::logger::{CallLogger, Field};
use crate::method::{MethodInfo, StreamServerInfo, UnaryServerInfo};
use crate::options::InterceptorOptions;
use crate::stream::{ServerStream, WrappedServerStream};
use crate::transport::{merge_metadata, request_context, ChannelServerStream, ServiceStream, StreamFraming};

pub const UNARY_FINISHED: &str = "finished unary call";
pub const STREAM_FINISHED: &str = "finished streaming call";

/// Logging interceptor
#[derive(Clone, Debug)]
pub struct LoggingInterceptor {
    logger: CallLogger,
    options: Arc<InterceptorOptions>,
}

impl LoggingInterceptor {
    /// Create an interceptor deriving every call logger from `logger`.
    pub fn new(logger: CallLogger, options: InterceptorOptions) -> Self {
        Self {
            logger,
            options: Arc::new(options),
        }
    }

    pub fn logger(&self) -> &CallLogger {
        &self.logger
    }

    pub fn options(&self) -> &InterceptorOptions {
        &self.options
    }

    /// Run a unary handler with a call logger attached to its context.
    ///
    /// The handler's result is returned untouched.
    pub async fn unary<Req, Resp, E, H, Fut>(
        &self,
        ctx: CallContext,
        request: Req,
        info: &UnaryServerInfo,
        handler: H,
    ) -> Result<Resp, E>
    where
        H: FnOnce(CallContext, Req) -> Fut,
        Fut: Future<Output = Result<Resp, E>>,
        E: Error + 'static,
    {
        let start = Instant::now();
        let call_ctx = self.new_context_for_call(&ctx, &info.full_method);

        let result = handler(call_ctx.clone(), request).await;

        let err = result.as_ref().err().map(|e| e as &(dyn Error + 'static));
        self.finish(&call_ctx, UNARY_FINISHED, err, start);
        result
    }

    /// Run a streaming handler over a stream whose `context()` carries the
    /// call logger.
    pub async fn stream<Srv, S, E, H, Fut>(
        &self,
        srv: Srv,
        stream: S,
        info: &StreamServerInfo,
        handler: H,
    ) -> Result<(), E>
    where
        S: ServerStream,
        H: FnOnce(Srv, WrappedServerStream<S>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Error + 'static,
    {
        let start = Instant::now();
        let call_ctx = self.new_context_for_call(stream.context(), &info.full_method);
        let wrapped = WrappedServerStream::new(stream).with_context(call_ctx.clone());

        let result = handler(srv, wrapped).await;

        let err = result.as_ref().err().map(|e| e as &(dyn Error + 'static));
        self.finish(&call_ctx, STREAM_FINISHED, err, start);
        result
    }

    /// Unary wrapper for a tonic service method.
    ///
    /// The handler finds the enriched context in the request extensions, see
    /// [`request_context`] and [`ctxlog::from_request`].
    pub async fn serve_unary<Req, Resp, H, Fut>(
        &self,
        request: Request<Req>,
        handler: H,
    ) -> Result<Response<Resp>, Status>
    where
        H: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let info = UnaryServerInfo::from_request(&request);
        let ctx = request_context(&request);

        self.unary(ctx, request, &info, |call_ctx, mut request: Request<Req>| {
            request.extensions_mut().insert(call_ctx);
            handler(request)
        })
        .await
    }

    /// Streaming wrapper for a tonic service method.
    ///
    /// The call runs on its own task. Messages the handler sends reach the
    /// client through the returned stream, and a failing handler's status is
    /// delivered as the final item. The call is logged as bidirectional.
    ///
    /// Resolves once the handler has sent its headers, either explicitly or
    /// with the first message, or has finished; the headers become the
    /// response metadata. Trailers ride on the final status, which carries
    /// `Code::Ok` when the handler succeeded after setting any. The handler's
    /// context is cancelled when the client drops the response stream or the
    /// `grpc-timeout` deadline passes.
    pub async fn serve_streaming<In, Out, S, H, Fut>(
        &self,
        request: Request<S>,
        capacity: usize,
        handler: H,
    ) -> Response<ServiceStream<Out>>
    where
        In: Send + 'static,
        Out: Send + 'static,
        S: futures::Stream<Item = Result<In, Status>> + Send + 'static,
        H: FnOnce(WrappedServerStream<ChannelServerStream<In, Out>>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let info = StreamServerInfo::from_request(&request, true, true);
        let (ctx, cancel) = request_context(&request).with_cancel();
        let deadline = ctx.deadline();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut stream = ChannelServerStream::new(ctx, request.into_inner(), tx.clone());
        let StreamFraming { headers, trailers } = stream.framing();
        let interceptor = self.clone();

        tokio::spawn(async move {
            let call = interceptor.stream((), stream, &info, |(), stream| handler(stream));
            tokio::pin!(call);

            let result = tokio::select! {
                result = &mut call => result,
                _ = tx.closed() => {
                    debug!(method = %info.full_method, "client went away, cancelling call");
                    cancel.cancel();
                    call.await
                }
                _ = deadline_elapsed(deadline) => {
                    cancel.cancel();
                    call.await
                }
            };

            let trailers = trailers.await.unwrap_or_else(|_| MetadataMap::new());
            let terminal = match result {
                Err(mut status) => {
                    merge_metadata(status.metadata_mut(), trailers);
                    Some(status)
                }
                Ok(()) if !trailers.is_empty() => Some(Status::with_metadata(Code::Ok, "", trailers)),
                Ok(()) => None,
            };
            if let Some(status) = terminal {
                if tx.send(Err(status)).await.is_err() {
                    debug!(method = %info.full_method, "client went away before final status");
                }
            }
        });

        let headers = headers.await.unwrap_or_else(|_| MetadataMap::new());
        let output: ServiceStream<Out> = Box::pin(ReceiverStream::new(rx));
        let mut response = Response::new(output);
        *response.metadata_mut() = headers;
        response
    }

    fn new_context_for_call(&self, ctx: &CallContext, full_method: &str) -> CallContext {
        let method = MethodInfo::parse(full_method);
        let logger = self.logger.with([
            Field::str("system", self.options.system_field()),
            Field::str("grpc.service", method.service),
            Field::str("grpc.method", method.method),
        ]);
        ctxlog::to_context(ctx, logger)
    }

    fn finish(
        &self,
        ctx: &CallContext,
        message: &str,
        err: Option<&(dyn Error + 'static)>,
        start: Instant,
    ) {
        let code = self.options.code_for(err);
        let level = self.options.level_for(code);

        let mut fields = Vec::with_capacity(3);
        if let Some(err) = err {
            fields.push(Field::error(err));
        }
        fields.push(Field::str("grpc.code", code_name(code)));
        fields.push(Field::f32("grpc.time_ms", elapsed_millis(start)));

        ctxlog::extract(ctx).emit(level, message, fields);
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new(CallLogger::tracing(), InterceptorOptions::default())
    }
}

/// Resolves once `deadline` has passed; never without one.
async fn deadline_elapsed(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Milliseconds since `start`, to the microsecond.
fn elapsed_millis(start: Instant) -> f32 {
    start.elapsed().as_micros() as f32 / 1000.0
}
