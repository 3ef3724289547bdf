//! Server stream capability and the context-overriding proxy.
//!
//! A streaming handler asks its stream for the call context instead of
//! receiving it as a parameter, so the interceptor hands it a
//! [`WrappedServerStream`] that answers `context()` with the enriched
//! context and forwards everything else to the real stream.

use async_trait::async_trait;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::context::CallContext;

/// Operations a server-side stream exposes to a handler.
#[async_trait]
pub trait ServerStream: Send {
    /// Messages received from the client.
    type Inbound: Send;
    /// Messages sent to the client.
    type Outbound: Send;

    fn context(&self) -> &CallContext;

    /// Merge `metadata` into the headers sent with the first message.
    /// Fails once headers have gone out.
    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Send headers immediately. Fails when called twice.
    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Merge `metadata` into the trailers sent when the call ends.
    fn set_trailer(&mut self, metadata: MetadataMap);

    async fn send_msg(&mut self, message: Self::Outbound) -> Result<(), Status>;

    /// Next client message; `Ok(None)` once the client half-closes.
    async fn recv_msg(&mut self) -> Result<Option<Self::Inbound>, Status>;
}

/// Stream proxy with its own context.
#[derive(Debug)]
pub struct WrappedServerStream<S> {
    inner: S,
    context: CallContext,
}

impl<S: ServerStream> WrappedServerStream<S> {
    /// Wrap `inner`, starting from its own context.
    pub fn new(inner: S) -> Self {
        let context = inner.context().clone();
        Self { inner, context }
    }

    /// Replace the context reported by [`ServerStream::context`].
    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: ServerStream> ServerStream for WrappedServerStream<S> {
    type Inbound = S::Inbound;
    type Outbound = S::Outbound;

    fn context(&self) -> &CallContext {
        &self.context
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.set_header(metadata)
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.send_header(metadata).await
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        self.inner.set_trailer(metadata)
    }

    async fn send_msg(&mut self, message: Self::Outbound) -> Result<(), Status> {
        self.inner.send_msg(message).await
    }

    async fn recv_msg(&mut self) -> Result<Option<Self::Inbound>, Status> {
        self.inner.recv_msg().await
    }
}
