//! Glue between tonic requests/streams and [`CallContext`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use http::HeaderMap;
use tokio::sync::{mpsc, oneshot};
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

use crate::context::CallContext;
use crate::stream::ServerStream;

pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Response body type for server-streaming methods.
pub type ServiceStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Parse a `grpc-timeout` header value: up to eight ASCII digits followed by
/// one of `H`, `M`, `S`, `m`, `u`, `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Root context for an incoming tonic call.
///
/// The deadline comes from the client's `grpc-timeout` header when present
/// and well formed.
pub fn context_from_request<T>(request: &Request<T>) -> CallContext {
    let ctx = CallContext::background();
    match request
        .metadata()
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_grpc_timeout)
    {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx,
    }
}

/// Context stored on `request` by the interceptor, or a fresh root context.
pub fn request_context<T>(request: &Request<T>) -> CallContext {
    request
        .extensions()
        .get::<CallContext>()
        .cloned()
        .unwrap_or_else(|| context_from_request(request))
}

/// Receiving ends for the headers and trailers of a [`ChannelServerStream`].
#[derive(Debug)]
pub struct StreamFraming {
    /// Fires when headers go out: on `send_header`, on the first message, or
    /// when the stream is dropped without having sent either.
    pub headers: oneshot::Receiver<MetadataMap>,
    /// Fires when the stream is dropped.
    pub trailers: oneshot::Receiver<MetadataMap>,
}

/// [`ServerStream`] over an inbound message stream and an outbound channel.
///
/// Headers and trailers are recorded, and delivered through [`StreamFraming`]
/// once [`ChannelServerStream::framing`] has been called.
pub struct ChannelServerStream<In, Out> {
    context: CallContext,
    inbound: BoxStream<'static, Result<In, Status>>,
    outbound: mpsc::Sender<Result<Out, Status>>,
    headers: HeaderMap,
    headers_sent: bool,
    trailers: HeaderMap,
    header_tx: Option<oneshot::Sender<MetadataMap>>,
    trailer_tx: Option<oneshot::Sender<MetadataMap>>,
}

impl<In, Out> ChannelServerStream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new<S>(context: CallContext, inbound: S, outbound: mpsc::Sender<Result<Out, Status>>) -> Self
    where
        S: Stream<Item = Result<In, Status>> + Send + 'static,
    {
        Self {
            context,
            inbound: inbound.boxed(),
            outbound,
            headers: HeaderMap::new(),
            headers_sent: false,
            trailers: HeaderMap::new(),
            header_tx: None,
            trailer_tx: None,
        }
    }

    /// Build from a tonic request whose body is the inbound message stream.
    pub fn from_request<S>(request: Request<S>, outbound: mpsc::Sender<Result<Out, Status>>) -> Self
    where
        S: Stream<Item = Result<In, Status>> + Send + 'static,
    {
        let context = request_context(&request);
        Self::new(context, request.into_inner(), outbound)
    }
}

impl<In, Out> ChannelServerStream<In, Out> {
    /// Route headers and trailers to the returned receivers.
    ///
    /// Calling it again replaces the previous receivers.
    pub fn framing(&mut self) -> StreamFraming {
        let (header_tx, headers) = oneshot::channel();
        let (trailer_tx, trailers) = oneshot::channel();
        self.header_tx = Some(header_tx);
        self.trailer_tx = Some(trailer_tx);
        StreamFraming { headers, trailers }
    }

    pub fn headers(&self) -> MetadataMap {
        MetadataMap::from_headers(self.headers.clone())
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn trailers(&self) -> MetadataMap {
        MetadataMap::from_headers(self.trailers.clone())
    }

    fn flush_headers(&mut self) {
        self.headers_sent = true;
        if let Some(tx) = self.header_tx.take() {
            // The receiver is gone once the caller stopped waiting for headers.
            let _ = tx.send(MetadataMap::from_headers(self.headers.clone()));
        }
    }
}

impl<In, Out> Drop for ChannelServerStream<In, Out> {
    fn drop(&mut self) {
        self.flush_headers();
        if let Some(tx) = self.trailer_tx.take() {
            let _ = tx.send(MetadataMap::from_headers(std::mem::take(&mut self.trailers)));
        }
    }
}

#[async_trait]
impl<In, Out> ServerStream for ChannelServerStream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    type Inbound = In;
    type Outbound = Out;

    fn context(&self) -> &CallContext {
        &self.context
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        if self.headers_sent {
            return Err(Status::internal("headers already sent"));
        }
        self.headers.extend(metadata.into_headers());
        Ok(())
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.set_header(metadata)?;
        self.flush_headers();
        Ok(())
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        self.trailers.extend(metadata.into_headers());
    }

    async fn send_msg(&mut self, message: Out) -> Result<(), Status> {
        self.flush_headers();
        self.outbound
            .send(Ok(message))
            .await
            .map_err(|_| Status::cancelled("client stream closed"))
    }

    async fn recv_msg(&mut self) -> Result<Option<In>, Status> {
        self.inbound.next().await.transpose()
    }
}

/// Merge `extra` into `target`, keeping entries already in `target`.
pub(crate) fn merge_metadata(target: &mut MetadataMap, extra: MetadataMap) {
    let mut headers = std::mem::replace(target, MetadataMap::new()).into_headers();
    headers.extend(extra.into_headers());
    *target = MetadataMap::from_headers(headers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::WrappedServerStream;
    use futures::stream;

    #[test]
    fn test_parse_grpc_timeout_units() {
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("3S"), Some(Duration::from_secs(3)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_grpc_timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));
    }

    #[test]
    fn test_parse_grpc_timeout_rejects_malformed() {
        assert_eq!(parse_grpc_timeout(""), None);
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[test]
    fn test_context_from_request_reads_deadline() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(GRPC_TIMEOUT_HEADER, "5S".parse().unwrap());
        let ctx = context_from_request(&request);
        assert!(ctx.remaining().unwrap() <= Duration::from_secs(5));

        assert!(context_from_request(&Request::new(())).deadline().is_none());
    }

    #[test]
    fn test_request_context_prefers_extension() {
        #[derive(Debug, PartialEq)]
        struct Marker;

        let stored = CallContext::background().with_value(Marker);
        let mut request = Request::new(());
        request.extensions_mut().insert(stored);

        assert_eq!(request_context(&request).value::<Marker>(), Some(&Marker));
        assert!(request_context(&Request::new(()))
            .value::<Marker>()
            .is_none());
    }

    #[tokio::test]
    async fn test_channel_stream_round_trip() {
        let (tx, mut rx) = mpsc::channel::<Result<String, Status>>(4);
        let inbound = stream::iter(vec![Ok::<_, Status>(1_u32), Ok(2)]);
        let mut server = ChannelServerStream::new(CallContext::background(), inbound, tx);

        assert_eq!(server.recv_msg().await.unwrap(), Some(1));
        assert_eq!(server.recv_msg().await.unwrap(), Some(2));
        assert_eq!(server.recv_msg().await.unwrap(), None);

        server.send_msg("pong".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_channel_stream_inbound_error() {
        let (tx, _rx) = mpsc::channel::<Result<(), Status>>(1);
        let inbound = stream::iter(vec![Err::<u32, _>(Status::data_loss("corrupt frame"))]);
        let mut server = ChannelServerStream::new(CallContext::background(), inbound, tx);

        let err = server.recv_msg().await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::DataLoss);
    }

    #[tokio::test]
    async fn test_channel_stream_headers_and_trailers() {
        let (tx, _rx) = mpsc::channel::<Result<u32, Status>>(1);
        let mut server =
            ChannelServerStream::new(CallContext::background(), stream::empty::<Result<u32, Status>>(), tx);

        let mut header = MetadataMap::new();
        header.insert("x-shard", "7".parse().unwrap());
        server.set_header(header).unwrap();
        server.send_header(MetadataMap::new()).await.unwrap();
        assert!(server.headers_sent());
        assert!(server.set_header(MetadataMap::new()).is_err());

        let mut trailer = MetadataMap::new();
        trailer.insert("x-rows", "12".parse().unwrap());
        server.set_trailer(trailer);

        assert_eq!(server.headers().get("x-shard").unwrap().to_str().unwrap(), "7");
        assert_eq!(server.trailers().get("x-rows").unwrap().to_str().unwrap(), "12");
    }

    #[tokio::test]
    async fn test_framing_delivers_headers_on_first_message() {
        let (tx, mut rx) = mpsc::channel::<Result<u32, Status>>(2);
        let mut server =
            ChannelServerStream::new(CallContext::background(), stream::empty::<Result<String, Status>>(), tx);
        let mut framing = server.framing();

        let mut header = MetadataMap::new();
        header.insert("x-shard", "7".parse().unwrap());
        server.set_header(header).unwrap();
        assert!(framing.headers.try_recv().is_err());

        server.send_msg(1).await.unwrap();
        let headers = framing.headers.await.unwrap();
        assert_eq!(headers.get("x-shard").unwrap().to_str().unwrap(), "7");
        assert_eq!(rx.recv().await.unwrap().unwrap(), 1);

        let mut trailer = MetadataMap::new();
        trailer.insert("x-rows", "12".parse().unwrap());
        server.set_trailer(trailer);
        drop(server);

        let trailers = framing.trailers.await.unwrap();
        assert_eq!(trailers.get("x-rows").unwrap().to_str().unwrap(), "12");
    }

    #[tokio::test]
    async fn test_framing_flushes_headers_on_drop() {
        let (tx, _rx) = mpsc::channel::<Result<u32, Status>>(1);
        let mut server =
            ChannelServerStream::new(CallContext::background(), stream::empty::<Result<u32, Status>>(), tx);
        let framing = server.framing();

        let mut header = MetadataMap::new();
        header.insert("x-unsent", "yes".parse().unwrap());
        server.set_header(header).unwrap();
        drop(server);

        let headers = framing.headers.await.unwrap();
        assert_eq!(headers.get("x-unsent").unwrap().to_str().unwrap(), "yes");
        assert!(framing.trailers.await.unwrap().is_empty());
    }

    #[test]
    fn test_merge_metadata_keeps_existing_entries() {
        let mut target = MetadataMap::new();
        target.insert("x-a", "1".parse().unwrap());
        let mut extra = MetadataMap::new();
        extra.insert("x-b", "2".parse().unwrap());

        merge_metadata(&mut target, extra);
        assert_eq!(target.get("x-a").unwrap().to_str().unwrap(), "1");
        assert_eq!(target.get("x-b").unwrap().to_str().unwrap(), "2");
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_cancelled() {
        let (tx, rx) = mpsc::channel::<Result<u32, Status>>(1);
        drop(rx);
        let mut server =
            ChannelServerStream::new(CallContext::background(), stream::empty::<Result<u32, Status>>(), tx);

        let err = server.send_msg(1).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Cancelled);
    }

    #[tokio::test]
    async fn test_wrapped_stream_overrides_only_context() {
        #[derive(Debug, PartialEq)]
        struct Enriched;

        let (tx, mut rx) = mpsc::channel::<Result<u8, Status>>(2);
        let inbound = stream::iter(vec![Ok::<_, Status>("hello".to_string())]);
        let original = ChannelServerStream::new(CallContext::background(), inbound, tx);
        let enriched = original.context().with_value(Enriched);

        let mut wrapped = WrappedServerStream::new(original).with_context(enriched);
        assert_eq!(wrapped.context().value::<Enriched>(), Some(&Enriched));
        assert!(wrapped.inner().context().value::<Enriched>().is_none());

        assert_eq!(wrapped.recv_msg().await.unwrap().as_deref(), Some("hello"));
        wrapped.send_msg(5_u8).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), 5);

        let mut trailer = MetadataMap::new();
        trailer.insert("x-done", "1".parse().unwrap());
        wrapped.set_trailer(trailer);
        assert_eq!(wrapped.into_inner().trailers().get("x-done").unwrap().to_str().unwrap(), "1");
    }
}
