//! In-memory stand-ins for log sinks and server streams.
//!
//! Provides capture and replay without a real subscriber or transport.

use async_trait::async_trait;
use grpc_ctxlog::{CallContext, LogSink, Record, ServerStream, Severity};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::Status;

/// Log sink that keeps every record it is given
pub struct CapturingSink {
    records: Arc<RwLock<Vec<Record>>>,
    min_level: Severity,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::with_min_level(Severity::Trace)
    }

    /// Capture only records at `level` or above.
    pub fn with_min_level(level: Severity) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            min_level: level,
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.read().clone()
    }

    /// Records whose message equals `message`.
    pub fn records_with_message(&self, message: &str) -> Vec<Record> {
        self.records
            .read()
            .iter()
            .filter(|record| record.message == message)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<Record> {
        self.records.read().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.records.read().len()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl Default for CapturingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for CapturingSink {
    fn enabled(&self, level: Severity) -> bool {
        level >= self.min_level
    }

    fn write(&self, record: &Record) {
        self.records.write().push(record.clone());
    }
}

/// Server stream fed from a queue of client messages
///
/// Sent messages, headers and trailers are recorded for inspection.
pub struct MockServerStream<In, Out> {
    context: CallContext,
    inbound: VecDeque<Result<In, Status>>,
    pub sent: Vec<Out>,
    pub headers: MetadataMap,
    pub headers_sent: bool,
    pub trailers: MetadataMap,
    send_error: Option<Status>,
}

impl<In, Out> MockServerStream<In, Out> {
    pub fn new(context: CallContext) -> Self {
        Self {
            context,
            inbound: VecDeque::new(),
            sent: Vec::new(),
            headers: MetadataMap::new(),
            headers_sent: false,
            trailers: MetadataMap::new(),
            send_error: None,
        }
    }

    /// Queue client messages, delivered in order before end of stream.
    #[must_use]
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = In>) -> Self {
        self.inbound.extend(messages.into_iter().map(Ok));
        self
    }

    /// Queue a receive failure after the messages queued so far.
    #[must_use]
    pub fn with_recv_error(mut self, status: Status) -> Self {
        self.inbound.push_back(Err(status));
        self
    }

    /// Make every `send_msg` fail with `status`.
    #[must_use]
    pub fn failing_sends(mut self, status: Status) -> Self {
        self.send_error = Some(status);
        self
    }

    pub fn pending_messages(&self) -> usize {
        self.inbound.len()
    }
}

#[async_trait]
impl<In, Out> ServerStream for MockServerStream<In, Out>
where
    In: Send,
    Out: Send,
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
        self.headers = merge(std::mem::replace(&mut self.headers, MetadataMap::new()), metadata);
        Ok(())
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.set_header(metadata)?;
        self.headers_sent = true;
        Ok(())
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        self.trailers = merge(std::mem::replace(&mut self.trailers, MetadataMap::new()), metadata);
    }

    async fn send_msg(&mut self, message: Out) -> Result<(), Status> {
        if let Some(status) = &self.send_error {
            return Err(status.clone());
        }
        self.headers_sent = true;
        self.sent.push(message);
        Ok(())
    }

    async fn recv_msg(&mut self) -> Result<Option<In>, Status> {
        self.inbound.pop_front().transpose()
    }
}

fn merge(current: MetadataMap, extra: MetadataMap) -> MetadataMap {
    let mut headers = current.into_headers();
    headers.extend(extra.into_headers());
    MetadataMap::from_headers(headers)
}
