//! Carry a [`CallLogger`] inside a [`CallContext`].
//!
//! The logger lives in a slot shared by every clone of the context it was
//! attached to. Handlers enrich it with [`add_fields`] or [`replace`], and
//! whoever calls [`extract`] on that same context afterwards sees the
//! enriched logger. This is how fields added deep inside a handler reach the
//! interceptor's completion record.

use parking_lot::RwLock;
use tonic::Request;

use crate::context::CallContext;
use crate::logger::{CallLogger, Field};

struct LoggerSlot(RwLock<CallLogger>);

/// Attach `logger` to a new context derived from `ctx`.
pub fn to_context(ctx: &CallContext, logger: CallLogger) -> CallContext {
    ctx.with_value(LoggerSlot(RwLock::new(logger)))
}

/// Logger attached to `ctx`, or a no-op logger when none was attached.
pub fn extract(ctx: &CallContext) -> CallLogger {
    ctx.value::<LoggerSlot>()
        .map(|slot| slot.0.read().clone())
        .unwrap_or_else(CallLogger::noop)
}

/// Swap the logger held by `ctx`'s slot for `logger`.
///
/// Returns `false` and does nothing when no logger was ever attached.
pub fn replace(ctx: &CallContext, logger: CallLogger) -> bool {
    match ctx.value::<LoggerSlot>() {
        Some(slot) => {
            *slot.0.write() = logger;
            true
        }
        None => false,
    }
}

/// Append `fields` to the logger held by `ctx`.
pub fn add_fields<I>(ctx: &CallContext, fields: I) -> bool
where
    I: IntoIterator<Item = Field>,
{
    match ctx.value::<LoggerSlot>() {
        Some(slot) => {
            let mut logger = slot.0.write();
            *logger = logger.with(fields);
            true
        }
        None => false,
    }
}

/// Logger for a tonic request whose context was stored by the interceptor.
pub fn from_request<T>(request: &Request<T>) -> CallLogger {
    request
        .extensions()
        .get::<CallContext>()
        .map(extract)
        .unwrap_or_else(CallLogger::noop)
}
