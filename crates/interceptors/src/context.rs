//! Per-call execution context.
//!
//! A [`CallContext`] is an immutable chain of typed values plus the call's
//! cancellation signal and deadline. Layering a value returns a new context
//! and leaves the parent untouched, so a context can be handed to nested
//! middleware and spawned tasks freely.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

/// Immutable, chainable key/value carrier for one call.
#[derive(Clone)]
pub struct CallContext {
    head: Option<Arc<Entry>>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Empty root context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            head: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context driven by a framework-supplied cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            head: None,
            cancellation: token,
            deadline: None,
        }
    }

    /// Returns a context with its own cancellation signal, plus the token
    /// that fires it.
    ///
    /// Cancelling the returned token cancels the new context only; the new
    /// context still observes cancellation of `self`.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let token = self.cancellation.child_token();
        let ctx = Self {
            head: self.head.clone(),
            cancellation: token.clone(),
            deadline: self.deadline,
        };
        (ctx, token)
    }

    /// Returns a context that additionally carries `deadline`.
    ///
    /// An earlier deadline already present on `self` is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            head: self.head.clone(),
            cancellation: self.cancellation.clone(),
            deadline: Some(deadline),
        }
    }

    /// Returns a context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a new context layering `value` on top of `self`.
    ///
    /// Lookups on the returned context see `value` for type `T`; the parent
    /// keeps whatever it had. Cancellation and deadline are inherited as is.
    #[must_use]
    pub fn with_value<T>(&self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            head: Some(Arc::new(Entry {
                value: Box::new(value),
                parent: self.head.clone(),
            })),
            cancellation: self.cancellation.clone(),
            deadline: self.deadline,
        }
    }

    /// Most recently layered value of type `T`, if any.
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        let mut current = self.head.as_deref();
        while let Some(entry) = current {
            if let Some(value) = entry.value.downcast_ref::<T>() {
                return Some(value);
            }
            current = entry.parent.as_deref();
        }
        None
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the call is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.head.as_deref();
        while let Some(entry) = current {
            depth += 1;
            current = entry.parent.as_deref();
        }
        depth
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("values", &self.depth())
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RequestId(&'static str);

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn test_background_has_no_values() {
        let ctx = CallContext::background();
        assert!(ctx.value::<RequestId>().is_none());
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_with_value_does_not_touch_parent() {
        let parent = CallContext::background();
        let child = parent.with_value(RequestId("abc"));

        assert_eq!(child.value::<RequestId>(), Some(&RequestId("abc")));
        assert!(parent.value::<RequestId>().is_none());
    }

    #[test]
    fn test_latest_value_wins_and_others_remain_visible() {
        let ctx = CallContext::background()
            .with_value(RequestId("first"))
            .with_value(Tenant("acme"))
            .with_value(RequestId("second"));

        assert_eq!(ctx.value::<RequestId>(), Some(&RequestId("second")));
        assert_eq!(ctx.value::<Tenant>(), Some(&Tenant("acme")));
    }

    #[test]
    fn test_layering_keeps_cancellation() {
        let token = CancellationToken::new();
        let root = CallContext::with_cancellation(token.clone());
        let child = root.with_value(RequestId("abc")).with_value(Tenant("acme"));

        assert!(!child.is_cancelled());
        token.cancel();
        assert!(child.is_cancelled());
        assert!(root.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancellation(token.clone()).with_value(Tenant("acme"));

        let waiter = tokio::spawn(async move { ctx.cancelled().await });
        token.cancel();
        waiter.await.unwrap();
    }

    #[test]
    fn test_with_cancel_is_scoped_to_child() {
        let parent = CallContext::background().with_value(Tenant("acme"));
        let (child, cancel) = parent.with_cancel();
        assert_eq!(child.value::<Tenant>(), Some(&Tenant("acme")));

        cancel.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let (second, _cancel) = parent.with_cancel();
        parent.cancellation_token().cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = CallContext::background().with_deadline(now + Duration::from_secs(1));
        let later = ctx.with_deadline(now + Duration::from_secs(10));
        let sooner = ctx.with_deadline(now + Duration::from_millis(10));

        assert_eq!(later.deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(sooner.deadline(), Some(now + Duration::from_millis(10)));
        assert!(sooner.with_value(Tenant("acme")).deadline().is_some());
    }

    #[test]
    fn test_remaining_is_bounded_by_timeout() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(5));
        let remaining = ctx.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(CallContext::background().remaining().is_none());
    }

    #[test]
    fn test_debug_reports_depth() {
        let ctx = CallContext::background()
            .with_value(RequestId("abc"))
            .with_value(Tenant("acme"));
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("values: 2"));
    }
}
