use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation, deadline and publisher identity carried alongside a handler
/// registration or a `trigger` call.
///
/// A `Context` is "done" once its token is cancelled or its deadline has
/// passed. Clones share the same token, so cancelling one cancels all of them.
///
/// # Example
///
/// ```ignore
/// let ctx = Context::background().with_publisher_id("billing");
/// let scoped = ctx.with_timeout(Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    publisher_id: Option<Arc<str>>,
}

impl Context {
    /// A context that is never done unless explicitly cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            publisher_id: None,
        }
    }

    /// Derive a context whose token is a child of this one.
    ///
    /// Cancelling the child leaves the parent untouched; cancelling the parent
    /// cancels the child.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            publisher_id: self.publisher_id.clone(),
        }
    }

    /// Derive a child context that is done after `timeout`.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child context that is done at `deadline`.
    ///
    /// An earlier deadline already set on `self` wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.child();
        ctx.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        ctx
    }

    /// Attach the identity of the account producing events under this context.
    pub fn with_publisher_id(mut self, publisher_id: impl Into<Arc<str>>) -> Self {
        self.publisher_id = Some(publisher_id.into());
        self
    }

    pub fn publisher_id(&self) -> Option<&str> {
        self.publisher_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// The reason this context is done, if it is.
    pub fn err(&self) -> Option<&'static str> {
        if self.cancel.is_cancelled() {
            Some("context canceled")
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some("context deadline exceeded")
        } else {
            None
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_not_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.err().is_none());
        assert!(ctx.publisher_id().is_none());
    }

    #[test]
    fn cancel_propagates_to_children_only() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_done());
        assert_eq!(other.err(), Some("context canceled"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_context_done() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        assert!(!ctx.is_done());
        ctx.done().await;
        assert!(ctx.is_done());
        assert_eq!(ctx.err(), Some("context deadline exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let short = Context::background().with_timeout(Duration::from_millis(10));
        let long = short.with_timeout(Duration::from_secs(60));
        assert_eq!(long.deadline(), short.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_adds_no_deadline() {
        let ctx = Context::background().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_done());

        let short = Context::background().with_timeout(Duration::from_millis(10));
        assert_eq!(short.with_timeout(Duration::MAX).deadline(), short.deadline());
    }

    #[test]
    fn publisher_id_survives_derivation() {
        let ctx = Context::background().with_publisher_id("acct-1");
        assert_eq!(ctx.child().publisher_id(), Some("acct-1"));
    }
}
