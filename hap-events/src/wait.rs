//! Convenience subscriptions for callers that want to await a single payload
//! (or batch) instead of handling a stream of them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::context::Context;
use crate::event::EventChannel;
use crate::metadata::EventData;
use crate::registry::RemoveHandler;

/// Single-use delivery slot shared by a waiter's callback invocations.
struct Slot<T>(Mutex<Option<oneshot::Sender<T>>>);

impl<T> Slot<T> {
    fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self(Mutex::new(Some(tx))), rx)
    }

    /// Hand `value` over if nothing has been delivered yet.
    fn deliver(&self, value: T) {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(value);
        }
    }
}

impl<D: EventData> EventChannel<D> {
    /// Register a transient handler that forwards the first payload matching
    /// `predicate`.
    ///
    /// The handler stays registered until the returned [`RemoveHandler`] is
    /// called or `ctx` is done; callers should remove it once satisfied or
    /// on timeout.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (rx, remove) = orders.wait_for_data(&ctx, |o| o.id == wanted);
    /// let order = tokio::time::timeout(Duration::from_secs(1), rx).await;
    /// remove.remove();
    /// ```
    pub fn wait_for_data<P>(
        &self,
        ctx: &Context,
        predicate: P,
    ) -> (oneshot::Receiver<Arc<D>>, RemoveHandler)
    where
        P: Fn(&D) -> bool + Send + Sync + 'static,
    {
        let (slot, rx) = Slot::new();
        let remove = self.add_handler(ctx, "", move |data: Arc<D>| {
            if predicate(&data) {
                slot.deliver(data);
            }
            std::future::ready(())
        });
        (rx, remove)
    }

    /// Buffered counterpart of [`wait_for_data`](Self::wait_for_data).
    ///
    /// Each delivered batch is filtered down to the elements matching
    /// `predicate`; the first non-empty filtered batch is forwarded.
    pub fn wait_for_buffered_data<P>(
        &self,
        ctx: &Context,
        predicate: P,
        size: usize,
        interval: Duration,
    ) -> (oneshot::Receiver<Vec<D>>, RemoveHandler)
    where
        P: Fn(&D) -> bool + Send + Sync + 'static,
    {
        let (slot, rx) = Slot::new();
        let remove = self.add_buffered_handler(
            ctx,
            "",
            move |batch: Vec<D>| {
                let matched: Vec<D> = batch.into_iter().filter(|d| predicate(d)).collect();
                if !matched.is_empty() {
                    slot.deliver(matched);
                }
                std::future::ready(())
            },
            size,
            interval,
        );
        (rx, remove)
    }
}
