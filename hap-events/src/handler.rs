use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::copy::detach;
use crate::metadata::EventData;

pub(crate) type DirectFn<D> =
    Arc<dyn Fn(Arc<D>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub(crate) type BatchFn<D> =
    Arc<dyn Fn(Vec<D>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One registered subscription.
pub(crate) struct Handler<D> {
    pub(crate) id: String,
    pub(crate) ctx: Context,
    pub(crate) kind: HandlerKind<D>,
    retired: CancellationToken,
}

/// Callback shape, fixed at registration.
pub(crate) enum HandlerKind<D> {
    Direct(DirectFn<D>),
    Buffered(Buffered<D>),
}

/// State private to a buffered handler.
///
/// `buffer` is only touched under its own mutex; `timer` is paused around
/// every append-and-maybe-flush.
pub(crate) struct Buffered<D> {
    callback: BatchFn<D>,
    size: usize,
    pub(crate) timer: FlushTimer,
    buffer: Mutex<Vec<Arc<D>>>,
}

impl<D: EventData> Handler<D> {
    pub(crate) fn direct(id: String, ctx: Context, callback: DirectFn<D>) -> Self {
        Self {
            id,
            ctx,
            kind: HandlerKind::Direct(callback),
            retired: CancellationToken::new(),
        }
    }

    pub(crate) fn buffered(
        id: String,
        ctx: Context,
        callback: BatchFn<D>,
        size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            id,
            ctx,
            kind: HandlerKind::Buffered(Buffered {
                callback,
                size,
                timer: FlushTimer::new(interval),
                buffer: Mutex::new(Vec::new()),
            }),
            retired: CancellationToken::new(),
        }
    }

    pub(crate) fn is_buffered(&self) -> bool {
        matches!(self.kind, HandlerKind::Buffered(_))
    }

    /// Mark the handler as removed. Stops its periodic flush and makes any
    /// invocation that has not started yet a no-op. Idempotent.
    pub(crate) fn retire(&self) {
        self.retired.cancel();
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    pub(crate) async fn retired(&self) {
        self.retired.cancelled().await
    }

    /// Deliver one payload.
    ///
    /// Direct handlers get the payload as is. Buffered handlers append it and
    /// flush once the threshold is reached; their timer stays paused until
    /// this returns (or unwinds).
    pub(crate) async fn invoke(&self, data: Arc<D>) {
        if self.is_retired() {
            return;
        }
        match &self.kind {
            HandlerKind::Direct(callback) => callback(data).await,
            HandlerKind::Buffered(buffered) => {
                let _paused = buffered.timer.pause();
                if let Some(batch) = buffered.push_and_take(data) {
                    (buffered.callback)(batch).await;
                }
            }
        }
    }

    /// Deliver whatever a buffered handler has accumulated. No-op when the
    /// buffer is empty or the handler has been removed.
    pub(crate) async fn flush(&self) {
        if self.is_retired() {
            return;
        }
        if let HandlerKind::Buffered(buffered) = &self.kind {
            if let Some(batch) = buffered.take() {
                (buffered.callback)(batch).await;
            }
        }
    }
}

impl<D: EventData> Buffered<D> {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<D>>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_and_take(&self, data: Arc<D>) -> Option<Vec<D>> {
        let mut buffer = self.lock();
        buffer.push(data);
        if buffer.len() >= self.size {
            Some(detach(&mut buffer))
        } else {
            None
        }
    }

    fn take(&self) -> Option<Vec<D>> {
        let mut buffer = self.lock();
        if buffer.is_empty() {
            None
        } else {
            Some(detach(&mut buffer))
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn discard(&self) -> usize {
        let mut buffer = self.lock();
        let dropped = buffer.len();
        buffer.clear();
        dropped
    }
}

/// Pausable, re-armable period of a buffered handler's flush task.
pub(crate) struct FlushTimer {
    period: Duration,
    paused: AtomicUsize,
    rearm: Notify,
}

impl FlushTimer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            paused: AtomicUsize::new(0),
            rearm: Notify::new(),
        }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    /// Suspend ticks until the returned guard drops, which re-arms the timer
    /// for a full period.
    pub(crate) fn pause(&self) -> PauseGuard<'_> {
        self.paused.fetch_add(1, Ordering::SeqCst);
        PauseGuard { timer: self }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst) > 0
    }

    /// Resolves when a pause ends.
    pub(crate) async fn rearmed(&self) {
        self.rearm.notified().await
    }
}

pub(crate) struct PauseGuard<'a> {
    timer: &'a FlushTimer,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.timer.paused.fetch_sub(1, Ordering::SeqCst);
        self.timer.rearm.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;

    #[derive(Clone, Debug)]
    struct Ping {
        meta: Metadata,
        n: usize,
    }

    impl EventData for Ping {
        fn metadata(&self) -> &Metadata {
            &self.meta
        }
    }

    fn ping(n: usize) -> Arc<Ping> {
        Arc::new(Ping {
            meta: Metadata::from_context(&Context::background()),
            n,
        })
    }

    fn recording(batches: Arc<Mutex<Vec<Vec<usize>>>>) -> BatchFn<Ping> {
        Arc::new(move |batch: Vec<Ping>| {
            let batches = batches.clone();
            Box::pin(async move {
                batches.lock().unwrap().push(batch.iter().map(|p| p.n).collect());
            })
        })
    }

    #[tokio::test]
    async fn buffered_flushes_at_threshold() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let handler = Handler::buffered(
            "b".into(),
            Context::background(),
            recording(batches.clone()),
            3,
            Duration::from_secs(1),
        );

        handler.invoke(ping(1)).await;
        handler.invoke(ping(2)).await;
        assert!(batches.lock().unwrap().is_empty());

        handler.invoke(ping(3)).await;
        handler.invoke(ping(4)).await;
        assert_eq!(*batches.lock().unwrap(), vec![vec![1, 2, 3]]);

        handler.flush().await;
        assert_eq!(*batches.lock().unwrap(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn timer_is_released_after_invoke() {
        let handler = Handler::buffered(
            "b".into(),
            Context::background(),
            recording(Arc::new(Mutex::new(Vec::new()))),
            10,
            Duration::from_secs(1),
        );
        handler.invoke(ping(1)).await;
        let HandlerKind::Buffered(buffered) = &handler.kind else {
            panic!("expected buffered handler");
        };
        assert!(!buffered.timer.is_paused());
        assert!(!buffered.is_empty());
        assert_eq!(buffered.discard(), 1);
        assert!(buffered.is_empty());
    }

    #[tokio::test]
    async fn retired_handler_ignores_payloads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handler = Handler::direct(
            "d".into(),
            Context::background(),
            Arc::new(move |_: Arc<Ping>| {
                c.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {})
            }),
        );
        handler.invoke(ping(1)).await;
        handler.retire();
        handler.retire();
        handler.invoke(ping(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handler.is_retired());
        assert!(!handler.is_buffered());
    }

    #[test]
    fn pause_guard_nests() {
        let timer = FlushTimer::new(Duration::from_millis(10));
        let outer = timer.pause();
        let inner = timer.pause();
        drop(inner);
        assert!(timer.is_paused());
        drop(outer);
        assert!(!timer.is_paused());
    }
}
