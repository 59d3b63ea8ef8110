use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::{panic_message, EventError};
use crate::handler::{Handler, HandlerKind};
use crate::metadata::EventData;

/// Counting bound on simultaneously in-flight invocations of one channel.
///
/// Shared by every handler of the channel and by their periodic flush tasks.
#[derive(Clone)]
pub(crate) struct Limiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Limiter {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot on behalf of `handler`.
    ///
    /// Gives up as soon as the handler's context completes or the handler is
    /// removed; no slot is consumed in that case.
    pub(crate) async fn acquire<D: EventData>(
        &self,
        handler: &Handler<D>,
    ) -> Result<OwnedSemaphorePermit, EventError> {
        tokio::select! {
            biased;
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| EventError::LimiterClosed)
            }
            _ = handler.ctx.done() => Err(EventError::ConcurrencyExhausted {
                handler: handler.id.clone(),
            }),
            _ = handler.retired() => Err(EventError::HandlerRemoved(handler.id.clone())),
        }
    }
}

/// Run `invocation` on its own task, holding `permit` until it finishes.
///
/// A panicking callback is caught and logged; the permit is released on
/// every path.
pub(crate) fn spawn_invocation<F>(
    permit: OwnedSemaphorePermit,
    handler: String,
    span: tracing::Span,
    invocation: F,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(
        async move {
            let _permit = permit;
            if let Err(payload) = AssertUnwindSafe(invocation).catch_unwind().await {
                let err = EventError::HandlerPanicked {
                    message: panic_message(payload.as_ref()),
                    handler,
                };
                tracing::error!(error = %err, "Handler failed");
            }
        }
        .instrument(span),
    )
}

/// Stand-in deadline for periods too long to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn next_tick(period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(period).unwrap_or(now + FAR_FUTURE)
}

/// Time-based flush loop of one buffered handler.
///
/// Wakes every period; a pause held by a concurrent append defers the tick and
/// its release re-arms a full period. Exits for good once the handler's
/// context is done or the handler is removed, discarding anything still
/// buffered.
pub(crate) async fn run_periodic_flush<D: EventData>(handler: Arc<Handler<D>>, limiter: Limiter) {
    let HandlerKind::Buffered(buffered) = &handler.kind else {
        return;
    };
    let timer = &buffered.timer;
    let mut next = next_tick(timer.period());

    loop {
        tokio::select! {
            _ = handler.ctx.done() => break,
            _ = handler.retired() => break,
            _ = timer.rearmed() => {
                next = next_tick(timer.period());
            }
            _ = tokio::time::sleep_until(next) => {
                next = next_tick(timer.period());
                if timer.is_paused() || buffered.is_empty() {
                    continue;
                }
                let permit = match limiter.acquire(&handler).await {
                    Ok(permit) => permit,
                    Err(err) => {
                        tracing::debug!(error = %err, "Skipping periodic flush");
                        continue;
                    }
                };
                let h = handler.clone();
                spawn_invocation(
                    permit,
                    handler.id.clone(),
                    tracing::Span::current(),
                    async move { h.flush().await },
                );
            }
        }
    }

    let dropped = buffered.discard();
    tracing::debug!(
        dropped,
        reason = handler.ctx.err().unwrap_or("handler removed"),
        "Periodic flush stopped"
    );
}
