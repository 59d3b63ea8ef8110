use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::EventConfig;
use crate::context::Context;
use crate::dispatch::{run_periodic_flush, spawn_invocation, Limiter};
use crate::error::EventError;
use crate::handler::{BatchFn, DirectFn, Handler};
use crate::metadata::EventData;
use crate::registry::{Registry, RemoveHandler};
use crate::topic::topic_of;

/// Publish/subscribe endpoint for one payload type.
///
/// Handlers are either *direct* (called once per payload) or *buffered*
/// (called with batches, flushed when a size threshold is reached or a
/// flush interval elapses). Every invocation, including periodic flushes,
/// holds one slot of a limiter shared by the whole channel, so at most
/// [`concurrency_limit`](Self::concurrency_limit) callbacks run at once.
///
/// `EventChannel` is `Clone`; clones share handlers and limiter.
///
/// # Example
///
/// ```ignore
/// let users = EventChannel::<UserCreatedData>::new();
/// let ctx = Context::background();
///
/// let remove = users.add_handler(&ctx, "welcome-mail", |user| async move {
///     send_welcome(&user).await;
/// });
///
/// users.trigger(&ctx, UserCreatedData::new(&ctx, "John")).await;
/// remove.remove();
/// ```
pub struct EventChannel<D> {
    topic: Arc<str>,
    limiter: Limiter,
    registry: Arc<Registry<D>>,
    config: EventConfig,
    span: tracing::Span,
}

impl<D> Clone for EventChannel<D> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            limiter: self.limiter.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            span: self.span.clone(),
        }
    }
}

impl<D: EventData> EventChannel<D> {
    /// Create a channel with the default configuration.
    pub fn new() -> Self {
        Self::build(EventConfig::default())
    }

    /// Create a channel with a custom limiter capacity.
    ///
    /// Unlike [`with_config`](Self::with_config) this never fails: the
    /// capacity is clamped into `1..=Semaphore::MAX_PERMITS`.
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.clamp(1, Semaphore::MAX_PERMITS);
        Self::build(EventConfig::default().with_max_concurrency(max_concurrency))
    }

    /// Create a channel from a validated configuration.
    pub fn with_config(config: EventConfig) -> Result<Self, EventError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Record every diagnostic of this channel under `parent`.
    ///
    /// Must be called before any handler is registered to cover periodic
    /// flush tasks as well.
    pub fn in_span(mut self, parent: &tracing::Span) -> Self {
        self.span = tracing::debug_span!(parent: parent, "event", topic = %self.topic);
        self
    }

    fn build(config: EventConfig) -> Self {
        let topic: Arc<str> = topic_of::<D>().into();
        let span = tracing::debug_span!("event", topic = %topic);
        Self {
            limiter: Limiter::new(config.max_concurrency),
            registry: Arc::new(Registry::new()),
            topic,
            config,
            span,
        }
    }

    /// Label derived from the payload type name, used in diagnostics.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    /// Number of registered handlers.
    pub fn num_handlers(&self) -> usize {
        self.registry.len()
    }

    /// Capacity of the channel's limiter.
    pub fn concurrency_limit(&self) -> usize {
        self.limiter.capacity()
    }

    /// Limiter slots currently free.
    pub fn available_permits(&self) -> usize {
        self.limiter.available()
    }

    /// Register a handler called once per triggered payload.
    ///
    /// If `id` is empty a UUIDv4 is generated. Registration problems are
    /// logged and yield an inert [`RemoveHandler`]; see
    /// [`try_add_handler`](Self::try_add_handler) for the fallible variant.
    ///
    /// `callback` must not block forever: it holds a limiter slot while it runs.
    pub fn add_handler<F, Fut>(&self, ctx: &Context, id: &str, callback: F) -> RemoveHandler
    where
        F: Fn(Arc<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.try_add_handler(ctx, id, callback)
            .unwrap_or_else(|err| self.rejected(err))
    }

    pub fn try_add_handler<F, Fut>(
        &self,
        ctx: &Context,
        id: &str,
        callback: F,
    ) -> Result<RemoveHandler, EventError>
    where
        F: Fn(Arc<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = resolve_id(id)?;
        let callback: DirectFn<D> = Arc::new(move |data| Box::pin(callback(data)));
        let handler = Arc::new(Handler::direct(id, ctx.clone(), callback));
        self.register(handler)
    }

    /// Register a handler called with batches of payloads, in arrival order.
    ///
    /// A batch is delivered once `size` payloads have accumulated, or every
    /// `interval` if anything is buffered. Zero values fall back to the
    /// channel's configured defaults. Must be called within a Tokio runtime:
    /// the periodic flush runs on its own task until `ctx` is done or the
    /// handler is removed. Whatever is still buffered at that point is dropped.
    pub fn add_buffered_handler<F, Fut>(
        &self,
        ctx: &Context,
        id: &str,
        callback: F,
        size: usize,
        interval: Duration,
    ) -> RemoveHandler
    where
        F: Fn(Vec<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.try_add_buffered_handler(ctx, id, callback, size, interval)
            .unwrap_or_else(|err| self.rejected(err))
    }

    pub fn try_add_buffered_handler<F, Fut>(
        &self,
        ctx: &Context,
        id: &str,
        callback: F,
        size: usize,
        interval: Duration,
    ) -> Result<RemoveHandler, EventError>
    where
        F: Fn(Vec<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = resolve_id(id)?;
        let size = if size == 0 { self.config.default_batch_size } else { size };
        let interval = if interval.is_zero() {
            self.config.default_flush_interval
        } else {
            interval
        };
        let callback: BatchFn<D> = Arc::new(move |batch| Box::pin(callback(batch)));
        let handler = Arc::new(Handler::buffered(id, ctx.clone(), callback, size, interval));
        self.register(handler)
    }

    fn register(&self, handler: Arc<Handler<D>>) -> Result<RemoveHandler, EventError> {
        let runtime = if handler.is_buffered() {
            let runtime = Handle::try_current().map_err(|_| {
                EventError::InvalidHandler(format!(
                    "buffered handler '{}' must be registered within a Tokio runtime",
                    handler.id
                ))
            })?;
            Some(runtime)
        } else {
            None
        };

        self.registry.insert(handler.clone())?;

        if let Some(runtime) = runtime {
            let span = tracing::debug_span!(parent: &self.span, "flush", handler = %handler.id);
            runtime.spawn(
                run_periodic_flush(handler.clone(), self.limiter.clone()).instrument(span),
            );
        }

        tracing::debug!(
            parent: &self.span,
            handler = %handler.id,
            buffered = handler.is_buffered(),
            "Handler added"
        );
        Ok(RemoveHandler::new(self.registry.clone(), handler))
    }

    fn rejected(&self, err: EventError) -> RemoveHandler {
        tracing::error!(parent: &self.span, error = %err, "Cannot add handler");
        RemoveHandler::noop()
    }

    /// Deliver `data` to every live handler.
    ///
    /// Handlers whose context is done are pruned. For every other handler a
    /// limiter slot is awaited (bounded by that handler's context) before its
    /// invocation is spawned, so a saturated channel makes this call wait.
    /// Returns once every invocation has been spawned, not completed.
    pub async fn trigger(&self, ctx: &Context, data: D) {
        self.dispatch(ctx, data).await;
    }

    /// Like [`trigger`](Self::trigger), but also waits for the spawned
    /// invocations to complete.
    pub async fn trigger_and_wait(&self, ctx: &Context, data: D) {
        for task in self.dispatch(ctx, data).await {
            let _ = task.await;
        }
    }

    async fn dispatch(&self, ctx: &Context, data: D) -> Vec<JoinHandle<()>> {
        if self.registry.is_empty() {
            return Vec::new();
        }

        let span = tracing::debug_span!(
            parent: &self.span,
            "trigger",
            event_id = %data.metadata().event_id,
            publisher_id = ctx.publisher_id().unwrap_or_default(),
        );
        let data = Arc::new(data);
        let mut tasks = Vec::new();

        for handler in self.registry.snapshot() {
            if handler.ctx.is_done() {
                tracing::debug!(
                    parent: &span,
                    handler = %handler.id,
                    reason = handler.ctx.err().unwrap_or_default(),
                    "Removing handler with completed context"
                );
                self.registry.remove(&handler);
                continue;
            }

            let permit = match self.limiter.acquire(&handler).await {
                Ok(permit) => permit,
                Err(err) => {
                    tracing::debug!(parent: &span, error = %err, "Skipping handler");
                    continue;
                }
            };

            let h = handler.clone();
            let d = data.clone();
            tasks.push(spawn_invocation(
                permit,
                handler.id.clone(),
                tracing::debug_span!(parent: &span, "invoke", handler = %handler.id),
                async move { h.invoke(d).await },
            ));
        }

        tasks
    }

    /// Remove every handler, stopping their periodic flushes.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

impl<D: EventData> Default for EventChannel<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> std::fmt::Debug for EventChannel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("topic", &self.topic)
            .field("config", &self.config)
            .finish()
    }
}

fn resolve_id(id: &str) -> Result<String, EventError> {
    if id.is_empty() {
        return Ok(uuid::Uuid::new_v4().to_string());
    }
    if id.trim().is_empty() {
        return Err(EventError::InvalidHandler("blank handler id".into()));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_gets_a_uuid() {
        let a = resolve_id("").unwrap();
        let b = resolve_id("").unwrap();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[derive(Clone)]
    struct Tick(crate::metadata::Metadata);

    impl EventData for Tick {
        fn metadata(&self) -> &crate::metadata::Metadata {
            &self.0
        }
    }

    #[test]
    fn buffered_handler_outside_runtime_is_rejected() {
        let event = EventChannel::<Tick>::new();
        let ctx = Context::background();

        let err = event
            .try_add_buffered_handler(&ctx, "b", |_| async {}, 1, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidHandler(_)));

        let remove = event.add_buffered_handler(&ctx, "b", |_| async {}, 1, Duration::from_secs(1));
        assert!(remove.is_inert());
        assert_eq!(event.num_handlers(), 0);

        // Direct handlers need no background task.
        event.add_handler(&ctx, "d", |_| async {});
        assert_eq!(event.num_handlers(), 1);
    }

    #[test]
    fn with_concurrency_clamps() {
        assert_eq!(EventChannel::<Tick>::with_concurrency(0).concurrency_limit(), 1);
        assert_eq!(
            EventChannel::<Tick>::with_concurrency(usize::MAX).concurrency_limit(),
            Semaphore::MAX_PERMITS
        );
        assert!(EventChannel::<Tick>::with_config(EventConfig::default().with_max_concurrency(0)).is_err());
    }

    #[test]
    fn blank_id_is_rejected() {
        assert!(matches!(resolve_id("  "), Err(EventError::InvalidHandler(_))));
        assert_eq!(resolve_id("audit").unwrap(), "audit");
    }
}
