//! In-process typed event channels.
//!
//! An [`EventChannel`] binds a payload type to a set of handlers. Producers
//! stamp a [`Metadata`] envelope from their [`Context`] and call
//! [`EventChannel::trigger`]; each live handler is invoked on its own task.
//!
//! Handlers come in two shapes:
//! - **direct**, called once per payload with an `Arc<D>`;
//! - **buffered**, called with a `Vec<D>` once a size threshold is reached or
//!   a flush interval elapses.
//!
//! All invocations of a channel share one bounded limiter, so a burst of
//! triggers never runs more than [`EventConfig::max_concurrency`] callbacks
//! at once. A handler's [`Context`] bounds how long a trigger waits for a
//! slot on its behalf; once the context is done the handler is pruned.

mod config;
mod context;
pub mod copy;
mod dispatch;
mod error;
mod event;
mod handler;
mod metadata;
mod registry;
pub mod topic;
mod wait;

pub use config::{EventConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_CONCURRENCY};
pub use context::Context;
pub use error::EventError;
pub use event::EventChannel;
pub use metadata::{EventData, Metadata};
pub use registry::RemoveHandler;

pub mod prelude {
    //! Re-exports of the most commonly used event types.
    pub use crate::{Context, EventChannel, EventData, Metadata, RemoveHandler};
}
