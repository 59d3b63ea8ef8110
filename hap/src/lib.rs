//! Hap: typed in-process pub/sub.
//!
//! This facade re-exports [`hap_events`] and adds process-level helpers.
//! Import everything you need with:
//!
//! ```ignore
//! use hap::prelude::*;
//! ```

// Re-export the engine as `hap::hap_events` as well as at the top level.
pub use hap_events;
pub use hap_events::*;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info,hap_events=debug";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_FILTER`].
///
/// Panics if a global subscriber is already set; use [`try_init_tracing`]
/// where that can happen (tests, embedding applications).
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// Like [`init_tracing`], but returns `false` instead of panicking when a
/// global subscriber is already installed.
pub fn try_init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .is_ok()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Unified prelude: `use hap::prelude::*`.
pub mod prelude {
    pub use hap_events::prelude::*;
    pub use hap_events::{EventConfig, EventError};
}
