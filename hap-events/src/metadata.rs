use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;

/// Envelope attached to every event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique identifier of the event.
    pub event_id: Uuid,
    /// Account which produced the event. Empty when the producing context
    /// carried no publisher identity.
    pub publisher_id: String,
    /// Time the event was produced (UTC).
    pub time: DateTime<Utc>,
}

impl Metadata {
    /// Stamp a fresh envelope from the producer's context.
    pub fn from_context(ctx: &Context) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            publisher_id: ctx.publisher_id().unwrap_or_default().to_string(),
            time: Utc::now(),
        }
    }
}

/// Payload carried by an [`EventChannel`](crate::EventChannel).
///
/// Implementors expose the envelope stamped by [`Metadata::from_context`].
/// `Clone` is required so that batches handed to buffered handlers can be
/// detached from the live buffer.
pub trait EventData: Clone + Send + Sync + 'static {
    fn metadata(&self) -> &Metadata;
}

impl EventData for Metadata {
    fn metadata(&self) -> &Metadata {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_publisher_from_context() {
        let ctx = Context::background().with_publisher_id("7b87b1dd");
        let meta = Metadata::from_context(&ctx);
        assert_eq!(meta.publisher_id, "7b87b1dd");
        assert!(meta.time <= Utc::now());
    }

    #[test]
    fn missing_publisher_is_empty() {
        let meta = Metadata::from_context(&Context::background());
        assert!(meta.publisher_id.is_empty());
    }

    #[test]
    fn event_ids_are_unique() {
        let ctx = Context::background();
        let a = Metadata::from_context(&ctx);
        let b = Metadata::from_context(&ctx);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn serializes_as_json() {
        let meta = Metadata::from_context(&Context::background().with_publisher_id("p"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["publisher_id"], "p");
        assert_eq!(json["event_id"], meta.event_id.to_string());
        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
