use std::time::Duration;

use chrono::{DateTime, Utc};
use hap::prelude::*;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
struct UserCreatedData {
    meta: Metadata,
    id: String,
    first_name: String,
    last_name: String,
    created_at: DateTime<Utc>,
}

impl EventData for UserCreatedData {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }
}

#[tokio::main]
async fn main() {
    hap::init_tracing();

    let user_created = EventChannel::<UserCreatedData>::new();
    let ctx = Context::background().with_publisher_id("simple-demo");

    let (received_tx, mut received_rx) = mpsc::channel(1);

    // An empty id lets the channel generate one.
    let remove = user_created.add_handler(&ctx, "", move |user| {
        let received_tx = received_tx.clone();
        async move {
            tracing::info!(
                id = %user.id,
                name = %format!("{} {}", user.first_name, user.last_name),
                created_at = %user.created_at,
                event_id = %user.meta.event_id,
                "User created"
            );
            let _ = received_tx.send(()).await;
        }
    });
    tracing::info!(handler = ?remove.id(), topic = user_created.topic(), "Listening");

    user_created
        .trigger(
            &ctx,
            UserCreatedData {
                meta: Metadata::from_context(&ctx),
                id: "4a2d6247-cf07-5eb8-b8fd-a27c37aaecfa".into(),
                first_name: "John".into(),
                last_name: "Doe".into(),
                created_at: Utc::now(),
            },
        )
        .await;

    match tokio::time::timeout(Duration::from_secs(5), received_rx.recv()).await {
        Ok(Some(())) => tracing::info!("Event handled"),
        _ => tracing::warn!("Event was not handled in time"),
    }

    remove.remove();
}
