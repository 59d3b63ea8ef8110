use hap::prelude::*;
use std::sync::Arc;

#[derive(Clone, Debug)]
struct PingData {
    meta: Metadata,
}

impl EventData for PingData {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }
}

#[tokio::test]
async fn test_prelude_covers_a_round_trip() {
    hap::try_init_tracing();

    let pings: EventChannel<PingData> = EventChannel::with_config(EventConfig::default()).unwrap();
    let ctx = Context::background().with_publisher_id("facade");
    let (rx, remove) = pings.wait_for_data(&ctx, |_| true);

    pings
        .trigger(&ctx, PingData { meta: Metadata::from_context(&ctx) })
        .await;
    let got: Arc<PingData> = rx.await.unwrap();
    assert_eq!(got.meta.publisher_id, "facade");
    assert_eq!(pings.topic(), "ping");
    remove.remove();
}

#[test]
fn test_second_init_is_reported() {
    hap::try_init_tracing();
    assert!(!hap::try_init_tracing());
}
