mod support;

use siteforge::broker::Broker;
use siteforge::db;
use siteforge::debounce::{DebounceAggregator, DebounceSettings};
use siteforge::model::{BuildRequest, ChangeNotification, SiteStatus, TRIGGER_CATALOG_CHANGE};
use siteforge::queue::Publisher;
use siteforge::services::{FragmentPatcher, PlanTier};
use std::sync::Arc;
use std::time::Duration;
use support::*;

const TOPIC: &str = "site_build";

fn change(product_ids: &[&str]) -> ChangeNotification {
    ChangeNotification {
        event: "product.updated".to_string(),
        tenant_id: "t1".to_string(),
        product_ids: product_ids.iter().map(|s| s.to_string()).collect(),
    }
}

struct Harness {
    broker: Broker,
    patcher: Arc<RecordingPatcher>,
    aggregator: DebounceAggregator,
}

async fn harness(pool: &sqlx::SqlitePool) -> Harness {
    let broker = Broker::new();
    broker.declare_queue(TOPIC, Some(10));
    let publisher = Publisher::new(broker.clone(), TOPIC, Arc::new(StaticBilling(PlanTier::Free)));
    let patcher = Arc::new(RecordingPatcher::default());
    let aggregator = DebounceAggregator::new(
        pool.clone(),
        publisher,
        patcher.clone() as Arc<dyn FragmentPatcher>,
        DebounceSettings {
            rebuild_window: Duration::from_millis(50),
            patch_window: Duration::from_millis(30),
        },
    );
    Harness {
        broker,
        patcher,
        aggregator,
    }
}

#[tokio::test]
async fn burst_of_changes_collapses_into_one_rebuild() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s1", "t1", None, SiteStatus::Published, None, false)
        .await
        .unwrap();

    let h = harness(&pool).await;
    h.aggregator.notify(change(&["p1"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.aggregator.notify(change(&["p2"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.aggregator.notify(change(&["p1"])).await.unwrap();
    assert_eq!(h.aggregator.pending(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.broker.depth(TOPIC), 1);
    let delivery = h.broker.try_pop(TOPIC).unwrap();
    assert_eq!(delivery.priority, 5);
    let request: BuildRequest = serde_json::from_value(delivery.message.data).unwrap();
    assert_eq!(request.site_id, "s1");
    assert_eq!(request.trigger, TRIGGER_CATALOG_CHANGE);
    assert!(request.build_id.is_none());
    assert_eq!(
        request.changed_products,
        Some(vec!["p1".to_string(), "p2".to_string()])
    );
    assert_eq!(h.aggregator.pending(), 0);
}

#[tokio::test]
async fn a_change_after_the_window_starts_a_fresh_cycle() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s1", "t1", None, SiteStatus::Published, None, false)
        .await
        .unwrap();

    let h = harness(&pool).await;
    h.aggregator.notify(change(&["p1"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.aggregator.notify(change(&["p2"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.broker.depth(TOPIC), 2);
    let first: BuildRequest =
        serde_json::from_value(h.broker.try_pop(TOPIC).unwrap().message.data).unwrap();
    let second: BuildRequest =
        serde_json::from_value(h.broker.try_pop(TOPIC).unwrap().message.data).unwrap();
    assert_eq!(first.changed_products, Some(vec!["p1".to_string()]));
    assert_eq!(second.changed_products, Some(vec!["p2".to_string()]));
}

#[tokio::test]
async fn fragment_patch_sites_are_patched_instead_of_rebuilt() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s-full", "t1", None, SiteStatus::Published, None, false)
        .await
        .unwrap();
    db::create_site(&pool, "s-patch", "t1", None, SiteStatus::Published, None, true)
        .await
        .unwrap();

    let h = harness(&pool).await;
    h.aggregator.notify(change(&["p1"])).await.unwrap();
    h.aggregator.notify(change(&["p2"])).await.unwrap();
    assert_eq!(h.aggregator.pending(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // One rebuild for the full site, one patch call for the other.
    assert_eq!(h.broker.depth(TOPIC), 1);
    let request: BuildRequest =
        serde_json::from_value(h.broker.try_pop(TOPIC).unwrap().message.data).unwrap();
    assert_eq!(request.site_id, "s-full");

    assert_eq!(
        h.patcher.calls(),
        vec![("s-patch".to_string(), vec!["p1".to_string(), "p2".to_string()])]
    );
}

#[tokio::test]
async fn ineligible_sites_never_enter_the_registry() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s-frozen", "t1", None, SiteStatus::Frozen, None, false)
        .await
        .unwrap();
    db::create_site(&pool, "s-draft", "t1", None, SiteStatus::Draft, None, false)
        .await
        .unwrap();
    db::create_site(&pool, "s-archived", "t1", None, SiteStatus::Archived, None, true)
        .await
        .unwrap();

    let h = harness(&pool).await;
    h.aggregator.notify(change(&["p1"])).await.unwrap();
    assert_eq!(h.aggregator.pending(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.broker.depth(TOPIC), 0);
    assert!(h.patcher.calls().is_empty());
}

#[tokio::test]
async fn shutdown_aborts_pending_windows() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s1", "t1", None, SiteStatus::Published, None, false)
        .await
        .unwrap();

    let h = harness(&pool).await;
    h.aggregator.notify(change(&["p1"])).await.unwrap();
    assert_eq!(h.aggregator.pending(), 1);
    h.aggregator.shutdown();
    assert_eq!(h.aggregator.pending(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.broker.depth(TOPIC), 0);

    // Notifications after shutdown are ignored.
    h.aggregator.notify(change(&["p2"])).await.unwrap();
    assert_eq!(h.aggregator.pending(), 0);
}
