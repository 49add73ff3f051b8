mod common;

use async_trait::async_trait;
use common::{memory_vault, payload, temp_config};
use crm_vault::db::schema::SchemaCatalog;
use crm_vault::platform::ManualNetworkStatus;
use crm_vault::service::{DatabaseOrchestrator, MutationQueue, SyncTransport};
use crm_vault::types::queue::{QueueItem, QueueStatus, SyncAction};
use crm_vault::{StorageBackend, VaultError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

struct RejectingTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl SyncTransport for RejectingTransport {
    async fn replay(&self, _item: &QueueItem) -> Result<(), VaultError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(VaultError::Sync("remote refused".into()))
    }
}

/// Parks inside `replay` until released.
#[derive(Default)]
struct GatedTransport {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl SyncTransport for GatedTransport {
    async fn replay(&self, _item: &QueueItem) -> Result<(), VaultError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

async fn standalone_queue(
    transport: Arc<dyn SyncTransport>,
) -> (TempDir, MutationQueue, Arc<ManualNetworkStatus>) {
    let (dir, cfg) = temp_config(StorageBackend::Memory);
    let orch = DatabaseOrchestrator::new(&cfg, SchemaCatalog::standard());
    let system = orch.database("system").await.expect("system db");
    let network = Arc::new(ManualNetworkStatus::new(true));
    let queue = MutationQueue::new(system, network.clone(), transport, 3);
    (dir, queue, network)
}

#[tokio::test]
async fn orchestrator_mutations_record_intents() {
    let t = memory_vault().await;
    let orch = &t.vault.orchestrator;

    orch.create("customers", "customers", payload(json!({"id": "c1", "name": "Ravi"})))
        .await
        .expect("create");
    orch.update("customers", "customers", "c1", payload(json!({"name": "Ravi K"})))
        .await
        .expect("update");
    orch.delete("customers", "customers", "c1")
        .await
        .expect("delete");

    let items = t.vault.sync.items().await.expect("items");
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(QueueItem::is_pending));
    assert!(items.iter().all(|i| i.module == "customers" && i.table == "customers"));
    for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
        assert_eq!(items.iter().filter(|i| i.action == action).count(), 1);
    }
    let delete = items
        .iter()
        .find(|i| i.action == SyncAction::Delete)
        .expect("delete intent");
    assert_eq!(delete.payload, json!({"id": "c1"}));
}

#[tokio::test]
async fn processing_marks_items_and_is_idempotent() {
    let t = memory_vault().await;
    t.vault
        .orchestrator
        .create("inventory", "items", payload(json!({"id": "i1"})))
        .await
        .expect("create");
    t.vault
        .orchestrator
        .create("inventory", "items", payload(json!({"id": "i2"})))
        .await
        .expect("create");

    let report = t.vault.sync.process_sync_queue().await.expect("first run");
    assert!(!report.skipped);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.processed, 2);

    let before = t.vault.sync.items().await.expect("items");
    assert!(before.iter().all(|i| i.status == QueueStatus::Processed));

    let report = t.vault.sync.process_sync_queue().await.expect("second run");
    assert_eq!(report.attempted, 0);
    let after = t.vault.sync.items().await.expect("items");
    assert_eq!(before, after);
}

#[tokio::test]
async fn exhausted_items_become_failed_and_stay_failed() {
    let transport = Arc::new(RejectingTransport {
        calls: AtomicUsize::new(0),
    });
    let (_dir, queue, _network) = standalone_queue(transport.clone()).await;
    let item = queue
        .add_to_sync_queue(SyncAction::Create, "sales", "invoices", json!({"id": "inv1"}))
        .await
        .expect("enqueue");

    for attempt in 1..=3u32 {
        let report = queue.process_sync_queue().await.expect("run");
        assert_eq!(report.retried, 1);
        let items = queue.items().await.expect("items");
        assert_eq!(items[0].id, item.id);
        assert_eq!(items[0].retries, attempt);
        assert_eq!(items[0].status, QueueStatus::Pending);
    }

    let report = queue.process_sync_queue().await.expect("fourth run");
    assert_eq!(report.failed, 1);
    let items = queue.items().await.expect("items");
    assert_eq!(items[0].status, QueueStatus::Failed);
    assert_eq!(items[0].retries, 4);

    let report = queue.process_sync_queue().await.expect("fifth run");
    assert_eq!(report.attempted, 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    assert_eq!(queue.pending_count().await.expect("pending"), 0);
    assert_eq!(
        queue
            .items_with_status(QueueStatus::Failed)
            .await
            .expect("failed")
            .len(),
        1
    );
}

#[tokio::test]
async fn overlapping_runs_are_single_flight() {
    let transport = Arc::new(GatedTransport::default());
    let (_dir, queue, _network) = standalone_queue(transport.clone()).await;
    queue
        .add_to_sync_queue(SyncAction::Update, "jobs", "jobs", json!({"id": "j1"}))
        .await
        .expect("enqueue");

    let running = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.process_sync_queue().await })
    };
    transport.entered.notified().await;
    assert!(queue.is_syncing());

    let overlapping = queue.process_sync_queue().await.expect("overlapping run");
    assert!(overlapping.skipped);
    assert_eq!(overlapping.attempted, 0);

    transport.release.notify_one();
    let first = running.await.expect("join").expect("first run");
    assert_eq!(first.processed, 1);
    assert!(!queue.is_syncing());
}

#[tokio::test]
async fn subscribers_see_transitions_until_unsubscribed() {
    let (_dir, queue, network) =
        standalone_queue(Arc::new(crm_vault::service::LocalOnlyTransport)).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let seen = seen.clone();
        queue.subscribe(Arc::new(move |online: bool| seen.lock().unwrap().push(online)))
    };
    assert_eq!(queue.subscriber_count(), 1);

    network.set_online(false);
    network.set_online(false);
    network.set_online(true);
    assert_eq!(*seen.lock().unwrap(), vec![false, true]);

    subscription.unsubscribe();
    assert_eq!(queue.subscriber_count(), 0);
    network.set_online(false);
    assert_eq!(*seen.lock().unwrap(), vec![false, true]);
}

#[tokio::test]
async fn offline_sync_is_skipped_and_reconnect_drains_the_queue() {
    let (_dir, queue, network) =
        standalone_queue(Arc::new(crm_vault::service::LocalOnlyTransport)).await;

    network.set_online(false);
    assert!(!queue.is_online());
    queue
        .add_to_sync_queue(SyncAction::Create, "vendors", "vendors", json!({"id": "v1"}))
        .await
        .expect("enqueue");

    let report = queue.sync_all().await.expect("offline sync");
    assert!(report.skipped);
    assert_eq!(queue.pending_count().await.expect("pending"), 1);

    network.set_online(true);
    let mut pending = 1;
    for _ in 0..100 {
        tokio::task::yield_now().await;
        pending = queue.pending_count().await.expect("pending");
        if pending == 0 {
            break;
        }
    }
    assert_eq!(pending, 0);
}

#[tokio::test(start_paused = true)]
async fn auto_sync_replays_on_interval() {
    let (_dir, queue, _network) =
        standalone_queue(Arc::new(crm_vault::service::LocalOnlyTransport)).await;
    queue
        .add_to_sync_queue(SyncAction::Delete, "ledger", "vouchers", json!({"id": "vo1"}))
        .await
        .expect("enqueue");

    assert!(queue.start_auto_sync(std::time::Duration::ZERO).is_err());
    queue
        .start_auto_sync(std::time::Duration::from_secs(30))
        .expect("start auto-sync");
    assert!(queue.is_auto_sync_running());

    tokio::time::sleep(std::time::Duration::from_secs(31)).await;
    assert_eq!(queue.pending_count().await.expect("pending"), 0);

    assert!(queue.stop_auto_sync());
    assert!(!queue.is_auto_sync_running());
}

#[tokio::test]
async fn each_item_is_persisted_before_the_next_replay() {
    let transport = Arc::new(GatedTransport::default());
    let (_dir, queue, _network) = standalone_queue(transport.clone()).await;
    for id in ["j1", "j2"] {
        queue
            .add_to_sync_queue(SyncAction::Update, "jobs", "jobs", json!({ "id": id }))
            .await
            .expect("enqueue");
    }

    let running = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.process_sync_queue().await })
    };
    transport.entered.notified().await;
    transport.release.notify_one();
    // parked on the second item: the first must already be stored as processed
    transport.entered.notified().await;

    let mut statuses: Vec<QueueStatus> = queue
        .items()
        .await
        .expect("items")
        .iter()
        .map(|i| i.status)
        .collect();
    statuses.sort_by_key(|s| *s != QueueStatus::Processed);
    assert_eq!(statuses, vec![QueueStatus::Processed, QueueStatus::Pending]);

    transport.release.notify_one();
    let report = running.await.expect("join").expect("run");
    assert_eq!(report.processed, 2);
    assert_eq!(queue.pending_count().await.expect("pending"), 0);
}

#[tokio::test]
async fn purge_removes_only_processed_items() {
    let (_dir, queue, _network) =
        standalone_queue(Arc::new(crm_vault::service::LocalOnlyTransport)).await;
    for id in ["v1", "v2"] {
        queue
            .add_to_sync_queue(SyncAction::Create, "vendors", "vendors", json!({ "id": id }))
            .await
            .expect("enqueue");
    }
    queue.process_sync_queue().await.expect("run");
    let waiting = queue
        .add_to_sync_queue(SyncAction::Delete, "vendors", "vendors", json!({"id": "v1"}))
        .await
        .expect("enqueue");

    assert_eq!(
        queue
            .items_with_status(QueueStatus::Processed)
            .await
            .expect("processed")
            .len(),
        2
    );
    assert_eq!(queue.purge_processed().await.expect("purge"), 2);

    let left = queue.items().await.expect("items");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, waiting.id);
    assert!(left[0].is_pending());
    assert_eq!(queue.purge_processed().await.expect("second purge"), 0);
}

#[tokio::test]
async fn queue_keeps_working_after_databases_are_recreated() {
    let mut t = memory_vault().await;
    t.vault
        .orchestrator
        .create("customers", "customers", payload(json!({"id": "c1"})))
        .await
        .expect("create");
    assert_eq!(t.vault.sync.pending_count().await.expect("pending"), 1);

    t.vault.delete_all_databases().await.expect("delete all");
    assert!(t.vault.orchestrator.is_initialized());
    assert_eq!(
        t.vault
            .orchestrator
            .count("customers", "customers")
            .await
            .expect("count"),
        0
    );
    assert!(t.vault.sync.items().await.expect("items").is_empty());

    t.vault
        .orchestrator
        .create("customers", "customers", payload(json!({"id": "c2"})))
        .await
        .expect("create after reset");
    let items = t.vault.sync.items().await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].payload["id"], json!("c2"));
}
