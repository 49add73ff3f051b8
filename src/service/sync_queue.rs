use crate::db::models::{Record, payload_from_value};
use crate::db::schema::SYNC_QUEUE_TABLE;
use crate::db::store::KeyValueStore;
use crate::error::VaultError;
use crate::platform::network::{ListenerId, Listeners, NetworkStatus, StatusCallback};
use crate::types::queue::{QueueItem, QueueStatus, SyncAction, SyncReport};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

/// Replays one queued mutation against the remote side.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn replay(&self, item: &QueueItem) -> Result<(), VaultError>;
}

/// Transport for local-only deployments: every replay succeeds without
/// leaving the machine.
#[derive(Debug, Clone, Default)]
pub struct LocalOnlyTransport;

#[async_trait]
impl SyncTransport for LocalOnlyTransport {
    async fn replay(&self, item: &QueueItem) -> Result<(), VaultError> {
        debug!(
            id = %item.id,
            action = ?item.action,
            module = %item.module,
            table = %item.table,
            "no remote configured; marking item processed"
        );
        Ok(())
    }
}

/// Persistent offline mutation queue stored in `system.sync_queue`.
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct MutationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    store: Arc<KeyValueStore>,
    network: Arc<dyn NetworkStatus>,
    transport: Arc<dyn SyncTransport>,
    network_listener: ListenerId,
    max_retries: u32,
    syncing: AtomicBool,
    listeners: Listeners,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.network.unsubscribe(self.network_listener);
        if let Some(handle) = self
            .auto_sync
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Handle returned by [`MutationQueue::subscribe`].
pub struct Subscription {
    id: ListenerId,
    queue: Weak<QueueInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.queue.upgrade() {
            inner.listeners.remove(self.id);
        }
    }
}

/// Clears the single-flight flag when a run ends, including on error.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MutationQueue {
    /// `store` must be the opened `system` database. Going online triggers a
    /// full sync on the current tokio runtime.
    pub fn new(
        store: Arc<KeyValueStore>,
        network: Arc<dyn NetworkStatus>,
        transport: Arc<dyn SyncTransport>,
        max_retries: u32,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<QueueInner>| {
            let weak = weak.clone();
            let callback: StatusCallback = Arc::new(move |online: bool| {
                if let Some(inner) = weak.upgrade() {
                    MutationQueue { inner }.on_network_change(online);
                }
            });
            let network_listener = network.subscribe(callback);
            QueueInner {
                store,
                network,
                transport,
                network_listener,
                max_retries,
                syncing: AtomicBool::new(false),
                listeners: Listeners::default(),
                auto_sync: Mutex::new(None),
            }
        });
        Self { inner }
    }

    fn on_network_change(&self, online: bool) {
        self.inner.listeners.notify(online);
        if !online {
            info!("offline; mutations will queue until connectivity returns");
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let queue = self.clone();
                handle.spawn(async move {
                    if let Err(e) = queue.sync_all().await {
                        warn!(error = %e, "sync after reconnect failed");
                    }
                });
            }
            Err(_) => debug!("online outside a runtime; sync deferred to next trigger"),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    /// Register a callback for online/offline transitions.
    pub fn subscribe(&self, callback: StatusCallback) -> Subscription {
        Subscription {
            id: self.inner.listeners.add(callback),
            queue: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Persist a pending intent for a mutation that already happened locally.
    pub async fn add_to_sync_queue(
        &self,
        action: SyncAction,
        module: &str,
        table: &str,
        payload: Value,
    ) -> Result<QueueItem, VaultError> {
        let item = QueueItem::pending(action, module, table, payload);
        self.persist(&item).await?;
        debug!(id = %item.id, ?action, module, table, "mutation queued");
        Ok(item)
    }

    async fn persist(&self, item: &QueueItem) -> Result<(), VaultError> {
        let payload = payload_from_value(serde_json::to_value(item)?)?;
        self.inner.store.put(SYNC_QUEUE_TABLE, payload).await?;
        Ok(())
    }

    /// Every queue item, oldest first.
    pub async fn items(&self) -> Result<Vec<QueueItem>, VaultError> {
        let records = self.inner.store.get_all(SYNC_QUEUE_TABLE).await?;
        Ok(decode_items(records))
    }

    /// Items in `status`, oldest first, read through the `status` index.
    pub async fn items_with_status(&self, status: QueueStatus) -> Result<Vec<QueueItem>, VaultError> {
        let records = self
            .inner
            .store
            .get_by_index(SYNC_QUEUE_TABLE, "status", &serde_json::to_value(status)?)
            .await?;
        Ok(decode_items(records))
    }

    pub async fn pending_count(&self) -> Result<usize, VaultError> {
        Ok(self.items_with_status(QueueStatus::Pending).await?.len())
    }

    /// Delete processed items. Pending and failed items are kept.
    pub async fn purge_processed(&self) -> Result<usize, VaultError> {
        let processed = self.items_with_status(QueueStatus::Processed).await?;
        let mut removed = 0;
        for item in &processed {
            if self.inner.store.delete(SYNC_QUEUE_TABLE, &item.id).await? {
                removed += 1;
            }
        }
        info!(removed, "processed sync items purged");
        Ok(removed)
    }

    /// A queue with the same network, transport and retry bound over
    /// another `system` store.
    pub fn rebind(&self, store: Arc<KeyValueStore>) -> MutationQueue {
        MutationQueue::new(
            store,
            self.inner.network.clone(),
            self.inner.transport.clone(),
            self.inner.max_retries,
        )
    }

    /// Replay every pending item once, in timestamp order.
    ///
    /// At most one run is active; a call made while another is running
    /// returns a skipped report. Each item is persisted right after its
    /// attempt, so an interrupted run loses no progress.
    pub async fn process_sync_queue(&self) -> Result<SyncReport, VaultError> {
        let Some(_guard) = SyncGuard::acquire(&self.inner.syncing) else {
            debug!("sync already in progress; skipping");
            return Ok(SyncReport::skipped());
        };

        let pending = self.items_with_status(QueueStatus::Pending).await?;
        if pending.is_empty() {
            debug!("sync queue empty");
            return Ok(SyncReport::default());
        }
        info!(pending = pending.len(), "processing sync queue");

        let mut report = SyncReport::default();
        for mut item in pending {
            report.attempted += 1;
            match self.inner.transport.replay(&item).await {
                Ok(()) => {
                    item.status = QueueStatus::Processed;
                    report.processed += 1;
                }
                Err(e) => {
                    item.retries += 1;
                    if item.retries > self.inner.max_retries {
                        item.status = QueueStatus::Failed;
                        report.failed += 1;
                        let exhausted = VaultError::QueueItemExhausted {
                            id: item.id.clone(),
                            retries: item.retries,
                        };
                        error!(error = %exhausted, cause = %e, "sync item abandoned");
                    } else {
                        report.retried += 1;
                        warn!(id = %item.id, retries = item.retries, error = %e, "sync item failed; will retry");
                    }
                }
            }
            self.persist(&item).await?;
        }

        info!(
            processed = report.processed,
            retried = report.retried,
            failed = report.failed,
            "sync queue processed"
        );
        Ok(report)
    }

    /// Process the queue when online; offline calls are skipped.
    pub async fn sync_all(&self) -> Result<SyncReport, VaultError> {
        if !self.is_online() {
            debug!("offline; sync skipped");
            return Ok(SyncReport::skipped());
        }
        self.process_sync_queue().await
    }

    /// Run [`Self::sync_all`] every `interval`, replacing any running timer.
    pub fn start_auto_sync(&self, interval: Duration) -> Result<(), VaultError> {
        if interval.is_zero() {
            return Err(VaultError::Config("auto-sync interval must be positive".into()));
        }
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticks = IntervalStream::new(interval_at(Instant::now() + interval, interval));
            while ticks.next().await.is_some() {
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = (MutationQueue { inner }).sync_all().await {
                    warn!(error = %e, "scheduled sync failed");
                }
            }
        });

        let mut slot = self.inner.auto_sync.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "auto-sync started");
        Ok(())
    }

    pub fn stop_auto_sync(&self) -> bool {
        let previous = self
            .inner
            .auto_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match previous {
            Some(handle) => {
                handle.abort();
                info!("auto-sync stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.inner
            .auto_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

fn decode_items(records: Vec<Record>) -> Vec<QueueItem> {
    let mut items: Vec<QueueItem> = records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            match record
                .into_value()
                .and_then(|v| serde_json::from_value::<QueueItem>(v).map_err(VaultError::from))
            {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping unreadable queue item");
                    None
                }
            }
        })
        .collect();
    items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    items
}
