use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

pub type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub type ListenerId = u64;

/// Online/offline observer registry; callbacks run synchronously.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<ListenerId, StatusCallback>>,
}

impl Listeners {
    pub fn add(&self, callback: StatusCallback) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, callback);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every registered callback. The registry lock is released first
    /// so a callback may subscribe or unsubscribe.
    pub fn notify(&self, online: bool) {
        let snapshot: Vec<StatusCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for callback in snapshot {
            callback(online);
        }
    }
}

/// Source of connectivity state and transitions.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self, callback: StatusCallback) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId);
}

/// [`NetworkStatus`] driven by the host: it reports transitions through
/// [`ManualNetworkStatus::set_online`].
pub struct ManualNetworkStatus {
    online: AtomicBool,
    listeners: Listeners,
}

impl ManualNetworkStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            listeners: Listeners::default(),
        }
    }

    /// Record a transition; repeated reports of the same state are ignored.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return;
        }
        if online {
            info!("network online");
        } else {
            info!("network offline");
        }
        self.listeners.notify(online);
    }
}

impl Default for ManualNetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for ManualNetworkStatus {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self, callback: StatusCallback) -> ListenerId {
        self.listeners.add(callback)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
