pub mod backup;
pub mod orchestrator;
pub mod sync_queue;

pub use backup::BackupCoordinator;
pub use orchestrator::DatabaseOrchestrator;
pub use sync_queue::{LocalOnlyTransport, MutationQueue, Subscription, SyncTransport};
