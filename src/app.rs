use crate::config::Config;
use crate::db::schema::{SYSTEM_MODULE, SchemaCatalog};
use crate::error::VaultError;
use crate::ledger::{LedgerEngine, LedgerExporter};
use crate::platform::fs::FileSystem;
use crate::platform::network::NetworkStatus;
use crate::service::{
    BackupCoordinator, DatabaseOrchestrator, LocalOnlyTransport, MutationQueue, SyncTransport,
};
use std::sync::Arc;
use tracing::info;

/// Every service of the persistence layer, wired together once at start-up.
pub struct Vault {
    pub orchestrator: Arc<DatabaseOrchestrator>,
    pub backups: BackupCoordinator,
    pub sync: MutationQueue,
    pub ledger: LedgerEngine,
    pub exporter: LedgerExporter,
}

impl Vault {
    /// Open every database and wire the services, replaying through
    /// [`LocalOnlyTransport`].
    pub async fn start(
        config: &Config,
        catalog: SchemaCatalog,
        fs: Arc<dyn FileSystem>,
        network: Arc<dyn NetworkStatus>,
    ) -> Result<Self, VaultError> {
        Self::start_with_transport(config, catalog, fs, network, Arc::new(LocalOnlyTransport)).await
    }

    pub async fn start_with_transport(
        config: &Config,
        catalog: SchemaCatalog,
        fs: Arc<dyn FileSystem>,
        network: Arc<dyn NetworkStatus>,
        transport: Arc<dyn SyncTransport>,
    ) -> Result<Self, VaultError> {
        catalog.describe();
        let orchestrator = Arc::new(DatabaseOrchestrator::new(config, catalog));
        orchestrator.initialize_all().await?;

        let system = orchestrator.database(SYSTEM_MODULE).await?;
        let sync = MutationQueue::new(system, network, transport, config.sync_max_retries);
        orchestrator.attach_sync_queue(sync.clone());

        let backups = BackupCoordinator::new(orchestrator.clone(), fs.clone(), config.backup_dir());
        let ledger = LedgerEngine::new(orchestrator.clone());
        let exporter = LedgerExporter::new(fs, config.exports_dir());

        info!(app_root = %config.app_root.display(), backend = ?config.storage_backend, "vault started");
        Ok(Self {
            orchestrator,
            backups,
            sync,
            ledger,
            exporter,
        })
    }

    /// Start the configured schedulers; a zero interval leaves one off.
    pub fn start_schedules(&self, config: &Config) -> Result<(), VaultError> {
        if let Some(interval) = config.auto_backup_interval() {
            self.backups.start_auto_backup(interval)?;
        }
        if let Some(interval) = config.auto_sync_interval() {
            self.sync.start_auto_sync(interval)?;
        }
        Ok(())
    }

    /// Delete every logical database and recreate them empty.
    ///
    /// Schedules are stopped and stay off. The sync queue is rebuilt over the
    /// new `system` database, so clones of the old [`Vault::sync`] go stale.
    pub async fn delete_all_databases(&mut self) -> Result<(), VaultError> {
        self.backups.stop_auto_backup();
        self.sync.stop_auto_sync();
        self.orchestrator.delete_all_databases().await?;
        self.orchestrator.initialize_all().await?;

        let system = self.orchestrator.database(SYSTEM_MODULE).await?;
        self.sync = self.sync.rebind(system);
        self.orchestrator.attach_sync_queue(self.sync.clone());
        info!("all databases recreated empty");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.backups.stop_auto_backup();
        self.sync.stop_auto_sync();
        self.orchestrator.close_all().await;
        info!("vault shut down");
    }
}
