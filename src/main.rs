use chrono::Local;
use crm_vault::db::schema::SchemaCatalog;
use crm_vault::platform::{LocalFileSystem, ManualNetworkStatus};
use crm_vault::types::backup::BackupOutcome;
use crm_vault::{Config, Vault};
use mimalloc::MiMalloc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        app_root = %cfg.app_root.display(),
        backend = ?cfg.storage_backend,
        loglevel = %cfg.loglevel,
        auto_backup_hours = cfg.auto_backup_hours,
        auto_sync_secs = cfg.auto_sync_secs
    );

    let network = Arc::new(ManualNetworkStatus::default());
    let vault = Vault::start(
        &cfg,
        SchemaCatalog::standard(),
        Arc::new(LocalFileSystem),
        network,
    )
    .await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let result = run_command(&vault, &cfg, &args).await;
    vault.shutdown().await;
    result
}

async fn run_command(
    vault: &Vault,
    cfg: &Config,
    args: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    match args {
        ["stats"] => {
            let stats = vault.orchestrator.get_statistics().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        ["backup"] => report_outcomes("backup", vault.backups.backup_all_databases().await),
        ["backup", module] => {
            let path = vault.backups.backup_database(module).await?;
            info!(module, path = %path.display(), "backup complete");
        }
        ["restore"] => report_outcomes("restore", vault.backups.restore_all_databases().await),
        ["restore", module] => {
            let summary = vault.backups.restore_database(module).await?;
            info!(module, records = summary.total(), "restore complete");
        }
        ["sync"] => {
            let report = vault.sync.sync_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ["ledger", customer, rest @ ..] => {
            let statement = vault
                .ledger
                .statement(customer, Local::now().date_naive())
                .await?;
            if rest == ["csv"] {
                let path = vault.exporter.export_csv(customer, &statement.entries).await?;
                info!(path = %path.display(), "ledger CSV written");
            } else {
                println!("{}", serde_json::to_string_pretty(&statement)?);
            }
        }
        [] | ["run"] => {
            vault.start_schedules(cfg)?;
            info!("running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
        }
        other => {
            warn!(args = ?other, "unknown command");
            eprintln!(
                "usage: crm-vault [run | stats | backup [module] | restore [module] | sync | ledger <customer_id> [csv]]"
            );
        }
    }
    Ok(())
}

fn report_outcomes(operation: &str, outcomes: BTreeMap<String, BackupOutcome>) {
    for (module, outcome) in &outcomes {
        match &outcome.error {
            None => info!(operation, module = %module, "ok"),
            Some(e) => error!(operation, module = %module, error = %e, "failed"),
        }
    }
}
