//! CLI driver for one content-package import run (`§4.6`).
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use ledger_core::append::{AppendCoordinator, RetryPolicy};
use ledger_core::config::LedgerSettings;
use ledger_core::importer::{ImportRunConfig, Importer, ImporterFeatures};
use ledger_core::metrics::{InMemoryMetricsSink, MetricsSink};
use ledger_core::outbound::postgres::{DbPool, PoolConfig, PostgresLedgerStorage};
use mockable::DefaultClock;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing_subscriber::EnvFilter;

/// `import-package` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "import-package",
    about = "Run a content-package import into the event ledger",
    version
)]
struct CliArgs {
    /// Campaign the seed events are appended to.
    #[arg(long = "campaign-id", value_name = "id")]
    campaign_id: i64,
    /// Root directory of the content package on disk.
    #[arg(long = "package-root", value_name = "path")]
    package_root: PathBuf,
    /// Disable the entity phase, failing the run immediately.
    #[arg(long = "disable-entities")]
    disable_entities: bool,
    /// Disable the edge phase, failing the run immediately.
    #[arg(long = "disable-edges")]
    disable_edges: bool,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<ExitCode> {
    let args = CliArgs::parse();
    let settings = LedgerSettings::load_from_iter(env::args_os().take(1))
        .wrap_err("load LEDGER_* configuration")?;

    let pool = DbPool::new(PoolConfig::new(&settings.database_url))
        .await
        .wrap_err("create database pool")?;
    let storage = Arc::new(PostgresLedgerStorage::new(pool, settings.database_url.clone()));

    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetricsSink::default());
    let retry_policy = RetryPolicy {
        max_ordinal_retries: settings.max_ordinal_retries,
        backoff_base_ms: settings.backoff_base_ms,
        backoff_factor: settings.backoff_factor,
    };
    let coordinator = Arc::new(AppendCoordinator::with_retry_policy(
        storage.clone(),
        metrics.clone(),
        Arc::new(DefaultClock),
        retry_policy,
    ));
    let importer = Importer::new(storage, coordinator, metrics, Arc::new(DefaultClock));

    let config = ImportRunConfig {
        campaign_id: args.campaign_id,
        package_root: args.package_root,
        features: ImporterFeatures {
            importer: true,
            entities: !args.disable_entities,
            edges: !args.disable_edges,
            embeddings: settings.embeddings_enabled,
        },
    };

    let mut rng = SmallRng::from_entropy();
    match importer.run(&config, &mut rng).await {
        Ok(summary) => {
            println!("package_id={}", summary.package_id);
            println!("entity_count={}", summary.entity_count);
            println!("edge_count={}", summary.edge_count);
            println!("tag_count={}", summary.tag_count);
            println!("affordance_count={}", summary.affordance_count);
            println!("chunk_count={}", summary.chunk_count);
            println!("state_digest={}", hex::encode(summary.state_digest));
            println!("import_duration_ms={}", summary.import_duration_ms);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            tracing::error!(outcome = %error, "import-package.run.failed");
            eprintln!("import failed: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}
