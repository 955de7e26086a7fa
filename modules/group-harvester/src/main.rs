use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use group_harvester::browser::ChromiumLauncher;
use group_harvester::scheduler;
use group_harvester::store::{
    CsvRecordStore, FileWatermarkStore, FsEvidenceStore, PostgresRecordStore,
};
use group_harvester::traits::RecordStore;
use group_harvester::{HarvestSettings, Harvester};
use harvest_common::Config;

#[derive(Parser)]
#[command(name = "group-harvester", about = "Harvest keyword-matching group posts with screenshot evidence")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one harvest and exit
    Run,
    /// Harvest now and then on a fixed interval until interrupted
    Watch {
        /// Minutes between runs (overrides HARVEST_INTERVAL_MINUTES)
        #[arg(long)]
        interval_minutes: Option<u64>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("group_harvester=info,browser_session=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresRecordStore::connect(url).await?;
            store.migrate().await?;
            info!("Recording harvested posts to Postgres");
            Ok(Arc::new(store))
        }
        None => {
            let path = config.results_csv_path();
            info!(path = %path.display(), "Recording harvested posts to CSV");
            Ok(Arc::new(CsvRecordStore::new(path)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env()?;

    let harvester = Harvester::new(
        HarvestSettings::from_config(&config),
        record_store(&config).await?,
        Arc::new(FileWatermarkStore::new(config.watermark_path())),
        Arc::new(FsEvidenceStore::new(config.screenshots_dir())),
    );
    let launcher = ChromiumLauncher::from_config(&config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            scheduler::run_once(&harvester, &launcher).await?;
        }
        Command::Watch { interval_minutes } => {
            let interval = interval_minutes
                .map(|m| std::time::Duration::from_secs(m.max(1) * 60))
                .unwrap_or(config.interval);
            info!(interval_secs = interval.as_secs(), "Watching group");
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            scheduler::run_every(interval, shutdown, || harvester.run(&launcher)).await;
        }
    }

    Ok(())
}
