//! # kb-sync CLI
//!
//! ## Usage
//!
//! ```bash
//! kb-sync --config ./config/kb-sync.toml [command]
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | *(none)* / `run` | Sync forever, one cycle per configured interval |
//! | `on_demand` | Run exactly one cycle and exit |
//! | `serve` | Run one cycle per `POST /salesforce-etl` request |
//! | `ledger` | Print the dedup ledger |

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use kb_sync::config::{self, Config};
use kb_sync::dedup::Dedup;
use kb_sync::pipeline::{log_report, Pipeline};
use kb_sync::{logging, server};

const DEFAULT_CONFIG_PATH: &str = "./config/kb-sync.toml";

/// kb-sync: sync published Salesforce knowledge articles into a retrieval API.
#[derive(Parser)]
#[command(
    name = "kb-sync",
    about = "Sync published Salesforce knowledge articles into a retrieval API",
    version
)]
struct Cli {
    /// Path to configuration file (TOML) [default: ./config/kb-sync.toml].
    ///
    /// Secrets missing from the file are read from the environment
    /// (SALESFORCE_*, API_UPSERT_URL, BEARER_TOKEN_UPSERT). Without this
    /// flag a missing default file means environment-only configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync forever: run a cycle, wait `pipeline.interval_minutes`, repeat.
    ///
    /// A failed cycle is logged and retried at the next interval.
    Run,

    /// Run exactly one cycle and exit.
    #[command(name = "on_demand", alias = "once")]
    OnDemand {
        /// Extract and transform only; nothing is upserted or recorded.
        #[arg(long)]
        dry_run: bool,

        /// Exit non-zero when the cycle fails.
        #[arg(long)]
        strict: bool,
    },

    /// Start the HTTP trigger on `[server].bind`.
    Serve,

    /// Print the dedup ledger.
    Ledger,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json)?;

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_config_or_env(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let mut pipeline = Pipeline::from_config(&cfg)?;
            tracing::info!(
                interval_minutes = cfg.pipeline.interval_minutes,
                dedup = pipeline.dedup().name(),
                "starting sync loop"
            );
            pipeline
                .run_loop(cfg.pipeline.interval(), async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        // no signal handler available; run until killed
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Commands::OnDemand { dry_run, strict } => {
            let mut pipeline = Pipeline::from_config(&cfg)?;
            if dry_run {
                let report = pipeline.dry_run().await?;
                println!("sync (dry-run)");
                println!("  extracted: {}", report.extracted);
                println!("  already synced: {}", report.skipped);
                println!("  would upsert: {}", report.would_submit);
                return Ok(());
            }
            match pipeline.run_cycle().await {
                Ok(report) => {
                    log_report(&report);
                    println!("sync");
                    println!("  extracted: {}", report.extracted);
                    println!("  already synced: {}", report.skipped);
                    println!("  upserted: {}", report.loaded);
                    println!("ok");
                }
                Err(e) => {
                    tracing::error!(stage = %e.stage, error = %e, "cycle failed");
                    if strict {
                        return Err(e.into());
                    }
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ledger => print_ledger(&cfg)?,
    }

    Ok(())
}

fn print_ledger(cfg: &Config) -> anyhow::Result<()> {
    match Dedup::from_config(&cfg.pipeline) {
        Dedup::Ledger(store) => {
            let ledger = store.load()?;
            println!("ledger {}", store.path().display());
            println!("  entries: {}", ledger.len());
            for (record_id, external_id) in ledger.iter() {
                println!("  {:<20} {}", record_id, external_id);
            }
        }
        other => {
            println!("dedup strategy is '{}': no ledger file in use", other.name());
        }
    }
    Ok(())
}
