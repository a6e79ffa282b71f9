use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{PipelineApi, PipelineClient, PipelineConfig};
use crate::runner::RunnerConfig;
use crate::store::{AddOutcome, Registry};
use crate::{audit, registry, store};

#[derive(Parser)]
#[command(name = "pipectl")]
enum Cli {
    /// Drive the batch audit pipeline in offset chunks until exhausted
    Audit(AuditArgs),
    /// Submit pending registry records to the processing pipeline
    Registry(RegistryArgs),
    /// Fetch the current status of a pipeline run
    Status(StatusArgs),
    /// Add an equipment type to the local registry
    Add(AddArgs),
    /// Show registry record counts
    Stats(StatsArgs),
    /// List pending registry records for a sector
    List(ListArgs),
}

#[derive(clap::Args)]
struct AuditArgs {
    /// Pipeline server base URL (falls back to $PIPECTL_BASE_URL, then localhost:3000)
    #[arg(long)]
    base_url: Option<String>,
    /// Items per batch
    #[arg(long, default_value = "10")]
    chunk_size: u64,
    /// Offset to resume from
    #[arg(long, default_value = "0")]
    offset: u64,
}

#[derive(clap::Args)]
struct RegistryArgs {
    /// Pipeline server base URL (falls back to $PIPECTL_BASE_URL, then localhost:3000)
    #[arg(long)]
    base_url: Option<String>,
    /// Records per batch
    #[arg(long, default_value = "5")]
    chunk_size: u64,
    /// Registry file
    #[arg(long, default_value = store::DEFAULT_PATH)]
    path: PathBuf,
}

#[derive(clap::Args)]
struct StatusArgs {
    /// Pipeline server base URL (falls back to $PIPECTL_BASE_URL, then localhost:3000)
    #[arg(long)]
    base_url: Option<String>,
    /// Run identifier returned at submission
    #[arg(long)]
    run_id: String,
}

#[derive(clap::Args)]
struct AddArgs {
    /// Sector key, e.g. `energy`
    sector: String,
    /// Group within the sector, e.g. `turbines`
    group: String,
    /// Equipment type (identity key within the group)
    r#type: String,
    /// Equipment category (defaults to `unknown`)
    category: Option<String>,
    /// Registry file
    #[arg(long, default_value = store::DEFAULT_PATH)]
    path: PathBuf,
}

#[derive(clap::Args)]
struct StatsArgs {
    /// Registry file
    #[arg(long, default_value = store::DEFAULT_PATH)]
    path: PathBuf,
}

#[derive(clap::Args)]
struct ListArgs {
    /// Sector key; omit to list available sectors
    sector: Option<String>,
    /// Registry file
    #[arg(long, default_value = store::DEFAULT_PATH)]
    path: PathBuf,
}

/// Cancellation token tripped by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, finishing up...");
            trigger.cancel();
        }
    });
    cancel
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli {
        Cli::Audit(args) => {
            let client = PipelineClient::new(&PipelineConfig::resolve(args.base_url));
            let config = RunnerConfig {
                chunk_size: args.chunk_size,
                ..RunnerConfig::audit_defaults()
            };
            let cancel = cancel_on_ctrl_c();
            audit::run(&client, &config, args.offset, &cancel).await?;
            Ok(())
        }

        Cli::Registry(args) => {
            let client = PipelineClient::new(&PipelineConfig::resolve(args.base_url));
            let config = RunnerConfig {
                chunk_size: args.chunk_size,
                ..RunnerConfig::registry_defaults()
            };
            let cancel = cancel_on_ctrl_c();
            registry::run(&client, &config, &args.path, &cancel).await?;
            Ok(())
        }

        Cli::Status(args) => {
            let client = PipelineClient::new(&PipelineConfig::resolve(args.base_url));
            let status = client.run_status(&args.run_id).await?;
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "runId": args.run_id,
                "status": status.state.as_str(),
                "results": {
                    "generated": status.results.generated,
                    "written": status.results.written,
                },
            }))?;
            println!("{json}");
            Ok(())
        }

        Cli::Add(args) => {
            let mut registry = Registry::load_or_create(&args.path)?;
            match registry.add_item(
                &args.sector,
                &args.group,
                &args.r#type,
                args.category.as_deref(),
            )? {
                AddOutcome::Added => {
                    registry.save()?;
                    eprintln!("added: {} to {}/{}", args.r#type, args.sector, args.group);
                }
                AddOutcome::Duplicate => {
                    eprintln!(
                        "skipping: {} already exists in {}/{}",
                        args.r#type, args.sector, args.group
                    );
                }
            }
            Ok(())
        }

        Cli::Stats(args) => {
            let registry = Registry::load_or_create(&args.path)?;
            let stats = registry.stats();
            println!("registry stats:");
            println!("total types: {}", stats.total_count);
            for (sector, count) in &stats.sectors {
                println!("  {sector}: {count}");
            }
            Ok(())
        }

        Cli::List(args) => {
            let registry = Registry::load_or_create(&args.path)?;
            let sector = args.sector.as_deref().unwrap_or_default();
            match registry.pending_in_sector(sector) {
                Some(pending) => {
                    println!("pending items in {sector}:");
                    for (group, item_type) in &pending {
                        println!("[{group}] {item_type}");
                    }
                }
                None => {
                    eprintln!("please specify a valid sector:");
                    for name in registry.sector_names() {
                        eprintln!("- {name}");
                    }
                    return Err("unknown sector".into());
                }
            }
            Ok(())
        }
    }
}
