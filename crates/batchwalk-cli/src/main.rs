//! Demo CLI: walk an in-memory record set in batches.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use batchwalk_core::domain::{ExecutionContext, Filter, Record, RecordId, SortOrder};
use batchwalk_core::impls::{InMemoryRecordStore, ProcedureRegistry};
use batchwalk_core::observability::QueueStats;
use batchwalk_core::{AppBuilder, BatchError, BatchwalkConfig};

const TOUCH_PROCEDURE: &str = "Demo.Touch";
const SUMMARY_PROCEDURE: &str = "Demo.Summary";

#[derive(Parser)]
#[command(name = "batchwalk")]
#[command(about = "Run cursor-based batch walks on a serial background queue")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed an in-memory store and walk it
    Walk(WalkArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    /// Commit every record's pending changes
    Recommit,
    /// Run a demo procedure once per record
    Procedure,
}

#[derive(Args)]
struct WalkArgs {
    /// Entity the records belong to, optionally as a `//Module.Entity` path
    #[arg(long, default_value = "Demo.Record")]
    entity: String,

    /// Number of records to seed (ids 1..=N)
    #[arg(long, default_value_t = 25)]
    records: u64,

    /// Records per page
    #[arg(long, default_value_t = 10)]
    page_size: usize,

    /// Walk ids from high to low
    #[arg(long)]
    descending: bool,

    /// Return as soon as the first page is queued
    #[arg(long)]
    no_wait: bool,

    /// Make the demo procedure fail on this record id
    #[arg(long)]
    fail_on: Option<u64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "procedure")]
    action: Action,
}

#[derive(Serialize)]
struct Outcome {
    action: &'static str,
    ok: bool,
    touched: u64,
    queue: QueueStats,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BatchwalkConfig> {
    let config = match path {
        Some(path) => BatchwalkConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BatchwalkConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn walk_filter(entity: &str) -> anyhow::Result<Filter> {
    Filter::parse_path(entity).with_context(|| format!("invalid --entity {entity:?}"))
}

fn seed(entity: &str, records: u64) -> Arc<InMemoryRecordStore> {
    let store = InMemoryRecordStore::new();
    for id in 1..=records {
        let mut record = Record::new(RecordId::new(id), entity).with_attribute("revision", 0);
        record.set("revision", 1);
        store.insert(record);
    }
    Arc::new(store)
}

fn demo_procedures(
    fail_on: Option<u64>,
    touched: Arc<AtomicU64>,
) -> anyhow::Result<ProcedureRegistry> {
    let mut registry = ProcedureRegistry::new();

    let counter = Arc::clone(&touched);
    registry.register(
        TOUCH_PROCEDURE,
        move |_ctx: ExecutionContext, param: Option<Record>| {
            let counter = Arc::clone(&counter);
            async move {
                let Some(record) = param else {
                    return Ok(());
                };
                if Some(record.id.get()) == fail_on {
                    return Err(BatchError::Handler {
                        record: record.id,
                        message: "demo failure requested".to_string(),
                    });
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    )?;

    registry.register(SUMMARY_PROCEDURE, move |ctx: ExecutionContext, _param| {
        let touched = touched.load(Ordering::SeqCst);
        async move {
            info!(context = %ctx, touched, "walk summary");
            Ok(())
        }
    })?;

    Ok(registry)
}

async fn walk(args: WalkArgs) -> anyhow::Result<()> {
    if args.fail_on.is_some() && matches!(args.action, Action::Recommit) {
        bail!("--fail-on only applies to --action procedure");
    }

    let filter = walk_filter(&args.entity)?;
    let config = load_config(args.config.as_ref())?;
    let store = seed(&filter.entity, args.records);
    let touched = Arc::new(AtomicU64::new(0));
    let procedures = demo_procedures(args.fail_on, Arc::clone(&touched))?;

    let app = AppBuilder::new()
        .config(config)
        .store(store.clone())
        .procedures(Arc::new(procedures))
        .build()?;

    let order = SortOrder::from_ascending(!args.descending);
    let wait = !args.no_wait;

    let ok = match args.action {
        Action::Recommit => {
            app.recommit_in_batches(filter, args.page_size, wait, order).await?
        }
        Action::Procedure => {
            app.execute_procedure_in_batches(filter, TOUCH_PROCEDURE, args.page_size, wait, order)
                .await?
        }
    };

    app.run_in_queue(SUMMARY_PROCEDURE)?;
    info!(stats = ?app.stats(), wait, "walk handed to the queue");
    let queue = app.queue().handle();
    // With --no-wait the walk is still running here; shutdown waits for it.
    app.shutdown().await?;

    let outcome = Outcome {
        action: match args.action {
            Action::Recommit => "recommit",
            Action::Procedure => "procedure",
        },
        ok,
        touched: match args.action {
            Action::Recommit => store.commits(),
            Action::Procedure => touched.load(Ordering::SeqCst),
        },
        queue: queue.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !ok {
        bail!("batch walk failed, see the log for details");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Walk(args) => walk(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchwalk_core::ports::RecordStore;

    #[test]
    fn walk_args_parse() {
        let cli = Cli::try_parse_from([
            "batchwalk",
            "walk",
            "--entity",
            "//Sales.Order",
            "--records",
            "5",
            "--no-wait",
            "--action",
            "recommit",
        ])
        .unwrap();
        let Commands::Walk(args) = cli.command;
        assert_eq!(args.entity, "//Sales.Order");
        assert_eq!(args.records, 5);
        assert!(args.no_wait);
        assert!(matches!(args.action, Action::Recommit));
    }

    #[tokio::test]
    async fn path_style_entity_selects_the_seeded_records() {
        let filter = walk_filter("//Sales.Order").unwrap();
        assert_eq!(filter.entity, "Sales.Order");

        let store = seed(&filter.entity, 7);
        let count = store
            .count(&ExecutionContext::system(), &filter)
            .await
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn empty_entity_path_is_rejected() {
        assert!(walk_filter("//").is_err());
    }
}
