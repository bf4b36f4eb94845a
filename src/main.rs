use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use stoner_backup::db::ensure_target_schema;
use stoner_backup::import::IMPORT_ORDER;
use stoner_backup::{
    http, pipeline, Actor, AppError, PipelineConfig, PipelineContext, PipelineError, StoreEngine,
    TargetStore,
};

#[derive(Debug, Parser)]
#[command(name = "stoner-backup", about = "Stoner database backup and import", version)]
struct Cli {
    /// Target engine (`postgresql` or `sqlite`). Overrides STONER_DB_ENGINE.
    #[arg(long, global = true)]
    engine: Option<String>,
    /// SQLite database path. Overrides STONER_SQLITE_PATH.
    #[arg(long, global = true)]
    sqlite_path: Option<PathBuf>,
    /// Backup directory. Overrides STONER_BACKUP_DIR.
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the `/backup` HTTP routes.
    Serve {
        /// Listen address. Overrides STONER_BIND.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Export the target database into the backup directory.
    Export {
        /// Emit the export outcome as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Import a SQLite file or PostgreSQL text dump into the target database.
    Import { file: PathBuf },
    /// List backup artifacts, newest first.
    List,
    /// Print row counts of the target tables.
    Stats,
}

fn main() {
    stoner_backup::init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(engine) = cli.engine.as_deref() {
        config.engine =
            StoreEngine::from_slug(engine).ok_or_else(|| anyhow!("unknown engine {engine:?}"))?;
    }
    if let Some(path) = cli.sqlite_path {
        config.sqlite_path = path;
    }
    if let Some(dir) = cli.backup_dir {
        config.backup_dir = dir;
    }

    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    runtime.block_on(async move {
        let store = TargetStore::connect(&config)
            .await
            .context("connect to target database")?;
        ensure_target_schema(&store)
            .await
            .context("prepare target schema")?;
        let result = dispatch(cli.command, store.clone(), config).await;
        store.close().await;
        result
    })
}

async fn dispatch(command: Commands, store: TargetStore, mut config: PipelineConfig) -> Result<()> {
    if let Commands::Serve { bind: Some(bind) } = &command {
        config.bind = bind.clone();
    }
    let ctx = PipelineContext::new(store, config);
    let actor = Actor::cli();

    match command {
        Commands::Serve { .. } => {
            let addr: SocketAddr = ctx
                .config
                .bind
                .parse()
                .with_context(|| format!("invalid listen address {}", ctx.config.bind))?;
            http::serve(ctx, addr).await.context("serve HTTP")?;
        }
        Commands::Export { json } => {
            let outcome = pipeline::export_database(&ctx, &actor)
                .await
                .map_err(pipeline_failure)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).context("serialize export outcome")?
                );
            } else {
                println!("Backup written: {} ({} bytes)", outcome.filename, outcome.size_bytes);
                for pruned in &outcome.pruned {
                    println!("Pruned old backup: {pruned}");
                }
            }
        }
        Commands::Import { file } => {
            let guard = ctx.begin_operation().map_err(pipeline_failure)?;
            let staged = pipeline::stage_file(&ctx, &file)
                .await
                .map_err(pipeline_failure)?;
            let report = pipeline::import_staged(&ctx, &guard, &actor, staged)
                .await
                .map_err(pipeline_failure)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serialize import report")?
            );
        }
        Commands::List => {
            let artifacts = pipeline::list_artifacts(&ctx)
                .await
                .map_err(pipeline_failure)?;
            if artifacts.is_empty() {
                println!("No backups in {}", ctx.config.backup_dir.display());
            }
            for info in artifacts {
                println!("{}\t{}\t{}", info.filename, info.size_bytes, info.created_at);
            }
        }
        Commands::Stats => {
            let counts = ctx.store.table_counts().await.context("count rows")?;
            let payload = json!({
                "engine": ctx.store.engine(),
                "tables": IMPORT_ORDER
                    .iter()
                    .map(|table| json!({ "table": table, "rows": counts.get(table.name()) }))
                    .collect::<Vec<_>>(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("serialize stats")?
            );
        }
    }
    Ok(())
}

fn pipeline_failure(err: PipelineError) -> anyhow::Error {
    anyhow::Error::from(AppError::from(err))
}
