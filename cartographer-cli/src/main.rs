//! Cartographer CLI
//!
//! Command-line interface for map database synchronization.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cartographer_core::{
    download, validate_files, validate_mapdb, BuildResults, BundleOptions, CommandFormatter,
    FallbackSource, ProjectConfig, RoomRecord, SyncEngine, SyncEvent, Tree, TreeBuilder, World,
    BUNDLE_MAPDB_FILE, BUNDLE_SCRIPT_DIR,
};

#[derive(Parser)]
#[command(name = "cartographer")]
#[command(about = "Map database synchronization tool")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./cartographer.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run in DragonRealms mode
    #[arg(long, global = true)]
    dr: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the published map database to the data directory
    #[command(alias = "dl")]
    Download,

    /// Validate a map database file
    #[command(alias = "v")]
    Validate {
        /// Map database file (default: {data dir}/map.json)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Write the map database as a per-room tree suitable for git
    Git {
        /// Map database file (default: {data dir}/map.json, downloaded if missing)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Tree directory (default: data dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate individual room files
    #[command(alias = "vf")]
    ValidateFiles {
        /// room.json files to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a map database from a per-room tree
    #[command(alias = "b")]
    Build {
        /// Write a bundle with extracted scripts instead of a single file
        #[arg(long, alias = "userland")]
        bundle: bool,

        /// Tree directory containing room files
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (standard) or directory (bundle)
        #[arg(short, long)]
        output: PathBuf,

        /// Source map database for script recovery
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Fail rooms whose scripts cannot be recovered
        /// (default: on when --source is given)
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        strict: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cartographer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = ProjectConfig::discover(cli.config.as_deref(), &cwd)
        .context("Failed to load configuration")?;
    if cli.dr {
        config.world = World::Dragonrealms;
    }

    match cli.command {
        Commands::Download => cmd_download(&config).await,
        Commands::Validate { input } => cmd_validate(&config, input).await,
        Commands::Git { input, output } => cmd_git(&config, input, output).await,
        Commands::ValidateFiles { files, json } => cmd_validate_files(files, json).await,
        Commands::Build {
            bundle,
            input,
            output,
            source,
            strict,
        } => cmd_build(bundle, input, output, source, strict).await,
    }
}

/// Download the published map
async fn cmd_download(config: &ProjectConfig) -> Result<ExitCode> {
    let url = config.remote_map_url();
    let dest = config.local_map();
    println!("Downloading {} to {}", url, dest.display());

    let stats = download(&url, &dest)
        .await
        .context("Failed to download map database")?;
    tracing::info!("Downloaded {} bytes from {} to {}", stats.bytes, stats.url, stats.location.display());
    println!("Map database of {:.2}mb successfully downloaded", stats.megabytes());

    Ok(ExitCode::SUCCESS)
}

/// Validate a whole map database
async fn cmd_validate(config: &ProjectConfig, input: Option<PathBuf>) -> Result<ExitCode> {
    let then = Instant::now();
    let path = input.unwrap_or_else(|| config.local_map());
    println!("Validating map database at {}...", path.display());

    let result = validate_mapdb(&path).await?;
    let runtime = then.elapsed().as_millis();

    if result.errors.is_empty() {
        println!("[{}ms] validated {} rooms", runtime, result.rooms.len());
        return Ok(ExitCode::SUCCESS);
    }

    for error in &result.errors {
        let id = error.id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string());
        println!(
            "{:>8}  {:<40}  {}",
            id,
            error.title.as_deref().unwrap_or("Unknown"),
            error
        );
    }
    println!("[{}ms] found {} issues", runtime, result.errors.len());
    Ok(ExitCode::FAILURE)
}

/// Sync the map database into the per-room tree
async fn cmd_git(
    config: &ProjectConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let then = Instant::now();
    let output = output.unwrap_or_else(|| config.data_dir());
    let input = match input {
        Some(input) => input,
        None => {
            let local = config.local_map();
            if !local.exists() {
                let stats = download(&config.remote_map_url(), &local)
                    .await
                    .context("Failed to download map database")?;
                tracing::info!("No local map database, downloaded {} bytes from {}", stats.bytes, stats.url);
            }
            local
        }
    };

    println!(
        "Seeding git version of map database at {} -> {}...",
        input.display(),
        output.display()
    );

    let validated = validate_mapdb(&input).await?;
    let rooms: Vec<RoomRecord> = validated.rooms.into_iter().map(RoomRecord::new).collect();

    let formatter = Arc::new(CommandFormatter::from_config(&config.formatter));
    let engine = SyncEngine::new(Tree::new(&output), formatter)
        .with_batch_size(config.formatter.batch_size);

    let operations = engine
        .run(&rooms, &validated.errors, |event| match event {
            SyncEvent::Room(p) => progress(format!(
                "completed room {} of {} {{errors={}, skipped={}, created={}, updated={}}} [{}%]",
                p.completed,
                p.total,
                p.errors,
                p.skipped,
                p.created,
                p.updated,
                percent(p.completed, p.total)
            )),
            SyncEvent::Format(p) if p.total_batches <= 1 => progress(format!(
                "Processing {} Ruby scripts... [{}%]",
                p.total,
                percent(p.current, p.total)
            )),
            SyncEvent::Format(p) => progress(format!(
                "Processing Ruby scripts (batch {}/{}) - {}/{} files [{}%]",
                p.batch,
                p.total_batches,
                p.current,
                p.total,
                percent(p.current, p.total)
            )),
        })
        .await?;
    println!();

    println!(
        "[{}ms] created={} skipped={} updated={} errors={}",
        then.elapsed().as_millis(),
        operations.created,
        operations.skipped,
        operations.updated,
        operations.errors.len()
    );
    for error in &operations.errors {
        println!("{}", error.err);
    }

    Ok(ExitCode::SUCCESS)
}

/// Validate individual room files
async fn cmd_validate_files(files: Vec<PathBuf>, json: bool) -> Result<ExitCode> {
    let then = Instant::now();
    println!("Validating {} room files...", files.len());

    let report = validate_files(&files).await;
    let runtime = then.elapsed().as_millis();

    if report.errors.is_empty() {
        println!("[{}ms] validated {} files", runtime, report.valid_files);
        return Ok(ExitCode::SUCCESS);
    }

    println!("[{}ms] found {} validation errors", runtime, report.errors.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for error in &report.errors {
            println!(
                "{}  id={}  title={}  {}",
                error.file,
                error.id.map(|id| id.to_string()).unwrap_or_default(),
                error.title.as_deref().unwrap_or(""),
                error.error
            );
        }
    }
    Ok(ExitCode::FAILURE)
}

/// Build a map database or bundle from a tree
async fn cmd_build(
    bundle: bool,
    input: PathBuf,
    output: PathBuf,
    source: Option<PathBuf>,
    strict: Option<bool>,
) -> Result<ExitCode> {
    let then = Instant::now();
    let builder = TreeBuilder::new(&input);
    let kind = if bundle { "bundle" } else { "standard" };
    println!("Building {} map database from {}...", kind, input.display());

    let on_progress = |p: cartographer_core::BuildProgress| {
        progress(format!(
            "Processing room files... {}/{} [{}%]",
            p.current,
            p.total,
            percent(p.current, p.total)
        ))
    };

    let results = if bundle {
        let options = BundleOptions {
            fallback: source.map(FallbackSource::new),
            strict,
        };
        builder.build_bundle(&output, &options, on_progress).await
    } else {
        builder.build_standard(&output, on_progress).await
    }
    .with_context(|| format!("Failed to build {} map database", kind))?;
    println!();
    tracing::info!(
        "Built {} map database from {} rooms into {} ({} errors)",
        kind,
        results.rooms_processed,
        output.display(),
        results.errors.len()
    );

    report_build(&results, bundle, &output, then.elapsed().as_millis());
    Ok(ExitCode::SUCCESS)
}

fn report_build(results: &BuildResults, bundle: bool, output: &Path, runtime: u128) {
    if !results.errors.is_empty() {
        println!(
            "[{}ms] built {} rooms with {} errors",
            runtime,
            results.rooms_processed,
            results.errors.len()
        );
        println!("\nErrors encountered:");
        for error in &results.errors {
            println!("{}: {}", error.file, error.err);
        }
        return;
    }

    if bundle {
        println!(
            "[{}ms] built {} rooms to bundle format in {}",
            runtime,
            results.rooms_processed,
            output.display()
        );
        println!("Created: {}", output.join(BUNDLE_MAPDB_FILE).display());
        println!("Created: {}/", output.join(BUNDLE_SCRIPT_DIR).display());
    } else {
        println!(
            "[{}ms] built {} rooms to {}",
            runtime,
            results.rooms_processed,
            output.display()
        );
    }
}

/// Overwrite the current terminal line
fn progress(line: String) {
    print!("\r\x1b[2K{}", line);
    let _ = std::io::stdout().flush();
}

fn percent(current: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        current * 100 / total
    }
}
