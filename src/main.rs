use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use modscope::cache::Cache;
use modscope::nexus::{NexusClient, StaticCredential};
use modscope::{CancelToken, Config, Engine};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modscope")]
#[command(
    author,
    version,
    about = "Diagnostics engine for Bethesda-game mod collections"
)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the FOMOD installer of one mod file
    Fomod {
        /// Game domain (e.g. skyrimspecialedition)
        #[arg(long)]
        game: String,

        #[arg(long)]
        mod_id: i64,

        #[arg(long)]
        file_id: i64,
    },

    /// Analyze the plugin load order of a collection revision
    LoadOrder {
        /// Collection slug
        #[arg(long)]
        slug: String,

        #[arg(long)]
        revision: u32,
    },

    /// Analyze file conflicts across a collection revision
    Conflicts {
        /// Collection slug
        #[arg(long)]
        slug: String,

        #[arg(long)]
        revision: u32,

        /// Hash file contents to detect byte-identical overwrites (slower)
        #[arg(long)]
        hashes: bool,
    },

    /// Show collection metadata and its latest revision's files
    Collection {
        /// Collection slug
        #[arg(long)]
        slug: String,
    },

    /// List a collection's revision history
    Revisions {
        /// Collection slug
        #[arg(long)]
        slug: String,
    },

    /// Check that the configured API credential resolves
    Validate,

    /// Inspect or maintain the report cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show entry count and payload size
    Stats,

    /// Remove expired entries
    Sweep,

    /// Remove all entries
    Clear,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "modscope=info",
        1 => "modscope=debug",
        _ => "modscope=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn download_progress() -> (ProgressBar, modscope::archive::DownloadProgress) {
    let bar = ProgressBar::hidden();
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let cb_bar = bar.clone();
    let callback: modscope::archive::DownloadProgress = Arc::new(move |downloaded, total| {
        if cb_bar.is_hidden() {
            cb_bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        }
        if let Some(total) = total {
            cb_bar.set_length(total);
        }
        cb_bar.set_position(downloaded);
    });

    (bar, callback)
}

fn print_report<T: serde::Serialize>(report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    println!("{}", json);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();

    if let Commands::Cache { action } = &cli.command {
        let cache = Cache::open(&config.cache_path())?;
        match action {
            CacheCommands::Stats => print_report(&cache.stats()?)?,
            CacheCommands::Sweep => {
                let removed = cache.sweep()?;
                println!("removed {} expired entries", removed);
            }
            CacheCommands::Clear => {
                let removed = cache.clear()?;
                println!("removed {} entries", removed);
            }
        }
        cache.close();
        return Ok(());
    }

    let api_key = config
        .api_key
        .clone()
        .context("NEXUS_API_KEY is not set")?;
    let client = Arc::new(NexusClient::new(
        Arc::new(StaticCredential::new(api_key)),
        &config,
    )?);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match &cli.command {
        Commands::Validate => {
            let valid = client.validate_credential(&cancel).await?;
            if valid {
                println!("credential OK");
                return Ok(());
            }
            anyhow::bail!("credential rejected by the registry");
        }
        Commands::Collection { slug } => {
            let collection = client.get_collection(slug, &cancel).await?;
            return print_report(&collection);
        }
        Commands::Revisions { slug } => {
            let revisions = client.get_revisions(slug, &cancel).await?;
            return print_report(&revisions);
        }
        _ => {}
    }

    let cache = Arc::new(Cache::open(&config.cache_path())?);
    let (bar, progress) = download_progress();
    let engine = Engine::new(&config, client, cache)?.with_progress(progress);

    let result = match cli.command {
        Commands::Fomod {
            game,
            mod_id,
            file_id,
        } => {
            let analysis = engine.analyze_fomod(&cancel, &game, mod_id, file_id).await?;
            bar.finish_and_clear();
            print_report(&analysis)
        }
        Commands::LoadOrder { slug, revision } => {
            let analysis = engine.analyze_load_order(&cancel, &slug, revision).await?;
            bar.finish_and_clear();
            print_report(&analysis)
        }
        Commands::Conflicts {
            slug,
            revision,
            hashes,
        } => {
            let analysis = engine
                .analyze_conflicts(&cancel, &slug, revision, hashes)
                .await?;
            bar.finish_and_clear();
            print_report(&analysis)
        }
        Commands::Validate
        | Commands::Collection { .. }
        | Commands::Revisions { .. }
        | Commands::Cache { .. } => unreachable!(),
    };

    engine.cleanup_scratch();
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        // Engine errors carry a machine-readable kind for consumers.
        if let Some(engine_error) = e.downcast_ref::<modscope::Error>() {
            eprintln!("error [{:?}]: {}", engine_error.kind(), engine_error);
        } else {
            eprintln!("error: {:#}", e);
        }
        std::process::exit(1);
    }
}
