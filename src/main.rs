//! Model Library CLI
//!
//! Indexes a directory of 3D models and animations and queries the index.

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use model_library::{
    ExtensionClassifier, LibraryConfig, LibraryUpdate, ModelLibrary, ModelOrder, ModelQuery,
    Result,
};

const ABOUT: &str = r#"
Model Library - incremental 3D model and animation indexer

Examples:
  model_library ~/models scan                     index the directory
  model_library ~/models list --search miku       list matching models
  model_library ~/models list --order modified --desc --limit 20
  model_library ~/models favorite add avatars/a.vrm
  model_library ~/models watch --seconds 60       re-index on changes
"#;

/// How long query commands wait for the startup scan
const STARTUP_SCAN_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(name = "model_library")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    /// Library directory holding models and animations
    library: PathBuf,

    /// Number of files processed in parallel
    #[arg(short = 't', long, default_value = "4", global = true)]
    threads: usize,

    /// Report scan progress as JSON lines on stderr
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Name,
    Modified,
}

impl From<OrderArg> for ModelOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Name => ModelOrder::Name,
            OrderArg::Modified => ModelOrder::LastModified,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan pass and print its summary
    Scan {
        #[arg(long)]
        json: bool,
    },
    /// List models, favorites first
    List {
        /// Case-insensitive substring of the model name
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value = "name")]
        order: OrderArg,
        /// Sort descending
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// List animations
    Animations {
        #[arg(long)]
        json: bool,
    },
    /// Manage favorite models
    Favorite {
        #[command(subcommand)]
        action: FavoriteAction,
    },
    /// Watch the library and re-index on changes
    Watch {
        /// Stop after this many seconds (runs until killed when omitted)
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[derive(Subcommand)]
enum FavoriteAction {
    Add { path: String },
    Remove { path: String },
    List {
        #[arg(long)]
        json: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open(cli: &Cli, watch: bool, scan_on_open: bool) -> Result<ModelLibrary> {
    let config = LibraryConfig::builder()
        .library_dir(&cli.library)
        .scan_concurrency(cli.threads)
        .progress(cli.progress)
        .watch(watch)
        .scan_on_open(scan_on_open)
        .build();
    info!("Opening library {:?}", config.library_dir);
    ModelLibrary::open(config, Arc::new(ExtensionClassifier::default()))
}

/// Open the library and wait for the startup scan so queries see fresh data
fn open_scanned(cli: &Cli) -> Result<ModelLibrary> {
    let library = open(cli, false, true)?;
    if !library.wait_for_scan(0, STARTUP_SCAN_TIMEOUT) {
        log::warn!("Startup scan did not finish in time, results may be stale");
    }
    Ok(library)
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Scan { json } => {
            let library = open(cli, false, false)?;
            let summary = library.scan_now()?;
            if *json {
                print_json(&summary)?;
            } else {
                println!("Scan completed:");
                println!("  Files visited: {}", summary.files_visited);
                println!("  Cache hits: {}", summary.cache_hits);
                println!("  Files hashed: {}", summary.files_hashed);
                println!("  Marker models hashed: {}", summary.marker_hashes);
                println!("  Models updated: {}", summary.models_upserted);
                println!("  Animations updated: {}", summary.animations_upserted);
                println!("  Thumbnails found: {}", summary.thumbnails_extracted);
                println!("  Models removed: {}", summary.swept.models);
                println!("  Animations removed: {}", summary.swept.animations);
                println!("  Errors: {}", summary.failed_files);
                println!("  Duration: {}ms", summary.duration_ms);
            }
        }
        Commands::List {
            search,
            order,
            desc,
            offset,
            limit,
            json,
        } => {
            let library = open_scanned(cli)?;
            let mut query = ModelQuery::page(*offset, *limit).with_order((*order).into(), !desc);
            if let Some(search) = search {
                query = query.with_search(search.clone());
            }
            let models = library.models(&query)?;
            if *json {
                print_json(&models)?;
            } else {
                let total = library.total_models(search.as_deref())?;
                for model in &models {
                    let star = if model.favorite { "*" } else { " " };
                    println!("{} [{}] {}  ({})", star, model.model_type(), model.name, model.path);
                }
                println!("{} of {} models", models.len(), total);
            }
        }
        Commands::Animations { json } => {
            let library = open_scanned(cli)?;
            let animations = library.animations()?;
            if *json {
                print_json(&animations)?;
            } else {
                for animation in &animations {
                    println!("{}  ({})", animation.name, animation.path);
                }
                println!("{} animations", animations.len());
            }
        }
        Commands::Favorite { action } => {
            let library = open_scanned(cli)?;
            match action {
                FavoriteAction::Add { path } => library.set_favorite(path, true)?,
                FavoriteAction::Remove { path } => library.set_favorite(path, false)?,
                FavoriteAction::List { json } => {
                    let favorites = library.favorite_models()?;
                    if *json {
                        print_json(&favorites)?;
                    } else {
                        for (index, model) in favorites.iter().enumerate() {
                            println!("{:>3}. {}  ({})", index + 1, model.name, model.path);
                        }
                    }
                }
            }
        }
        Commands::Watch { seconds } => {
            let library = open(cli, true, true)?;
            let updates = library.subscribe_updates();
            let deadline = seconds.map(|s| std::time::Instant::now() + Duration::from_secs(s));
            loop {
                let wait = match deadline {
                    Some(deadline) => {
                        let now = std::time::Instant::now();
                        if now >= deadline {
                            break;
                        }
                        deadline - now
                    }
                    None => Duration::from_secs(3600),
                };
                match updates.recv_timeout(wait) {
                    Ok(LibraryUpdate::ScanCompleted(at)) => {
                        let total = library.total_models(None)?;
                        info!("Library updated at {}: {} models", at.to_rfc3339(), total);
                    }
                    Ok(LibraryUpdate::FavoritesChanged(_)) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            library.close();
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
