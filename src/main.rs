//! Eridanus main entry point
//!
//! The binary fronts the engine with a handful of modes: serving the JSON
//! command endpoint, crawling seed URLs directly, importing local files,
//! running the native-messaging bridge on stdin/stdout, and installing the
//! bridge manifest.

use clap::{Parser, Subcommand};
use eridanus::command::nmh;
use eridanus::config::{load_config, Config};
use eridanus::fetcher::Fetcher;
use eridanus::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_EXTENSION_ID: &str = "chjkejdbkhankpkdbblplenaicliflpd";

/// Content acquisition and categorization engine
#[derive(Parser, Debug)]
#[command(name = "eridanus")]
#[command(version, about = "Content acquisition engine", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory of the persistent store (overrides config)
    #[arg(long, value_name = "DIR")]
    store: Option<PathBuf>,

    /// Listen port for the command endpoint (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Serve the JSON command endpoint
    Serve,

    /// Crawl one or more seed URLs and print the results
    Fetch {
        /// Seed URLs
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,
    },

    /// Ingest every file under a local directory
    Import {
        /// Directory to walk
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Run the native-messaging bridge on stdin/stdout
    Nmh {
        /// Command endpoint to forward to (defaults to the configured port)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Write the native-messaging host manifest next to the binary
    Install {
        /// Browser extension id permitted to talk to the bridge
        #[arg(long, default_value = DEFAULT_EXTENSION_ID)]
        ext_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(store) = cli.store {
        config.store.root = store;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command {
        Mode::Serve => serve(config).await,
        Mode::Fetch { urls } => fetch(config, urls).await,
        Mode::Import { dir } => import(config, dir).await,
        Mode::Nmh { endpoint } => {
            let endpoint = endpoint
                .unwrap_or_else(|| format!("http://127.0.0.1:{}/", config.server.port));
            let client = reqwest::Client::new();
            let mut stdin = tokio::io::stdin();
            let mut stdout = tokio::io::stdout();
            nmh::run(&mut stdin, &mut stdout, &endpoint, &client).await?;
            Ok(())
        }
        Mode::Install { ext_id } => install(&ext_id),
    }
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("eridanus=info,warn"),
            1 => EnvFilter::new("eridanus=debug,info"),
            2 => EnvFilter::new("eridanus=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Runs the command endpoint until interrupted, then persists the store.
async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("opening store at {}", config.store.root.display());
    let storage = Arc::new(Storage::open(&config.store.root)?);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    };
    eridanus::command::serve(storage.clone(), config.server.port, shutdown).await?;

    storage.close()?;
    tracing::info!("exited gracefully");
    Ok(())
}

/// Crawls the seed URLs and prints accumulated results as yaml.
async fn fetch(config: Config, urls: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Arc::new(Storage::open(&config.store.root)?);
    let fetcher = Fetcher::new(storage.clone(), &config.fetcher)?;

    for seed in urls {
        let url = url::Url::parse(&seed)?;
        tracing::info!("fetching {}", url);
        let (results, errors) = fetcher.fetch(url).await;
        for err in &errors {
            tracing::error!("{}", err);
        }
        println!("{}", serde_yaml::to_string(&results)?);
    }

    storage.close()?;
    Ok(())
}

/// Ingests a local directory tree into content storage.
async fn import(config: Config, dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Arc::new(Storage::open(&config.store.root)?);
    let fetcher = Fetcher::new(storage.clone(), &config.fetcher)?;

    let errors = fetcher.import_dir(&dir).await;
    for err in &errors {
        tracing::error!("{}", err);
    }
    let stored = storage.content().keys()?.len();
    println!("{} item(s) in content storage", stored);

    storage.close()?;
    Ok(())
}

/// Writes the native-messaging host manifest next to the binary.
///
/// Registering the manifest with a browser is left to OS-specific
/// tooling; this produces the file it points at.
fn install(ext_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let exe = std::env::current_exe()?;
    let manifest_path = exe
        .parent()
        .map(|dir| dir.join("manifest.json"))
        .unwrap_or_else(|| PathBuf::from("manifest.json"));

    let manifest = serde_json::json!({
        "name": "net.eridanus.nmh",
        "description": "Eridanus Native Messaging Host",
        "path": format!("./{}", exe.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()),
        "type": "stdio",
        "allowed_origins": [format!("chrome-extension://{}/", ext_id)],
    });

    std::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)?;
    tracing::info!("manifest written to {}", manifest_path.display());
    println!("{}", manifest_path.display());
    Ok(())
}
