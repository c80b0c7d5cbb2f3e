//! Command-line harness for the PwaKit offline layer.
//!
//! Drives a service worker against the real network with buckets persisted
//! on disk, so each invocation sees what earlier ones cached.
//!
//! ## Usage
//!
//! ```bash
//! # Install (and activate) the configured version
//! pwakit --config site.json install
//!
//! # Run a request through the active worker
//! pwakit fetch ./style.css
//! pwakit fetch https://example.com/logo.png --destination image
//!
//! # Control messages
//! pwakit message get-version
//!
//! # Preview the notification for a push payload
//! pwakit push '{"title": "Hello"}'
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use http::Method;
use pwakit_common::{init_logging, LogConfig};
use pwakit_net::{Destination, LoaderConfig, Request, ResourceLoader};
use pwakit_sw::{
    CacheStore, FetchOutcome, FileCacheStore, Notification, OfflineConfig, ServiceWorkerContainer,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "pwakit")]
#[command(about = "Offline cache harness for installable web apps")]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cache buckets
    #[arg(short, long, global = true, default_value = ".pwakit-cache")]
    store: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured version and activate it
    Install,

    /// Run one request through the active worker
    Fetch {
        /// URL, absolute or relative to the scope
        url: String,
        /// Destination kind (document, style, script, font, image); guessed from the URL if omitted
        #[arg(short, long)]
        destination: Option<String>,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Post a control message and print the reply
    Message {
        #[arg(value_enum)]
        kind: MessageKind,
    },

    /// Print the notification a push payload produces
    Push {
        /// Raw payload (JSON or plain text)
        payload: Option<String>,
    },

    /// List buckets and their entry counts
    Buckets,
}

#[derive(Clone, Copy, ValueEnum)]
enum MessageKind {
    SkipWaiting,
    GetVersion,
    ClearCache,
}

impl MessageKind {
    fn wire_type(self) -> &'static str {
        match self {
            Self::SkipWaiting => "SKIP_WAITING",
            Self::GetVersion => "GET_VERSION",
            Self::ClearCache => "CLEAR_CACHE",
        }
    }
}

#[derive(Serialize)]
struct FetchSummary {
    url: String,
    status: u16,
    content_type: Option<String>,
    origin: &'static str,
    bytes: usize,
}

#[derive(Serialize)]
struct BucketSummary {
    name: String,
    entries: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::for_verbosity(cli.verbose);
    if cli.json_logs {
        log_config = log_config.json();
    }
    init_logging(log_config)?;

    let config = load_config(cli.config.as_deref()).await?;
    let store = Arc::new(
        FileCacheStore::open_dir(&cli.store)
            .await
            .with_context(|| format!("opening store {}", cli.store.display()))?,
    );

    match cli.command {
        Commands::Install => install(config, store).await,
        Commands::Fetch {
            url,
            destination,
            method,
        } => fetch(config, store, &url, destination.as_deref(), &method).await,
        Commands::Message { kind } => message(config, store, kind).await,
        Commands::Push { payload } => {
            let notification =
                Notification::from_push(payload.as_deref().map(str::as_bytes), &config.notifications);
            print_json(&notification)
        }
        Commands::Buckets => buckets(store.as_ref()).await,
    }
}

async fn load_config(path: Option<&Path>) -> Result<OfflineConfig> {
    match path {
        Some(path) => Ok(OfflineConfig::load(path).await?),
        None => {
            debug!("No config file given, using defaults");
            Ok(OfflineConfig::default())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Container over the on-disk store and the real network, with events logged.
fn open_container(store: Arc<FileCacheStore>) -> Result<(ServiceWorkerContainer, Arc<ResourceLoader>)> {
    let loader = Arc::new(ResourceLoader::new(LoaderConfig::default())?);
    let (container, mut events) = ServiceWorkerContainer::new(store, loader.clone());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Service worker event");
        }
    });

    Ok((container, loader))
}

async fn install(config: OfflineConfig, store: Arc<FileCacheStore>) -> Result<()> {
    let (container, _) = open_container(store)?;
    let version = config.cache_name();
    let report = container
        .register(config)
        .await
        .with_context(|| format!("installing {}", version))?;
    print_json(&report)
}

async fn fetch(
    config: OfflineConfig,
    store: Arc<FileCacheStore>,
    url: &str,
    destination: Option<&str>,
    method: &str,
) -> Result<()> {
    let url = config.resolve(url)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{}'", method))?;
    let destination = match destination {
        Some(kind) => kind.parse::<Destination>().unwrap_or_default(),
        None => Destination::guess_from_url(&url),
    };

    let (container, loader) = open_container(store)?;
    let version = config.cache_name();
    if container.restore(config).await?.is_none() {
        bail!("{} is not installed; run `pwakit install` first", version);
    }

    let mut request = Request::get(url).with_destination(destination);
    request.method = method;
    info!(url = %request.url, destination = %request.destination, "Fetching");

    let (response, origin) = match container.handle_fetch(&request).await? {
        FetchOutcome::Respond(response) if response.from_cache => (response, "cache"),
        FetchOutcome::Respond(response) => (response, "network"),
        FetchOutcome::Passthrough => (loader.load(&request).await?, "passthrough"),
    };
    container.flush().await;

    print_json(&FetchSummary {
        url: response.url.to_string(),
        status: response.status.as_u16(),
        content_type: response.content_type().map(|m| m.to_string()),
        origin,
        bytes: response.body().len(),
    })
}

async fn message(
    config: OfflineConfig,
    store: Arc<FileCacheStore>,
    kind: MessageKind,
) -> Result<()> {
    let (container, _) = open_container(store)?;
    let version = config.cache_name();
    if container.restore(config).await?.is_none() {
        bail!("{} is not installed; run `pwakit install` first", version);
    }

    let reply = container
        .post_message(json!({ "type": kind.wire_type() }))
        .await;
    print_json(&reply)
}

async fn buckets(store: &FileCacheStore) -> Result<()> {
    let mut summary = Vec::new();
    for name in store.keys().await? {
        let entries = store.entry_keys(&name).await?.len();
        summary.push(BucketSummary { name, entries });
    }
    print_json(&summary)
}
