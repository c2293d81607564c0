//! Gift registry console client.
//!
//! Runs one guest session against an in-memory catalog seeded from
//! `GIFT_REGISTRY_CATALOG_PATH` and reads commands from stdin.

use gift_registry::config::Config;
use gift_registry::console::{self, Command, HELP};
use gift_registry::identity::IdentityFile;
use gift_registry::metrics::register_registry_metrics;
use gift_registry::session::RegistrySession;
use gift_registry_runtime::metrics::MetricsRecorder;
use gift_registry_testing::InMemoryCatalogStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gift_registry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    config.validate()?;
    info!(
        collection = %config.collection,
        identity = %config.identity_path.display(),
        "Configuration loaded"
    );

    let mut recorder = MetricsRecorder::new();
    if config.metrics_enabled {
        recorder.install()?;
        register_registry_metrics();
    }

    let client = IdentityFile::new(&config.identity_path).load_or_create()?;
    let items = config.load_catalog()?;
    info!(items = items.len(), "Catalog seeded");
    let store = InMemoryCatalogStore::with_items(config.collection.clone(), items)
        .with_retry_policy(config.retry_policy());

    let session = RegistrySession::start(Arc::new(store), client.clone(), config.session_settings()).await?;
    println!("Welcome! You are {client}.");
    println!("{}", session.view().await);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(console::ParseCommandError::Empty) => continue,
            Err(error) => {
                println!("{error}");
                continue;
            },
        };

        match command {
            Command::List => println!("{}", session.view().await),
            Command::Toggle(id) => match session.toggle(&id).await {
                Ok(outcome) => println!("{}", console::describe_toggle(&id, &outcome)),
                Err(error) => warn!(error = %error, "Toggle failed"),
            },
            Command::Save => match session.save().await {
                Ok(outcome) => {
                    println!("{}", console::describe_save(&outcome));
                    println!("{}", session.view().await);
                },
                Err(error) => println!("Save failed: {error}"),
            },
            Command::Staged => println!("{}", console::describe_staged(&session.staged().await)),
            Command::Metrics => match recorder.render() {
                Some(text) => println!("{text}"),
                None => println!("metrics are disabled"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    session.close().await?;
    info!("Goodbye");
    Ok(())
}
