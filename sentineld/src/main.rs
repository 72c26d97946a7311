//! Process entry point (§6 CLI surface, §4.8): reads `config.json` from the
//! working directory, opens the Postgres persistence backend, and runs the
//! supervisor until a shutdown signal arrives.
//!
//! No direct teacher source — `zebrad`'s own `main.rs`/`application.rs`
//! weren't retained in the pack, only its manifest — so this follows the
//! manifest's dependency list (`color-eyre`, `tracing-subscriber` with an
//! env filter, `tracing-error`) rather than any specific teacher file.

use std::process::ExitCode;
use std::sync::Arc;

use sentinel_network::config::Config;
use sentinel_network::supervisor::Supervisor;
use sentinel_store::{Persistence, PostgresStore};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const CONFIG_PATH: &str = "config.json";

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().expect("color-eyre should install exactly once");
    install_tracing();

    let config = match Config::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "failed to load {CONFIG_PATH}");
            return ExitCode::FAILURE;
        }
    };

    let database_url = config.database.connection_url();
    let store = match PostgresStore::connect(&database_url).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(%error, "failed to connect to persistence store");
            return ExitCode::FAILURE;
        }
    };
    let closeable_store = store.clone();
    let store: Arc<dyn Persistence> = Arc::new(store);

    let supervisor = Supervisor::new(config, store);
    let result = supervisor.run().await;
    closeable_store.close().await;

    if let Err(error) = result {
        tracing::error!(%error, "supervisor exited with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
