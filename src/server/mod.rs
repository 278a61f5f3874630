//! unishare-server: HTTP API over the SQLite store with a realtime change
//! feed.

pub mod config;
pub mod handlers;
pub mod router;
pub mod service;
pub mod state;
pub mod utils;

use clap::Parser;

use crate::storage::{db_path, Storage};
use crate::validation::WordFilter;

use config::{Cli, Config};
use state::{AppState, SharedState};

#[derive(Debug)]
pub enum ServerError {
    Storage(crate::storage::StorageError),
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Storage(e) => write!(f, "{e}"),
            ServerError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<crate::storage::StorageError> for ServerError {
    fn from(e: crate::storage::StorageError) -> Self {
        ServerError::Storage(e)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// Open storage and load the content filter for `config`.
pub fn build_state(config: &Config) -> Result<SharedState, ServerError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let storage = Storage::open(&db_path(&config.data_dir))?;
    let filter = match &config.blocklist {
        Some(path) => match WordFilter::load(path) {
            Ok(filter) => filter,
            Err(e) => {
                crate::ulog!(
                    "  WARNING: could not read blocklist {}: {}; using built-in list",
                    path.display(),
                    e
                );
                WordFilter::default()
            }
        },
        None => WordFilter::default(),
    };
    Ok(AppState::new(storage, filter, config.thumbnail_url.clone()).into_shared())
}

/// Serve the API on an already-bound listener until the task is dropped.
pub async fn serve(listener: tokio::net::TcpListener, state: SharedState) -> std::io::Result<()> {
    let app = router::build_router(state);
    axum::serve(listener, app).await
}

/// Entry point: parse CLI, open storage, start server.
pub async fn run() -> Result<(), ServerError> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::ulog!("unishare-server starting");
    crate::ulog!("  data directory: {}", config.data_dir.display());
    crate::ulog!("  database: {}", db_path(&config.data_dir).display());
    match &config.thumbnail_url {
        Some(url) => crate::ulog!("  thumbnail webhook: {}", url),
        None => crate::ulog!("  thumbnail webhook: none configured"),
    }

    let state = build_state(&config)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    crate::ulog!("unishare-server listening on http://{}", config.bind_addr);

    serve(listener, state).await?;
    Ok(())
}
