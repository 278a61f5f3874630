//! Configuration types and constants for the UniShare API server.

use std::path::PathBuf;

use clap::Parser;

pub(crate) const MAX_WS_CONNECTIONS: usize = 64;
/// Largest resource file accepted by `POST /api/resources/:id/file`.
pub(crate) const MAX_UPLOAD_SIZE: u64 = 25 * 1024 * 1024; // 25 MiB
pub(crate) const DEFAULT_GROUP_PAGE_SIZE: u32 = 6;
pub(crate) const MAX_GROUP_PAGE_SIZE: u32 = 50;
pub(crate) const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;
pub(crate) const MAX_NOTIFICATION_LIMIT: u32 = 200;
pub(crate) const THUMBNAIL_TIMEOUT_SECS: u64 = 10;

/// API server for UniShare: resources, likes, comments, follows, study
/// groups and invitations, with a realtime change feed.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug, Default)]
#[command(name = "unishare-server", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: UNISHARE_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database and uploaded files [env: UNISHARE_HOME] [default: ~/.unishare]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Webhook that regenerates resource thumbnails [env: UNISHARE_THUMBNAIL_URL]
    #[arg(long)]
    pub thumbnail_url: Option<String>,

    /// Newline-separated list of blocked words [env: UNISHARE_BLOCKLIST]
    #[arg(long)]
    pub blocklist: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub thumbnail_url: Option<String>,
    pub blocklist: Option<PathBuf>,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| env("UNISHARE_HOME").map(PathBuf::from))
            .unwrap_or_else(|| {
                env("HOME")
                    .map(|h| PathBuf::from(h).join(".unishare"))
                    .unwrap_or_else(|| PathBuf::from(".unishare"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| env("UNISHARE_BIND"))
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());

        let thumbnail_url = cli
            .thumbnail_url
            .or_else(|| env("UNISHARE_THUMBNAIL_URL"))
            .filter(|url| !url.trim().is_empty());

        let blocklist = cli
            .blocklist
            .or_else(|| env("UNISHARE_BLOCKLIST").map(PathBuf::from));

        Self {
            bind_addr,
            data_dir,
            thumbnail_url,
            blocklist,
        }
    }
}
