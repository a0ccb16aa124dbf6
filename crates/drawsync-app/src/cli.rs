//! Command line arguments.

use crate::app::AppError;
use clap::Parser;
use drawsync_core::{SessionId, SyncConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Join a shared drawing session and mirror it onto a local canvas.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "drawsync")]
#[command(about = "Join a shared drawing session and mirror it onto a local canvas")]
pub struct Cli {
    /// Session to join. A new id is generated when omitted.
    #[arg(long, env = "DRAWSYNC_SESSION")]
    pub session: Option<String>,

    /// Relay WebSocket endpoint (e.g. ws://localhost:8080/portfolio/websocket)
    #[arg(long, env = "DRAWSYNC_SERVER")]
    pub server: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "DRAWSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the canvas to this PNG file when the session ends
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Seconds to stay in the session; 0 runs until interrupted (Ctrl-C)
    #[arg(long, default_value_t = 0)]
    pub duration: u64,
}

impl Cli {
    /// Session to join, generating one when none was given.
    pub fn session_id(&self) -> SessionId {
        match &self.session {
            Some(id) => SessionId::new(id.as_str()),
            None => {
                let id = SessionId::generate();
                log::info!("Created new session {}", id);
                id
            }
        }
    }

    /// Configuration file (or defaults) with command line overrides applied.
    pub fn sync_config(&self) -> Result<SyncConfig, AppError> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::default(),
        };
        if let Some(server) = &self.server {
            config.endpoint = server.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn run_time(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration))
    }
}
