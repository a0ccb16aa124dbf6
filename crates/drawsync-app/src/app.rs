//! Headless session client.

use crate::cli::Cli;
use drawsync_core::{
    ConfigError, ConnectionState, DrawSyncEngine, Raster, RasterError, StompWebSocket, SyncConfig,
    Transport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Time between two engine pumps.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Snapshot error: {0}")]
    Raster(#[from] RasterError),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A session member that only watches: it keeps a raster copy of the shared
/// canvas and can save it as a PNG.
pub struct App<T: Transport> {
    engine: DrawSyncEngine<T, Raster>,
    snapshot: Option<PathBuf>,
    run_time: Option<Duration>,
    stop: Arc<AtomicBool>,
}

impl App<StompWebSocket> {
    /// Build an app connected through the STOMP WebSocket transport.
    pub fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let config = cli.sync_config()?;
        let transport = StompWebSocket::with_heartbeat(config.transport_heartbeat());
        Ok(Self::with_transport(cli, &config, transport))
    }
}

impl<T: Transport> App<T> {
    pub fn with_transport(cli: &Cli, config: &SyncConfig, transport: T) -> Self {
        let session = cli.session_id();
        log::info!("Joining session {} via {}", session, config.endpoint);
        let raster = Raster::new(config.canvas_width, config.canvas_height);
        Self {
            engine: DrawSyncEngine::new(session, transport, raster, config),
            snapshot: cli.snapshot.clone(),
            run_time: cli.run_time(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &DrawSyncEngine<T, Raster> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DrawSyncEngine<T, Raster> {
        &mut self.engine
    }

    /// Flag that ends [`App::run`] at the next frame once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Pump the engine every frame until the run time is over or a stop is
    /// requested, then leave the session and write the snapshot.
    pub fn run(&mut self) -> Result<(), AppError> {
        let started = Instant::now();
        let mut last_state = self.engine.connection_state();
        loop {
            let now = Instant::now();
            if self.stop.load(Ordering::SeqCst) {
                log::info!("Stop requested, leaving session");
                break;
            }
            if self.run_time.is_some_and(|limit| now.duration_since(started) >= limit) {
                break;
            }
            self.engine.pump_at(now);

            let state = self.engine.connection_state();
            if state != last_state {
                log::debug!("Connection state {:?} -> {:?}", last_state, state);
                last_state = state;
            }
            thread::sleep(FRAME_INTERVAL);
        }
        self.finish()
    }

    /// Leave the session and write the snapshot if one was requested.
    pub fn finish(&mut self) -> Result<(), AppError> {
        self.engine.shutdown();
        if let Some(path) = self.snapshot.clone() {
            self.write_snapshot(&path)?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.engine.connection_state() == ConnectionState::Connected
    }

    /// Save the current canvas as a PNG image.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), AppError> {
        let png_data = self.engine.surface().encode_png()?;
        std::fs::write(path, &png_data).map_err(|source| AppError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!(
            "Wrote {}x{} snapshot to {}",
            self.engine.surface().width(),
            self.engine.surface().height(),
            path.display()
        );
        Ok(())
    }
}
