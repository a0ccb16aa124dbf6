//! Sync configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults below.
//!
//! ```json
//! { "endpoint": "ws://relay.example:8080/portfolio/websocket",
//!   "stroke_width": 3.0,
//!   "stroke_color": { "r": 200, "g": 0, "b": 0, "a": 255 } }
//! ```

use crate::canvas::{DEFAULT_ERASER_RADIUS, DEFAULT_STROKE_WIDTH, Rgba, StrokeStyle};
use crate::connection::{ConnectionOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LIVENESS_INTERVAL};
use crate::transport::DEFAULT_ENDPOINT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Largest accepted canvas side, in pixels.
pub const MAX_CANVAS_DIMENSION: u32 = 8192;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for a drawing client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relay WebSocket endpoint.
    pub endpoint: String,
    /// Application-level liveness check cadence.
    pub liveness_interval_ms: u64,
    /// Outgoing transport heart-beat cadence.
    pub transport_heartbeat_ms: u64,
    /// Abandon a connection attempt after this long.
    pub connect_timeout_ms: u64,
    pub stroke_width: f64,
    pub stroke_color: Rgba,
    pub eraser_radius: f64,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL.as_millis() as u64,
            transport_heartbeat_ms: 1000,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            stroke_width: DEFAULT_STROKE_WIDTH,
            stroke_color: Rgba::black(),
            eraser_radius: DEFAULT_ERASER_RADIUS,
            canvas_width: 800,
            canvas_height: 600,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint is empty".to_string()));
        }
        if self.liveness_interval_ms == 0 {
            return Err(ConfigError::Invalid("liveness_interval_ms must be positive".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be positive".to_string()));
        }
        if !(self.stroke_width.is_finite() && self.stroke_width > 0.0) {
            return Err(ConfigError::Invalid(format!("stroke_width {} must be positive", self.stroke_width)));
        }
        if !(self.eraser_radius.is_finite() && self.eraser_radius > 0.0) {
            return Err(ConfigError::Invalid(format!("eraser_radius {} must be positive", self.eraser_radius)));
        }
        for (name, size) in [("canvas_width", self.canvas_width), ("canvas_height", self.canvas_height)] {
            if size == 0 || size > MAX_CANVAS_DIMENSION {
                return Err(ConfigError::Invalid(format!(
                    "{} {} must be between 1 and {}",
                    name, size, MAX_CANVAS_DIMENSION
                )));
            }
        }
        Ok(())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            endpoint: self.endpoint.clone(),
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn transport_heartbeat(&self) -> Duration {
        Duration::from_millis(self.transport_heartbeat_ms)
    }

    pub fn stroke_style(&self) -> StrokeStyle {
        StrokeStyle {
            width: self.stroke_width,
            color: self.stroke_color,
            eraser_radius: self.eraser_radius,
        }
    }
}
