//! DrawSync Application
//!
//! Headless client that joins a shared drawing session, mirrors it onto a
//! raster canvas and saves PNG snapshots.

mod app;
mod cli;

pub use app::{App, AppError, FRAME_INTERVAL};
pub use cli::Cli;
