//! DrawSync Core Library
//!
//! Realtime stroke synchronization for shared whiteboard canvases: the
//! session connection state machine, the drawing-event protocol and the
//! canvas it is replayed onto.

pub mod canvas;
pub mod config;
pub mod connection;
pub mod engine;
pub mod protocol;
pub mod raster;
pub mod transport;

pub use canvas::{CanvasState, DisplayList, PaintOp, Rgba, StrokeStyle, Surface};
pub use config::{ConfigError, MAX_CANVAS_DIMENSION, SyncConfig};
pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, Heartbeat};
pub use engine::{DrawSyncEngine, Inbound};
pub use protocol::{DrawEvent, ParticipantId, SessionId, StrokeSegment};
pub use raster::{Raster, RasterError};
pub use transport::{MemoryRelay, MemoryTransport, StompWebSocket, Transport, TransportError, TransportEvent};
