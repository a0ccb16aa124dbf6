//! Canvas state and the shared rendering rule.
//!
//! Both the local optimistic path and the remote replay path go through
//! [`render_segment`], so every participant paints a segment identically.

use crate::protocol::{DrawEvent, StrokeSegment};
use kurbo::Point;
use peniko::Color;
use serde::{Deserialize, Serialize};

/// Default pen width in canvas pixels.
pub const DEFAULT_STROKE_WIDTH: f64 = 1.0;

/// Radius of the round eraser brush.
pub const DEFAULT_ERASER_RADIUS: f64 = 40.0;

/// RGBA8 color that can be compared, hashed and stored in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::black()
    }
}

impl From<Color> for Rgba {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}

impl From<Rgba> for Color {
    fn from(color: Rgba) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// How a paint operation combines with existing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composite {
    /// Paint over existing pixels.
    SourceOver,
    /// Remove existing pixels where the brush covers them.
    DestinationOut,
}

/// A single drawing primitive applied to a [`Surface`].
#[derive(Debug, Clone, PartialEq)]
pub enum PaintOp {
    /// Solid line between two points.
    Line { from: Point, to: Point, width: f64, color: Rgba },
    /// Round soft-edged erasure centred on a point.
    Erase { center: Point, radius: f64 },
}

impl PaintOp {
    pub fn composite(&self) -> Composite {
        match self {
            PaintOp::Line { .. } => Composite::SourceOver,
            PaintOp::Erase { .. } => Composite::DestinationOut,
        }
    }
}

/// Pen configuration applied to every segment, local or remote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub width: f64,
    pub color: Rgba,
    pub eraser_radius: f64,
}

impl StrokeStyle {
    /// Pen color for peniko-based renderers.
    pub fn pen_color(&self) -> Color {
        self.color.into()
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            width: DEFAULT_STROKE_WIDTH,
            color: Rgba::black(),
            eraser_radius: DEFAULT_ERASER_RADIUS,
        }
    }
}

/// Turn a stroke segment into the paint operation every client performs.
///
/// Erasing stamps the eraser brush at the segment's destination point;
/// drawing strokes a straight line from `prev` to `curr`.
pub fn render_segment(segment: &StrokeSegment, style: &StrokeStyle) -> PaintOp {
    if segment.erase {
        PaintOp::Erase {
            center: segment.curr,
            radius: style.eraser_radius,
        }
    } else {
        PaintOp::Line {
            from: segment.prev,
            to: segment.curr,
            width: style.width,
            color: style.color,
        }
    }
}

/// Pixel-drawing backend the canvas paints into.
pub trait Surface {
    /// Apply one paint operation.
    fn paint(&mut self, op: &PaintOp);

    /// Reset the surface to fully transparent.
    fn clear(&mut self);
}

/// Surface that records paint operations instead of rasterizing them.
///
/// Two display lists compare equal exactly when the same operations were
/// applied since the last clear, which makes convergence easy to assert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayList {
    ops: Vec<PaintOp>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations painted since the last clear, oldest first.
    pub fn ops(&self) -> &[PaintOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Surface for DisplayList {
    fn paint(&mut self, op: &PaintOp) {
        self.ops.push(op.clone());
    }

    fn clear(&mut self) {
        self.ops.clear();
    }
}

/// Local pointer gesture tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gesture {
    /// Pointer is held down on the canvas.
    pub active: bool,
    /// Last sampled pointer position.
    pub last: Point,
    /// Pointer left the canvas; the next move re-anchors instead of drawing.
    pub rejoin: bool,
}

impl Gesture {
    /// Start a gesture at `position`.
    pub fn begin(&mut self, position: Point) {
        self.active = true;
        self.rejoin = false;
        self.last = position;
    }

    /// Advance to `position`, returning the `(prev, curr)` pair to draw.
    ///
    /// Returns `None` when no gesture is active, or when this move is the
    /// first one after the pointer came back onto the canvas.
    pub fn advance(&mut self, position: Point) -> Option<(Point, Point)> {
        if !self.active {
            return None;
        }
        if self.rejoin {
            self.rejoin = false;
            self.last = position;
            return None;
        }
        let prev = self.last;
        self.last = position;
        Some((prev, position))
    }

    pub fn end(&mut self) {
        self.active = false;
    }

    pub fn leave(&mut self) {
        self.rejoin = true;
    }
}

/// The locally rendered canvas plus the current pointer gesture.
#[derive(Debug, Clone, Default)]
pub struct CanvasState<S: Surface = DisplayList> {
    surface: S,
    gesture: Gesture,
}

impl<S: Surface> CanvasState<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            gesture: Gesture::default(),
        }
    }

    /// Apply a validated draw event.
    pub fn apply(&mut self, event: &DrawEvent, style: &StrokeStyle) {
        match event {
            DrawEvent::StrokeSegment(segment) => self.paint_segment(segment, style),
            DrawEvent::ClearBoard { .. } => self.clear(),
        }
    }

    /// Paint a single stroke segment using the shared rendering rule.
    pub fn paint_segment(&mut self, segment: &StrokeSegment, style: &StrokeStyle) {
        let op = render_segment(segment, style);
        self.surface.paint(&op);
    }

    pub fn clear(&mut self) {
        self.surface.clear();
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub(crate) fn gesture_mut(&mut self) -> &mut Gesture {
        &mut self.gesture
    }
}
