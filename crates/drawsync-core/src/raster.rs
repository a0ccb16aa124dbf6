//! CPU pixel buffer surface.
//!
//! Straight (non-premultiplied) RGBA8 storage. Lines are drawn as
//! anti-aliased capsules with source-over blending; the eraser removes alpha
//! under a soft-edged disc.

use crate::canvas::{PaintOp, Rgba, Surface};
use kurbo::Point;
use thiserror::Error;

/// Raster errors.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Canvas is empty ({0}x{1})")]
    Empty(u32, u32),
    #[error("PNG encoding failed: {0}")]
    Png(#[from] png::EncodingError),
}

/// RGBA8 pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Raster {
    /// Create a fully transparent raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Color of a pixel, or `None` outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some(Rgba::new(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]))
    }

    /// Resize the raster. Like resizing an HTML canvas, contents are dropped.
    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    /// Number of pixels with non-zero alpha.
    pub fn painted_pixels(&self) -> usize {
        self.data.chunks_exact(4).filter(|px| px[3] != 0).count()
    }

    /// Encode the current contents as a PNG image.
    pub fn encode_png(&self) -> Result<Vec<u8>, RasterError> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::Empty(self.width, self.height));
        }
        let mut png_data = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png_data, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.data)?;
        }
        Ok(png_data)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Pixel range covering `[min, max]` in one axis, clamped to `limit`.
    fn span(min: f64, max: f64, limit: u32) -> std::ops::Range<u32> {
        let lo = min.floor().max(0.0) as u32;
        let hi = (max.ceil() + 1.0).clamp(0.0, limit as f64) as u32;
        lo.min(hi)..hi
    }

    fn stroke_line(&mut self, from: Point, to: Point, width: f64, color: Rgba) {
        let half = (width / 2.0).max(0.5);
        let reach = half + 1.0;
        let xs = Self::span(from.x.min(to.x) - reach, from.x.max(to.x) + reach, self.width);
        let ys = Self::span(from.y.min(to.y) - reach, from.y.max(to.y) + reach, self.height);
        let src_alpha = color.a as f64 / 255.0;

        for y in ys {
            for x in xs.clone() {
                let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                let coverage = (half + 0.5 - distance_to_segment(center, from, to)).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    self.blend_over(x, y, color, src_alpha * coverage);
                }
            }
        }
    }

    fn erase_disc(&mut self, center: Point, radius: f64) {
        let reach = radius + 1.0;
        let xs = Self::span(center.x - reach, center.x + reach, self.width);
        let ys = Self::span(center.y - reach, center.y + reach, self.height);

        for y in ys {
            for x in xs.clone() {
                let p = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                let coverage = (radius + 0.5 - p.distance(center)).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    let i = self.offset(x, y) + 3;
                    let alpha = self.data[i] as f64 * (1.0 - coverage);
                    self.data[i] = alpha.round() as u8;
                }
            }
        }
    }

    fn blend_over(&mut self, x: u32, y: u32, color: Rgba, src_alpha: f64) {
        let i = self.offset(x, y);
        let dst_alpha = self.data[i + 3] as f64 / 255.0;
        let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
        if out_alpha <= 0.0 {
            return;
        }
        let src = [color.r, color.g, color.b];
        for (c, s) in src.iter().enumerate() {
            let dst = self.data[i + c] as f64;
            let value = (*s as f64 * src_alpha + dst * dst_alpha * (1.0 - src_alpha)) / out_alpha;
            self.data[i + c] = value.round().clamp(0.0, 255.0) as u8;
        }
        self.data[i + 3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

impl Surface for Raster {
    fn paint(&mut self, op: &PaintOp) {
        match *op {
            PaintOp::Line { from, to, width, color } => self.stroke_line(from, to, width, color),
            PaintOp::Erase { center, radius } => self.erase_disc(center, radius),
        }
    }

    fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// Distance from `p` to the segment `a`-`b`.
fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.hypot2();
    if len_sq < f64::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}
