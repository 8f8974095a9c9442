//! Crop region computation from noisy detector boxes.
//!
//! Pads the detector box, clamps it into the frame, keeps a safety margin
//! from the right/bottom edge and falls back to a centered square whenever
//! the clamped region fails validation. [`CropRegionCalculator::compute`]
//! never fails.

use crate::config::PipelineConfig;
use crate::types::{BoundingBox, CropRegion, FrameSize};
use thiserror::Error;

/// Reasons a detector box cannot be turned into a crop directly.
///
/// Always absorbed by the centered fallback; only surfaces in logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("degenerate frame {width}x{height}")]
    DegenerateFrame { width: u32, height: u32 },
    #[error("degenerate bounding box {0:?}")]
    DegenerateBounds(BoundingBox),
    #[error("padded box does not intersect the frame")]
    OutsideFrame,
    #[error("region ({x}, {y}) {width}x{height} failed validation")]
    InvalidRegion { x: i64, y: i64, width: i64, height: i64 },
}

/// Converts detector boxes into padded crop rectangles inside the frame.
#[derive(Debug, Clone)]
pub struct CropRegionCalculator {
    padding_ratio: f32,
    min_crop_size: i64,
    safety_margin: i64,
    fallback_ratio: f32,
}

impl Default for CropRegionCalculator {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl CropRegionCalculator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            padding_ratio: config.padding_ratio,
            min_crop_size: config.min_crop_size as i64,
            // Right/bottom edges must stay strictly inside the frame even with a zero margin.
            safety_margin: (config.safety_margin as i64).max(1),
            fallback_ratio: config.fallback_ratio,
        }
    }

    /// Compute a crop region for `bounds` inside `frame`.
    pub fn compute(&self, bounds: &BoundingBox, frame: FrameSize) -> CropRegion {
        match self.clamp_to_frame(bounds, frame) {
            Ok(region) => region,
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    ?bounds,
                    frame_width = frame.width,
                    frame_height = frame.height,
                    "crop rejected, using centered fallback"
                );
                self.centered_fallback(frame)
            }
        }
    }

    fn clamp_to_frame(
        &self,
        bounds: &BoundingBox,
        frame: FrameSize,
    ) -> Result<CropRegion, GeometryError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(GeometryError::DegenerateFrame {
                width: frame.width,
                height: frame.height,
            });
        }

        let finite = [bounds.x, bounds.y, bounds.width, bounds.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || bounds.width <= 0.0 || bounds.height <= 0.0 {
            return Err(GeometryError::DegenerateBounds(*bounds));
        }

        let pad_x = bounds.width * self.padding_ratio;
        let pad_y = bounds.height * self.padding_ratio;

        let (x, width) = self.clamp_axis(bounds.x, bounds.width, pad_x, frame.width as i64)?;
        let (y, height) = self.clamp_axis(bounds.y, bounds.height, pad_y, frame.height as i64)?;

        self.validate(x, y, width, height, frame)
    }

    /// Pad, clamp, enforce the minimum size and apply the safety margin along
    /// one axis. Returns `(origin, extent)`.
    fn clamp_axis(
        &self,
        start: f32,
        extent: f32,
        pad: f32,
        limit: i64,
    ) -> Result<(i64, i64), GeometryError> {
        // Clamping just outside [0, limit] leaves the result unchanged and
        // keeps huge finite coordinates from saturating the i64 arithmetic.
        let bound = |v: f32| (v as f64).clamp(-1.0, limit as f64 + 1.0) as i64;
        let mut origin = bound((start - pad).floor());
        let end = bound((start + extent + pad).ceil());
        let mut size = end - origin;

        // Shrink by the clamped amount rather than shifting the region back in.
        if origin < 0 {
            size += origin;
            origin = 0;
        }
        if size <= 0 || origin >= limit {
            return Err(GeometryError::OutsideFrame);
        }

        let available = limit - origin;
        size = size.min(available);
        if size < self.min_crop_size {
            size = self.min_crop_size.min(available);
        }

        let max_size = limit - self.safety_margin - origin;
        if size > max_size {
            size = max_size;
        }

        Ok((origin, size))
    }

    fn validate(
        &self,
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        frame: FrameSize,
    ) -> Result<CropRegion, GeometryError> {
        let valid = x >= 0
            && y >= 0
            && width >= self.min_crop_size.max(1)
            && height >= self.min_crop_size.max(1)
            && x + width < frame.width as i64
            && y + height < frame.height as i64;

        if !valid {
            return Err(GeometryError::InvalidRegion { x, y, width, height });
        }

        Ok(CropRegion {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    /// Centered square covering `fallback_ratio` of the smaller frame side,
    /// re-clamped with the safety margin.
    ///
    /// Frames too small to hold `min_crop_size` plus the margin yield a
    /// smaller (possibly empty) region.
    fn centered_fallback(&self, frame: FrameSize) -> CropRegion {
        let fw = frame.width as i64;
        let fh = frame.height as i64;
        let short = fw.min(fh);

        let side = ((short as f32 * self.fallback_ratio).floor() as i64).max(self.min_crop_size);
        let x = ((fw - side) / 2).max(0);
        let y = ((fh - side) / 2).max(0);

        let width = side.min(fw - self.safety_margin - x).max(0);
        let height = side.min(fh - self.safety_margin - y).max(0);

        CropRegion {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        }
    }
}
