//! Deterministic face-crop normalization for the recognition model.
//!
//! Resize (bilinear) → BT.601 luma → global histogram equalization →
//! replicate the equalized plane into a planar `[1, 3, S, S]` f32 tensor with
//! values in `[0, 255]`. The order matters: equalizing once on the luma plane
//! and then replicating keeps signatures compatible with ones registered
//! earlier.

use crate::config::PipelineConfig;
use image::{DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView4};
use thiserror::Error;

// ITU-R BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("cannot normalize an empty {width}x{height} image")]
    EmptyImage { width: u32, height: u32 },
}

/// Planar NCHW tensor in the layout the recognition model consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array4<f32>,
}

impl NormalizedTensor {
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// `[batch, channels, height, width]`.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Values in memory order (channel-major, each plane row-major).
    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.data.iter()
    }
}

/// Produces [`NormalizedTensor`]s from cropped face images.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    size: usize,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl ImageNormalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            size: config.input_size,
        }
    }

    pub fn normalize(&self, image: &DynamicImage) -> Result<NormalizedTensor, NormalizeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(NormalizeError::EmptyImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let mut plane = {
            let rgb = image.to_rgb8();
            let resized = resize_bilinear(&rgb, self.size);
            to_luma(&resized)
        };

        equalize_histogram(&mut plane);

        Ok(NormalizedTensor {
            data: replicate_planar(&plane, self.size),
        })
    }
}

/// Resize an RGB image to `size`×`size` with bilinear interpolation
/// (half-pixel centers, edge-clamped sampling). Returns packed RGB bytes.
fn resize_bilinear(src: &RgbImage, size: usize) -> Vec<u8> {
    let width = src.width() as usize;
    let height = src.height() as usize;
    let raw = src.as_raw();

    let scale_x = width as f32 / size as f32;
    let scale_y = height as f32 / size as f32;

    let mut out = vec![0u8; size * size * CHANNELS];

    for y in 0..size {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..size {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..CHANNELS {
                let tl = raw[(y0 * width + x0) * CHANNELS + c] as f32;
                let tr = raw[(y0 * width + x1) * CHANNELS + c] as f32;
                let bl = raw[(y1 * width + x0) * CHANNELS + c] as f32;
                let br = raw[(y1 * width + x1) * CHANNELS + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                out[(y * size + x) * CHANNELS + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Packed RGB → single luma plane.
fn to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(CHANNELS)
        .map(|px| {
            let y = LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Build the 256-entry equalization table for a grayscale plane.
///
/// `lut[i] = round((cdf[i] - cdf_min) / (total - cdf_min) * 255)`, clipped to
/// `[0, 255]`. A single-valued plane has no spread to redistribute and maps
/// through the identity table.
pub fn equalization_lut(plane: &[u8]) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for &p in plane {
        hist[p as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    cdf[0] = hist[0];
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i];
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let denom = plane.len() as f32 - cdf_min as f32;

    let mut lut = [0u8; 256];
    if denom <= 0.0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    for i in 0..256 {
        let val = (cdf[i] as f32 - cdf_min as f32) / denom * 255.0;
        lut[i] = val.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Global histogram equalization in place.
pub fn equalize_histogram(plane: &mut [u8]) {
    let lut = equalization_lut(plane);
    for p in plane.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// Grayscale → 3-channel planar tensor: R = G = B = Y.
fn replicate_planar(plane: &[u8], size: usize) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, CHANNELS, size, size));

    for y in 0..size {
        for x in 0..size {
            let value = plane[y * size + x] as f32;
            tensor[[0, 0, y, x]] = value;
            tensor[[0, 1, y, x]] = value;
            tensor[[0, 2, y, x]] = value;
        }
    }

    tensor
}
