//! Rendered frames and the deferred G-buffer.

use glam::{Vec3, Vec4};
use image::RgbaImage;
use volray_core::{Error, Result};

use crate::debug::{DebugMode, DebugScale};

/// Per-pixel output of a traversal stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelSample {
    /// Premultiplied colour and coverage.
    pub color: Vec4,
    /// Ray distance to the surface or first visible sample; infinite on miss.
    pub depth: f32,
    pub normal: Vec3,
    pub steps: u32,
    pub skipped: u32,
}

impl PixelSample {
    /// A ray that never entered the volume.
    pub const MISS: Self = Self {
        color: Vec4::ZERO,
        depth: f32::INFINITY,
        normal: Vec3::ZERO,
        steps: 0,
        skipped: 0,
    };

    /// Returns true if the ray found a surface or visible density.
    #[inline]
    pub fn is_hit(&self) -> bool {
        self.depth.is_finite()
    }
}

/// Geometry written by the first deferred pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GBufferTexel {
    pub position: Vec3,
    pub normal: Vec3,
    /// Infinite where no surface was found.
    pub depth: f32,
    pub steps: u32,
    pub skipped: u32,
}

impl GBufferTexel {
    pub const EMPTY: Self = Self {
        position: Vec3::ZERO,
        normal: Vec3::ZERO,
        depth: f32::INFINITY,
        steps: 0,
        skipped: 0,
    };
}

/// Screen-sized G-buffer.
#[derive(Clone, Debug)]
pub struct GBuffer {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<GBufferTexel>,
}

/// A finished frame: RGBA8 colour plus per-pixel depth and counters.
#[derive(Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    depth: Vec<f32>,
    steps: Vec<u32>,
    skipped: Vec<u32>,
}

impl Frame {
    /// Resolve traversal samples into a frame over a background colour.
    pub fn compose(
        width: u32,
        height: u32,
        samples: &[PixelSample],
        debug: DebugMode,
        background: Vec3,
    ) -> Result<Self> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(Error::InvalidData(format!(
                "{} samples for a {width}x{height} frame",
                samples.len()
            )));
        }

        let scale = DebugScale::from_samples(samples);
        let mut rgba = Vec::with_capacity(expected * 4);
        for sample in samples {
            let rgb = debug.shade(sample, &scale).unwrap_or_else(|| {
                sample.color.truncate() + background * (1.0 - sample.color.w)
            });
            rgba.extend_from_slice(&to_rgba8(rgb));
        }

        Ok(Self {
            width,
            height,
            rgba,
            depth: samples.iter().map(|s| s.depth).collect(),
            steps: samples.iter().map(|s| s.steps).collect(),
            skipped: samples.iter().map(|s| s.skipped).collect(),
        })
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes, row-major from the top-left.
    #[inline]
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Per-pixel ray distance, infinite on miss.
    #[inline]
    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    /// Per-pixel sample counts.
    #[inline]
    pub fn steps(&self) -> &[u32] {
        &self.steps
    }

    /// Per-pixel block skip counts.
    #[inline]
    pub fn skipped(&self) -> &[u32] {
        &self.skipped
    }

    /// Colour of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]])
    }

    /// Per-pixel hit mask.
    pub fn hit_mask(&self) -> Vec<bool> {
        self.depth.iter().map(|d| d.is_finite()).collect()
    }

    /// Total density samples over the frame.
    pub fn total_steps(&self) -> u64 {
        self.steps.iter().map(|&s| u64::from(s)).sum()
    }

    /// Copy into an `image` buffer.
    pub fn to_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| Error::InvalidData("frame buffer size mismatch".to_string()))
    }
}

fn to_rgba8(rgb: Vec3) -> [u8; 4] {
    let c = (rgb.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
    [c.x as u8, c.y as u8, c.z as u8, 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misses_show_background() {
        let frame = Frame::compose(2, 1, &[PixelSample::MISS; 2], DebugMode::None, Vec3::new(1.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(frame.pixel(1, 0), Some([255, 0, 0, 255]));
        assert_eq!(frame.hit_mask(), vec![false, false]);
    }

    #[test]
    fn opaque_sample_hides_background() {
        let hit = PixelSample {
            color: Vec4::new(0.0, 1.0, 0.0, 1.0),
            depth: 3.0,
            normal: Vec3::X,
            steps: 10,
            skipped: 2,
        };
        let frame = Frame::compose(1, 1, &[hit], DebugMode::None, Vec3::ONE).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([0, 255, 0, 255]));
        assert_eq!(frame.total_steps(), 10);
        assert!(frame.pixel(1, 0).is_none());
    }

    #[test]
    fn sample_count_must_match() {
        assert!(Frame::compose(2, 2, &[PixelSample::MISS; 3], DebugMode::None, Vec3::ZERO).is_err());
    }

    #[test]
    fn image_conversion_keeps_size() {
        let frame = Frame::compose(3, 2, &[PixelSample::MISS; 6], DebugMode::None, Vec3::ZERO).unwrap();
        assert_eq!(frame.to_image().unwrap().dimensions(), (3, 2));
    }
}
