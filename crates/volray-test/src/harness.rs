//! Test harness for headless rendering and visual regression testing.
//!
//! This module renders volumes off-screen on the CPU and compares the results
//! against stored baselines, or one renderer variant against another.

use glam::Vec3;
use image::{ImageBuffer, Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;

use volray_core::GridDims;
use volray_render::{Camera, Frame, RenderConfig, RendererKind, VolumeRenderer};
use volray_volume::ScalarField;

use crate::{Result, TestError, VisualTestConfig};

/// Headless renderer for testing.
///
/// Holds the output configuration; every call builds a fresh renderer for
/// the given field so tests never share acceleration structures.
pub struct HeadlessRenderer {
    config: RenderConfig,
}

impl HeadlessRenderer {
    /// Create a new headless renderer.
    ///
    /// # Arguments
    /// * `width` - Output image width
    /// * `height` - Output image height
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_config(RenderConfig::default().with_resolution(width, height))
    }

    /// Create from a full render configuration.
    pub fn with_config(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Render a field and return the finished frame.
    ///
    /// # Arguments
    /// * `kind` - Renderer variant
    /// * `field` - The scalar field to render
    /// * `camera` - Camera configuration
    pub fn render_frame(
        &self,
        kind: RendererKind,
        field: &Arc<ScalarField>,
        camera: &Camera,
    ) -> Result<Frame> {
        let mut renderer = VolumeRenderer::new(kind, Arc::clone(field), self.config.clone())?;
        renderer.set_camera(camera.clone());
        Ok(renderer.render()?)
    }

    /// Render a field and return the resulting image.
    pub fn render(
        &self,
        kind: RendererKind,
        field: &Arc<ScalarField>,
        camera: &Camera,
    ) -> Result<RgbaImage> {
        Ok(self.render_frame(kind, field, camera)?.to_image()?)
    }

    /// Render the adaptive isosurface and the fixed-step reference from the
    /// same camera and compare them.
    pub fn compare_skip_against_reference(
        &self,
        field: &Arc<ScalarField>,
        camera: &Camera,
    ) -> Result<SkipComparison> {
        let adaptive = self.render_frame(RendererKind::IsosurfaceAdaptive, field, camera)?;
        let reference = self.render_frame(RendererKind::IsosurfaceReference, field, camera)?;

        let coverage_mismatch = adaptive
            .hit_mask()
            .iter()
            .zip(reference.hit_mask())
            .filter(|(a, r)| **a != *r)
            .count();
        let image_difference = compare_images(&adaptive.to_image()?, &reference.to_image()?)?;

        Ok(SkipComparison {
            coverage_mismatch,
            adaptive_steps: adaptive.total_steps(),
            reference_steps: reference.total_steps(),
            skipped_blocks: adaptive.skipped().iter().map(|&s| u64::from(s)).sum(),
            image_difference,
        })
    }

    /// Get the output dimensions.
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }
}

/// Adaptive against fixed-step rendering of one view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkipComparison {
    /// Pixels where exactly one of the two found a surface.
    pub coverage_mismatch: usize,
    pub adaptive_steps: u64,
    pub reference_steps: u64,
    pub skipped_blocks: u64,
    /// Normalized colour difference (0.0-1.0).
    pub image_difference: f64,
}

impl SkipComparison {
    /// Reference samples per adaptive sample.
    pub fn step_ratio(&self) -> f64 {
        self.reference_steps as f64 / self.adaptive_steps.max(1) as f64
    }
}

/// Visual regression test runner.
///
/// Compares rendered images against baseline images and reports differences.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
    renderer: HeadlessRenderer,
}

impl VisualRegressionTest {
    /// Create a new visual regression test runner.
    ///
    /// # Arguments
    /// * `config` - Test configuration
    pub fn new(config: VisualTestConfig) -> Result<Self> {
        let renderer = HeadlessRenderer::new(256, 256)?;
        Ok(Self { config, renderer })
    }

    /// Create with custom dimensions.
    pub fn with_dimensions(config: VisualTestConfig, width: u32, height: u32) -> Result<Self> {
        let renderer = HeadlessRenderer::new(width, height)?;
        Ok(Self { config, renderer })
    }

    /// Run a test case against a field.
    ///
    /// # Arguments
    /// * `name` - Test case name (used for baseline filename)
    /// * `kind` - Renderer variant
    /// * `field` - The field to render
    /// * `camera` - Camera configuration
    pub fn run_test(
        &self,
        name: &str,
        kind: RendererKind,
        field: &Arc<ScalarField>,
        camera: &Camera,
    ) -> Result<()> {
        let image = self.renderer.render(kind, field, camera)?;
        self.compare_and_save(name, &image)
    }

    fn compare_and_save(&self, name: &str, image: &RgbaImage) -> Result<()> {
        std::fs::create_dir_all(&self.config.baseline_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let baseline_path = format!("{}/{}.png", self.config.baseline_dir, name);
        let output_path = format!("{}/{}.png", self.config.output_dir, name);

        image.save(&output_path)?;

        if Path::new(&baseline_path).exists() {
            let baseline = image::open(&baseline_path)?.to_rgba8();

            let diff = compare_images(&baseline, image)?;
            if diff > self.config.threshold {
                let diff_path = format!("{}/{}_diff.png", self.config.output_dir, name);
                create_diff_image(&baseline, image).save(&diff_path)?;

                return Err(TestError::ImageComparison(format!(
                    "Image difference {:.4} exceeds threshold {:.4} (see {})",
                    diff, self.config.threshold, diff_path
                )));
            }
        } else {
            image.save(&baseline_path)?;
            tracing::info!("Created new baseline: {}", baseline_path);
        }

        Ok(())
    }
}

/// Compare two images and return the normalized difference (0.0-1.0).
pub fn compare_images(a: &RgbaImage, b: &RgbaImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }

    let total_diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            (0..3)
                .map(|c| u64::from(pa[c].abs_diff(pb[c])))
                .sum::<u64>()
        })
        .sum();

    let max_diff = (u64::from(a.width()) * u64::from(a.height()) * 3 * 255) as f64;
    Ok(total_diff as f64 / max_diff)
}

/// Create a visual diff image highlighting differences in red.
pub fn create_diff_image(a: &RgbaImage, b: &RgbaImage) -> RgbaImage {
    let (width, height) = a.dimensions();
    let mut diff = ImageBuffer::new(width, height);

    for (x, y, pixel) in diff.enumerate_pixels_mut() {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);

        let max_diff = (0..3).map(|c| pa[c].abs_diff(pb[c])).max().unwrap_or(0);
        if max_diff > 10 {
            *pixel = Rgba([255, 0, 0, 255]);
        } else {
            // Original image dimmed
            *pixel = Rgba([pa[0] / 2, pa[1] / 2, pa[2] / 2, 255]);
        }
    }

    diff
}

/// Create a test camera looking down -Z at the centre of a unit-scale grid.
pub fn create_test_camera(dims: GridDims, distance_factor: f32) -> Camera {
    let center = dims.to_vec3() / 2.0;
    let distance = dims.z as f32 * distance_factor;

    Camera {
        position: Vec3::new(center.x, center.y, center.z + distance),
        direction: Vec3::NEG_Z,
        up: Vec3::Y,
        fov: std::f32::consts::FRAC_PI_4,
        aspect: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volray_volume::generate;

    fn temp_config(tag: &str) -> VisualTestConfig {
        let root = std::env::temp_dir().join(format!("volray-visual-{tag}-{}", std::process::id()));
        VisualTestConfig {
            threshold: 0.001,
            baseline_dir: root.join("baselines").display().to_string(),
            output_dir: root.join("output").display().to_string(),
        }
    }

    fn sphere() -> Arc<ScalarField> {
        Arc::new(generate::sphere(GridDims::splat(32), 8.0).unwrap())
    }

    #[test]
    fn identical_images_have_no_difference() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        assert_eq!(compare_images(&image, &image).unwrap(), 0.0);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let a = RgbaImage::new(4, 4);
        let b = RgbaImage::new(4, 5);
        assert!(matches!(compare_images(&a, &b), Err(TestError::ImageComparison(_))));
    }

    #[test]
    fn diff_image_marks_changed_pixels() {
        let a = RgbaImage::from_pixel(2, 1, Rgba([100, 100, 100, 255]));
        let mut b = a.clone();
        b.put_pixel(1, 0, Rgba([200, 100, 100, 255]));

        let diff = create_diff_image(&a, &b);
        assert_eq!(diff.get_pixel(0, 0).0, [50, 50, 50, 255]);
        assert_eq!(diff.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn render_sphere_from_test_camera() {
        let renderer = HeadlessRenderer::new(32, 32).unwrap();
        let camera = create_test_camera(GridDims::splat(32), 2.0);
        let frame = renderer
            .render_frame(RendererKind::IsosurfaceAdaptive, &sphere(), &camera)
            .unwrap();
        assert_eq!(renderer.dimensions(), (32, 32));
        // Centre pixel looks straight through the sphere.
        assert!(frame.hit_mask()[16 * 32 + 16]);
    }

    #[test]
    fn baseline_created_then_matched() {
        let config = temp_config("baseline");
        let test = VisualRegressionTest::with_dimensions(config.clone(), 24, 24).unwrap();
        let camera = create_test_camera(GridDims::splat(32), 2.0);
        let field = sphere();

        test.run_test("sphere", RendererKind::IsosurfaceAdaptive, &field, &camera)
            .unwrap();
        assert!(Path::new(&format!("{}/sphere.png", config.baseline_dir)).exists());
        test.run_test("sphere", RendererKind::IsosurfaceAdaptive, &field, &camera)
            .unwrap();

        // A different variant against the same baseline fails.
        let err = test
            .run_test("sphere", RendererKind::DirectVolume, &field, &camera)
            .unwrap_err();
        assert!(matches!(err, TestError::ImageComparison(_)));

        let _ = std::fs::remove_dir_all(Path::new(&config.baseline_dir).parent().unwrap());
    }

    #[test]
    fn skip_comparison_on_sphere() {
        let renderer = HeadlessRenderer::with_config(
            RenderConfig::default()
                .with_resolution(32, 32)
                .with_block_counts(GridDims::splat(8)),
        )
        .unwrap();
        let camera = create_test_camera(GridDims::splat(32), 2.0);
        let cmp = renderer.compare_skip_against_reference(&sphere(), &camera).unwrap();

        assert!(cmp.coverage_mismatch <= 2);
        assert!(cmp.skipped_blocks > 0);
        assert!(cmp.step_ratio() > 3.0);
    }
}
