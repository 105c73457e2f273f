//! Saving frames to image files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;
use volray_core::{Error, Result};

use crate::frame::Frame;

/// Which frames of a sequence to save, and where.
#[derive(Clone, Debug, Default)]
pub struct ScreenshotConfig {
    /// Output path pattern (use `{}` for frame number placeholder).
    pub output_pattern: String,
    /// Frame indices to capture.
    pub frames: HashSet<u64>,
}

impl ScreenshotConfig {
    /// Create a new screenshot configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output pattern.
    #[must_use]
    pub fn with_output(mut self, pattern: impl Into<String>) -> Self {
        self.output_pattern = pattern.into();
        self
    }

    /// Add multiple frames to capture.
    #[must_use]
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = u64>) -> Self {
        self.frames.extend(frames);
        self
    }

    /// Get the output path for a specific frame.
    ///
    /// A pattern without `{}` names the same file for every frame.
    pub fn output_path(&self, frame: u64) -> PathBuf {
        PathBuf::from(self.output_pattern.replace("{}", &frame.to_string()))
    }

    /// Check if a frame should be captured.
    pub fn should_capture(&self, frame: u64) -> bool {
        self.frames.contains(&frame)
    }

    /// Number of frames needed to reach every requested index.
    pub fn sequence_len(&self) -> u64 {
        self.frames.iter().max().map_or(0, |&last| last + 1)
    }
}

/// Parse frame indices from a string like "0,5,10-15,20".
///
/// Supports:
/// - Single frames: "0", "5", "10"
/// - Comma-separated: "0,5,10"
/// - Ranges: "0-5" (inclusive)
/// - Mixed: "0,5-10,20"
pub fn parse_frame_indices(s: &str) -> Result<HashSet<u64>> {
    let mut frames = HashSet::new();
    let parse = |v: &str| {
        v.trim()
            .parse::<u64>()
            .map_err(|_| Error::config(format!("invalid frame index `{v}`")))
    };

    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(Error::config(format!("empty frame range `{part}`")));
            }
            frames.extend(start..=end);
        } else {
            frames.insert(parse(part)?);
        }
    }

    Ok(frames)
}

/// Save a frame as an image (format from the file extension).
pub fn save_frame(frame: &Frame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    frame
        .to_image()?
        .save(path)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    info!("Screenshot saved: {}", path.display());
    Ok(())
}
