//! Sample encodings and density ranges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage encoding of the raw samples in a scalar field.
///
/// The discriminants match the tags used by the raw volume header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StorageEncoding {
    /// Unsigned 8-bit samples, normalised by 255.
    Bits8 = 0,
    /// Unsigned 16-bit samples, normalised by 65535.
    Bits16 = 1,
    /// 32-bit float samples already in `[0, 1]`.
    NormalizedF32 = 2,
    /// 64-bit float samples already in `[0, 1]`.
    NormalizedF64 = 3,
    /// Unsigned 32-bit samples with no known value range.
    ///
    /// Fields can be stored with this encoding but not sampled.
    Raw32 = 4,
}

impl StorageEncoding {
    /// Every encoding a field can be stored with.
    pub const ALL: [Self; 5] = [
        Self::Bits8,
        Self::Bits16,
        Self::NormalizedF32,
        Self::NormalizedF64,
        Self::Raw32,
    ];

    /// Parse a header tag.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Bits8),
            1 => Ok(Self::Bits16),
            2 => Ok(Self::NormalizedF32),
            3 => Ok(Self::NormalizedF64),
            4 => Ok(Self::Raw32),
            other => Err(Error::UnsupportedEncoding(format!("unknown tag {other}"))),
        }
    }

    /// Size of one sample in bytes.
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::NormalizedF32 | Self::Raw32 => 4,
            Self::NormalizedF64 => 8,
        }
    }

    /// Divisor that maps a raw sample into `[0, 1]`.
    pub fn normalization(self) -> Result<f64> {
        match self {
            Self::Bits8 => Ok(255.0),
            Self::Bits16 => Ok(65535.0),
            Self::NormalizedF32 | Self::NormalizedF64 => Ok(1.0),
            Self::Raw32 => Err(Error::UnsupportedEncoding(format!(
                "{self} samples cannot be normalised"
            ))),
        }
    }

    /// Returns true if the voxel sampler can normalise this encoding.
    #[inline]
    pub const fn is_samplable(self) -> bool {
        !matches!(self, Self::Raw32)
    }
}

impl fmt::Display for StorageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bits8 => "u8",
            Self::Bits16 => "u16",
            Self::NormalizedF32 => "f32",
            Self::NormalizedF64 => "f64",
            Self::Raw32 => "u32",
        };
        f.write_str(name)
    }
}

impl FromStr for StorageEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u8" | "8" | "uint8" => Ok(Self::Bits8),
            "u16" | "16" | "uint16" => Ok(Self::Bits16),
            "f32" | "float" => Ok(Self::NormalizedF32),
            "f64" | "double" => Ok(Self::NormalizedF64),
            "u32" | "uint32" => Ok(Self::Raw32),
            other => Err(Error::UnsupportedEncoding(format!("unknown encoding `{other}`"))),
        }
    }
}

/// Closed density interval `[low, high]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub low: f32,
    pub high: f32,
}

impl ValueRange {
    /// Create a new range.
    #[inline]
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    /// Range centred on `center` with the given half width.
    #[inline]
    pub fn around(center: f32, half_width: f32) -> Self {
        Self::new(center - half_width, center + half_width)
    }

    /// Returns true if the range holds no value (`low > high`).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    /// Returns true if `value` lies in the closed interval.
    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        value >= self.low && value <= self.high
    }

    /// Closed-interval overlap test.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.low <= other.high && self.high >= other.low
    }

    /// Grow both ends by `amount`.
    #[inline]
    #[must_use]
    pub fn widened(self, amount: f32) -> Self {
        Self::new(self.low - amount, self.high + amount)
    }
}
