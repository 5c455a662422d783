// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! YUV to RGB color-space math.
//!
//! All kernels use 8-bit fixed point: coefficients are scaled by 256 and
//! each channel is `(sum + 128) >> 8`, clamped to `[0, 255]`. The vector
//! backends perform the identical 32-bit integer math, so every backend
//! produces the same bytes.

use std::ops::BitOr;

use crate::ConversionError;

/// YUV to RGB color matrix.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorMatrix {
    /// ITU-R BT.601, standard definition.
    #[default]
    Bt601,

    /// ITU-R BT.709, high definition.
    Bt709,
}

/// YUV sample range.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorRange {
    /// Limited/MPEG range: luma in 16..=235, chroma in 16..=240.
    #[default]
    Video,

    /// Full/JPEG range: 0..=255.
    Full,
}

/// Bit flags describing how YUV input should be interpreted.
///
/// One matrix bit and one range bit may be set; an axis left unset takes its
/// default ([`ColorMatrix::Bt601`], [`ColorRange::Video`]).
///
/// ```
/// use pixconv::color::{ColorMatrix, ColorRange, ConvertFlag};
/// let flag = ConvertFlag::BT709 | ConvertFlag::FULL_RANGE;
/// assert_eq!(flag.resolve(), Ok((ColorMatrix::Bt709, ColorRange::Full)));
/// assert!((ConvertFlag::BT601 | ConvertFlag::BT709).resolve().is_err());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConvertFlag(u32);

impl ConvertFlag {
    pub const BT601: Self = Self(0x1);
    pub const BT709: Self = Self(0x2);
    pub const FULL_RANGE: Self = Self(0x10);
    pub const VIDEO_RANGE: Self = Self(0x20);
    pub const DEFAULT: Self = Self(Self::BT601.0 | Self::VIDEO_RANGE.0);

    const KNOWN: u32 = Self::BT601.0 | Self::BT709.0 | Self::FULL_RANGE.0 | Self::VIDEO_RANGE.0;

    /// Builds a flag from a raw bit pattern. Nothing is validated until [`ConvertFlag::resolve`].
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the bits set in either flag; a `const` form of `|`.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Builds the flag for an explicit matrix and range.
    pub const fn new(matrix: ColorMatrix, range: ColorRange) -> Self {
        let m = match matrix {
            ColorMatrix::Bt601 => Self::BT601.0,
            ColorMatrix::Bt709 => Self::BT709.0,
        };
        let r = match range {
            ColorRange::Video => Self::VIDEO_RANGE.0,
            ColorRange::Full => Self::FULL_RANGE.0,
        };
        Self(m | r)
    }

    /// Returns the matrix and range this flag selects.
    ///
    /// Setting both matrix bits, both range bits, or any unknown bit is an error.
    pub fn resolve(self) -> Result<(ColorMatrix, ColorRange), ConversionError> {
        if self.0 & !Self::KNOWN != 0
            || self.contains(Self::BT601 | Self::BT709)
            || self.contains(Self::FULL_RANGE | Self::VIDEO_RANGE)
        {
            return Err(ConversionError::ConflictingFlags(self));
        }
        let matrix = if self.contains(Self::BT709) {
            ColorMatrix::Bt709
        } else {
            ColorMatrix::Bt601
        };
        let range = if self.contains(Self::FULL_RANGE) {
            ColorRange::Full
        } else {
            ColorRange::Video
        };
        Ok((matrix, range))
    }
}

impl Default for ConvertFlag {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for ConvertFlag {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::fmt::Debug for ConvertFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (flag, name) in [
            (Self::BT601, "BT601"),
            (Self::BT709, "BT709"),
            (Self::FULL_RANGE, "FULL_RANGE"),
            (Self::VIDEO_RANGE, "VIDEO_RANGE"),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !Self::KNOWN;
        if unknown != 0 || first {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        Ok(())
    }
}

/// Fixed-point coefficients of one (matrix, range) combination, scaled by 256.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Coefficients {
    /// Subtracted from luma: 16 for video range, 0 for full range.
    pub y_offset: i32,
    pub y: i32,
    pub r_v: i32,
    pub g_u: i32,
    pub g_v: i32,
    pub b_u: i32,
}

impl Coefficients {
    pub const BT601_VIDEO: Self = Self {
        y_offset: 16,
        y: 298,
        r_v: 409,
        g_u: 100,
        g_v: 208,
        b_u: 516,
    };
    pub const BT601_FULL: Self = Self {
        y_offset: 0,
        y: 256,
        r_v: 351,
        g_u: 86,
        g_v: 179,
        b_u: 443,
    };
    pub const BT709_VIDEO: Self = Self {
        y_offset: 16,
        y: 298,
        r_v: 459,
        g_u: 55,
        g_v: 136,
        b_u: 541,
    };
    pub const BT709_FULL: Self = Self {
        y_offset: 0,
        y: 256,
        r_v: 403,
        g_u: 48,
        g_v: 120,
        b_u: 475,
    };

    pub const fn new(matrix: ColorMatrix, range: ColorRange) -> Self {
        match (matrix, range) {
            (ColorMatrix::Bt601, ColorRange::Video) => Self::BT601_VIDEO,
            (ColorMatrix::Bt601, ColorRange::Full) => Self::BT601_FULL,
            (ColorMatrix::Bt709, ColorRange::Video) => Self::BT709_VIDEO,
            (ColorMatrix::Bt709, ColorRange::Full) => Self::BT709_FULL,
        }
    }

    /// Resolves the coefficients for `flag`, failing on ambiguous flags.
    pub fn for_flag(flag: ConvertFlag) -> Result<Self, ConversionError> {
        let (matrix, range) = flag.resolve()?;
        Ok(Self::new(matrix, range))
    }

    /// Converts one YUV sample to `[r, g, b]`.
    #[inline(always)]
    pub fn apply(&self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let y = (i32::from(y) - self.y_offset) * self.y + 128;
        let u = i32::from(u) - 128;
        let v = i32::from(v) - 128;
        let r = (y + self.r_v * v) >> 8;
        let g = (y - self.g_u * u - self.g_v * v) >> 8;
        let b = (y + self.b_u * u) >> 8;
        [clamp(r), clamp(g), clamp(b)]
    }
}

#[inline(always)]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// A single-sample YUV to RGB conversion function, returning `[r, g, b]`.
pub type Kernel = fn(u8, u8, u8) -> [u8; 3];

pub fn yuv_to_rgb_601_video(y: u8, u: u8, v: u8) -> [u8; 3] {
    Coefficients::BT601_VIDEO.apply(y, u, v)
}

pub fn yuv_to_rgb_601_full(y: u8, u: u8, v: u8) -> [u8; 3] {
    Coefficients::BT601_FULL.apply(y, u, v)
}

pub fn yuv_to_rgb_709_video(y: u8, u: u8, v: u8) -> [u8; 3] {
    Coefficients::BT709_VIDEO.apply(y, u, v)
}

pub fn yuv_to_rgb_709_full(y: u8, u: u8, v: u8) -> [u8; 3] {
    Coefficients::BT709_FULL.apply(y, u, v)
}

/// Returns the single-sample kernel for the given axes.
///
/// The walkers don't go through this table; they resolve [`Coefficients`]
/// once per buffer.
pub fn kernel(is_bt601: bool, is_full_range: bool) -> Kernel {
    match (is_bt601, is_full_range) {
        (true, false) => yuv_to_rgb_601_video,
        (true, true) => yuv_to_rgb_601_full,
        (false, false) => yuv_to_rgb_709_video,
        (false, true) => yuv_to_rgb_709_full,
    }
}
