// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pixel format conversions for camera and video frames.
//!
//! Converts NV12, I420, YUYV and UYVY to packed RGB-family layouts, and
//! reorders channels between RGB-family layouts. Work is dispatched to a
//! scalar, vector (AVX2 / NEON) or parallel backend according to a
//! [`backend::BackendConfig`].
//!
//! ```
//! use pixconv::{color::ConvertFlag, nv12_to_rgb24};
//! let (width, height) = (4, 2);
//! let y = [76u8; 8];
//! let uv = [84u8, 255, 84, 255];
//! let mut rgb = [0u8; 4 * 2 * 3];
//! nv12_to_rgb24(&y, 4, &uv, 4, &mut rgb, 12, width, height, ConvertFlag::DEFAULT).unwrap();
//! assert_eq!(&rgb[..3], &[255, 0, 0]);
//! ```

pub mod backend;
pub mod color;
mod convert;
pub mod frame;
mod inplace;
#[doc(hidden)] // `pub` only for benchmarks.
pub mod row;
pub mod scratch;
mod shuffle;
mod yuv_to_rgb;

pub use convert::*;
pub use inplace::convert_frame;

/// Re-export of the `arrayvec` version used by this crate.
///
/// [`arrayvec::ArrayVec`] is exposed in e.g. [`crate::frame::VideoFrame::planes`], and callers may
/// wish to use matching types.
pub use arrayvec;

use arrayvec::ArrayVec;
use backend::Backend;
use color::ConvertFlag;

/// The maximum number of image planes defined by any supported [`PixelFormat`].
pub const MAX_PLANES: usize = 3;

/// Error type for pixel format conversions.
///
/// Every variant is detected before any destination byte is written.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("{plane} plane stride {stride} is smaller than the {min} bytes needed per row")]
    StrideTooSmall {
        plane: &'static str,
        stride: usize,
        min: usize,
    },

    #[error("{plane} plane holds {len} bytes but {needed} are needed")]
    BufferTooSmall {
        plane: &'static str,
        len: usize,
        needed: usize,
    },

    #[error("{format:?} has {expected} planes, got {actual}")]
    PlaneCount {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("source is {src_width}x{src_height} but destination is {dst_width}x{dst_height}")]
    DimensionMismatch {
        src_width: usize,
        src_height: usize,
        dst_width: usize,
        dst_height: usize,
    },

    #[error("conversion flag {0:?} is ambiguous or has unknown bits")]
    ConflictingFlags(ConvertFlag),

    #[error("conversion from {from:?} to {to:?} is not supported")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    #[error("channel order {order:?} is invalid for {channels} channels")]
    InvalidShuffle { order: [u8; 4], channels: usize },

    #[error("{0} backend is not available")]
    BackendUnavailable(Backend),

    #[error("unknown backend {0:?}")]
    UnknownBackend(String),

    #[error("image dimensions overflow")]
    Overflow,
}

/// Pixel format: layout of pixels in memory, defining the number/meaning
/// of planes including the size of each sample in bits.
///
/// YUV color matrices and ranges are not defined here; see [`color::ConvertFlag`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// [NV12](https://fourcc.org/pixel-format/yuv-nv12/).
    ///
    /// Matches ffmpeg's `AV_PIX_FMT_NV12`: "planar YUV 4:2:0, 12bpp, 1 plane for Y and 1 plane
    /// for the UV components, which are interleaved (first byte U and the following byte V)".
    Nv12,

    /// [I420](https://fourcc.org/pixel-format/yuv-i420/).
    ///
    /// Matches ffmpeg's `AV_PIX_FMT_YUV420P`: "planar YUV 4:2:0, 12bpp, (1 Cr & Cb sample per 2x2 Y samples)".
    ///
    /// For odd-width and odd-height images, the final pixel is not subsampled.
    I420,

    /// [YUYV](https://fourcc.org/pixel-format/yuv-yuy2/), also known as YUY2.
    ///
    /// Matches ffmpeg's `AV_PIX_FMT_YUYV422`: "packed YUV 4:2:2, 16bpp, Y0 Cb Y1 Cr".
    ///
    /// For odd-width images, the width is rounded up to the next multiple of 2,
    /// with the final `Y` as a don't-care byte.
    Yuyv,

    /// [UYVY](https://fourcc.org/pixel-format/yuv-uyvy/).
    ///
    /// Matches ffmpeg's `AV_PIX_FMT_UYVY422`: "packed YUV 4:2:2, 16bpp, Cb Y0 Cr Y1".
    ///
    /// Odd widths are padded as in [`PixelFormat::Yuyv`].
    Uyvy,

    /// Matches ffmpeg's `AV_PIX_FMT_RGB24`: "packed RGB 8:8:8, 24bpp, RGBRGB...".
    Rgb24,

    /// Matches ffmpeg's `AV_PIX_FMT_BGR24`: "packed RGB 8:8:8, 24bpp, BGRBGR...".
    Bgr24,

    /// Matches ffmpeg's `AV_PIX_FMT_RGBA`: "packed RGBA 8:8:8:8, 32bpp, RGBARGBA...".
    Rgba32,

    /// Matches ffmpeg's `AV_PIX_FMT_BGRA`: "packed BGRA 8:8:8:8, 32bpp, BGRABGRA...".
    Bgra32,
}

/// Dimensions of a particular image plane.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PlaneDims {
    /// The stride for a row, in bytes. This may include extra padding.
    pub stride: usize,

    /// The number of rows. This often matches the image height, but some
    /// chroma planes may be subsampled.
    pub rows: usize,
}

impl PlaneDims {
    /// Returns the number of bytes a plane of these dimensions must hold when
    /// each row needs `row_bytes` bytes: the final row may omit its padding.
    #[inline]
    pub(crate) fn required_len(self, row_bytes: usize) -> Option<usize> {
        match self.rows {
            0 => Some(0),
            rows => self.stride.checked_mul(rows - 1)?.checked_add(row_bytes),
        }
    }
}

impl PixelFormat {
    /// Every supported format.
    pub const ALL: [PixelFormat; 8] = [
        PixelFormat::Nv12,
        PixelFormat::I420,
        PixelFormat::Yuyv,
        PixelFormat::Uyvy,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Rgba32,
        PixelFormat::Bgra32,
    ];

    /// Returns the number of planes for this format.
    #[inline]
    pub fn num_planes(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::I420 => 3,
            _ => 1,
        }
    }

    /// Returns true for the YUV family (planar, semi-planar and packed).
    #[inline]
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            PixelFormat::Nv12 | PixelFormat::I420 | PixelFormat::Yuyv | PixelFormat::Uyvy
        )
    }

    /// Returns the bytes per pixel of a packed RGB-family format, or `None` for YUV formats.
    #[inline]
    pub fn rgb_channels(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => Some(4),
            _ => None,
        }
    }

    /// Returns true if this format carries an alpha channel.
    #[inline]
    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba32 | PixelFormat::Bgra32)
    }

    /// Returns true if blue is stored before red.
    #[inline]
    pub fn is_bgr(self) -> bool {
        matches!(self, PixelFormat::Bgr24 | PixelFormat::Bgra32)
    }

    /// Returns the plane dimensions at minimum stride (no extra bytes for padding).
    ///
    /// Panics if a stride overflows; see [`PixelFormat::checked_plane_dims`].
    pub fn min_plane_dims(self, width: usize, height: usize) -> impl Iterator<Item = PlaneDims> {
        self.checked_plane_dims(width, height)
            .expect("stride should not overflow")
            .into_iter()
    }

    /// Returns the plane dimensions at minimum stride, or `None` if a row's
    /// byte length doesn't fit in `usize`.
    pub fn checked_plane_dims(
        self,
        width: usize,
        height: usize,
    ) -> Option<ArrayVec<PlaneDims, MAX_PLANES>> {
        let mut sizes = ArrayVec::<PlaneDims, MAX_PLANES>::new();
        // Overflow-safe divide by two that rounds up.
        let chroma_width = (width >> 1) + (width & 1);
        let chroma_rows = (height >> 1) + (height & 1);
        match self {
            PixelFormat::Yuyv | PixelFormat::Uyvy => {
                sizes.push(PlaneDims {
                    // One 4-byte group per pair of pixels, rounding up.
                    stride: chroma_width.checked_mul(4)?,
                    rows: height,
                });
            }
            PixelFormat::Nv12 => {
                sizes.push(PlaneDims {
                    stride: width,
                    rows: height,
                });
                sizes.push(PlaneDims {
                    // Interleaved U/V pairs.
                    stride: chroma_width.checked_mul(2)?,
                    rows: chroma_rows,
                });
            }
            PixelFormat::I420 => {
                sizes.push(PlaneDims {
                    // Y plane.
                    stride: width,
                    rows: height,
                });
                // U/V planes.
                let chroma_plane_size = PlaneDims {
                    stride: chroma_width,
                    rows: chroma_rows,
                };
                sizes.push(chroma_plane_size);
                sizes.push(chroma_plane_size);
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                sizes.push(PlaneDims {
                    stride: width.checked_mul(3)?,
                    rows: height,
                });
            }
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => {
                sizes.push(PlaneDims {
                    stride: width.checked_mul(4)?,
                    rows: height,
                });
            }
        }
        debug_assert_eq!(sizes.len(), self.num_planes());
        Some(sizes)
    }

    /// Returns human-readable names of the planes for this format.
    pub fn plane_names(self) -> &'static [&'static str] {
        match self {
            PixelFormat::Nv12 => &["Y", "UV"],
            PixelFormat::I420 => &["Y", "U", "V"],
            PixelFormat::Yuyv => &["YUYV"],
            PixelFormat::Uyvy => &["UYVY"],
            PixelFormat::Rgb24 => &["RGB"],
            PixelFormat::Bgr24 => &["BGR"],
            PixelFormat::Rgba32 => &["RGBA"],
            PixelFormat::Bgra32 => &["BGRA"],
        }
    }
}
