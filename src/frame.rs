// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Image descriptors.
//!
//! [`Image`] and [`ImageMut`] borrow caller-owned planes for a single
//! conversion. [`VideoFrame`] owns its planes consecutively in one `Vec` and
//! can be reformatted in place with [`crate::Converter::convert_frame`].
//!
//! ```
//! # use pixconv::{PixelFormat, frame::VideoFrame};
//! // Allocates a 1920x1080 NV12 frame, rows padded to 64 bytes.
//! let frame = VideoFrame::new(PixelFormat::Nv12, 1920, 1080).with_padding(64);
//! assert_eq!(frame.planes().len(), 2);
//! assert_eq!(frame.image().planes()[1].stride(), 1920);
//! ```

use arrayvec::ArrayVec;

use crate::{color::ConvertFlag, ConversionError, PixelFormat, PlaneDims, MAX_PLANES};

/// Vertical order of rows written by a conversion.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    #[default]
    TopDown,

    /// Destination row `height - 1 - y` receives source row `y`.
    BottomUp,
}

impl Orientation {
    /// Splits a signed height, where a negative value requests a vertical flip.
    #[inline]
    pub fn from_height(height: isize) -> (usize, Orientation) {
        let orientation = if height < 0 {
            Orientation::BottomUp
        } else {
            Orientation::TopDown
        };
        (height.unsigned_abs(), orientation)
    }
}

/// Read access to one image plane.
#[derive(Copy, Clone, Debug)]
pub struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
}

impl<'a> Plane<'a> {
    #[inline]
    pub fn new(data: &'a [u8], stride: usize) -> Self {
        Self { data, stride }
    }

    /// Returns the stride of the plane in bytes.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns `len` bytes starting at row `r`. Panics if out of bounds.
    #[inline]
    pub(crate) fn row(&self, r: usize, len: usize) -> &'a [u8] {
        let start = r * self.stride;
        &self.data[start..start + len]
    }
}

/// Write access to one image plane.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    stride: usize,
}

impl<'a> PlaneMut<'a> {
    #[inline]
    pub fn new(data: &'a mut [u8], stride: usize) -> Self {
        Self { data, stride }
    }

    /// Returns the stride of the plane in bytes.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }
}

/// Checks that `len` bytes at `stride` hold a plane of `min` dimensions.
fn check_plane(
    name: &'static str,
    len: usize,
    stride: usize,
    min: PlaneDims,
) -> Result<(), ConversionError> {
    if min.rows == 0 {
        return Ok(());
    }
    if stride < min.stride {
        return Err(ConversionError::StrideTooSmall {
            plane: name,
            stride,
            min: min.stride,
        });
    }
    let needed = PlaneDims {
        stride,
        rows: min.rows,
    }
    .required_len(min.stride)
    .ok_or(ConversionError::Overflow)?;
    if len < needed {
        return Err(ConversionError::BufferTooSmall {
            plane: name,
            len,
            needed,
        });
    }
    Ok(())
}

/// A borrowed source image of any [`PixelFormat`], validated on construction.
#[derive(Clone, Debug)]
pub struct Image<'a> {
    format: PixelFormat,
    width: usize,
    height: usize,
    planes: ArrayVec<Plane<'a>, MAX_PLANES>,
}

impl<'a> Image<'a> {
    /// Describes an image, checking the plane count and that every plane is
    /// large enough for `width` x `height`.
    pub fn new(
        format: PixelFormat,
        width: usize,
        height: usize,
        planes: impl IntoIterator<Item = Plane<'a>>,
    ) -> Result<Self, ConversionError> {
        let mut collected = ArrayVec::new();
        let mut actual = 0;
        for plane in planes {
            actual += 1;
            if collected.try_push(plane).is_err() {
                break;
            }
        }
        if actual != format.num_planes() {
            return Err(ConversionError::PlaneCount {
                format,
                expected: format.num_planes(),
                actual,
            });
        }
        let mins = format
            .checked_plane_dims(width, height)
            .ok_or(ConversionError::Overflow)?;
        for ((plane, min), name) in collected.iter().zip(mins).zip(format.plane_names()) {
            check_plane(name, plane.data.len(), plane.stride, min)?;
        }
        Ok(Self {
            format,
            width,
            height,
            planes: collected,
        })
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Returns `(width, height)` in pixels.
    #[inline]
    pub fn pixel_dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn planes(&self) -> &[Plane<'a>] {
        &self.planes
    }
}

/// A borrowed destination image of a packed RGB-family format, validated on construction.
#[derive(Debug)]
pub struct ImageMut<'a> {
    format: PixelFormat,
    width: usize,
    height: usize,
    plane: PlaneMut<'a>,
}

impl<'a> ImageMut<'a> {
    /// Describes a destination image. YUV destinations are not supported.
    pub fn new(
        format: PixelFormat,
        width: usize,
        height: usize,
        plane: PlaneMut<'a>,
    ) -> Result<Self, ConversionError> {
        if format.is_yuv() {
            return Err(ConversionError::Unsupported {
                from: format,
                to: format,
            });
        }
        let mins = format
            .checked_plane_dims(width, height)
            .ok_or(ConversionError::Overflow)?;
        for (min, name) in mins.into_iter().zip(format.plane_names()) {
            check_plane(name, plane.data.len(), plane.stride, min)?;
        }
        Ok(Self {
            format,
            width,
            height,
            plane,
        })
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Returns `(width, height)` in pixels.
    #[inline]
    pub fn pixel_dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn plane(&self) -> &PlaneMut<'a> {
        &self.plane
    }

    #[inline]
    pub(crate) fn plane_mut(&mut self) -> &mut PlaneMut<'a> {
        &mut self.plane
    }

    /// Reborrows the written image as a source.
    pub fn as_image(&self) -> Image<'_> {
        let mut planes = ArrayVec::new();
        planes.push(Plane::new(self.plane.data(), self.plane.stride));
        Image {
            format: self.format,
            width: self.width,
            height: self.height,
            planes,
        }
    }
}

/// An owned frame which stores all planes consecutively.
///
/// The backing `Vec` grows when the frame is converted in place to a larger
/// format; it never shrinks its allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrame {
    format: PixelFormat,
    width: usize,
    height: usize,

    /// Planes' dimensions. Invariants:
    /// * planes beyond those required by the format have `stride == rows == 0`.
    /// * `stride` is sufficient for `width` pixels; may have extra padding.
    /// * `rows` is correct for `height` with no extra padding.
    /// * `storage.len()` is the sum of `stride * rows`.
    dims: [PlaneDims; MAX_PLANES],

    /// How YUV samples in this frame should be interpreted.
    flag: ConvertFlag,

    storage: Vec<u8>,
}

fn total_size(dims: &[PlaneDims]) -> Result<usize, ConversionError> {
    dims.iter().try_fold(0usize, |total, d| {
        d.stride
            .checked_mul(d.rows)
            .and_then(|size| total.checked_add(size))
            .ok_or(ConversionError::Overflow)
    })
}

impl VideoFrame {
    /// Returns a zero-filled frame at minimum stride.
    ///
    /// Panics on overflow or allocation failure.
    pub fn new(format: PixelFormat, width: usize, height: usize) -> Self {
        let mut dims = [PlaneDims::default(); MAX_PLANES];
        for (dim, min) in dims.iter_mut().zip(format.min_plane_dims(width, height)) {
            *dim = min;
        }
        let len = total_size(&dims).expect("total frame size should not overflow");
        VideoFrame {
            format,
            width,
            height,
            dims,
            flag: ConvertFlag::DEFAULT,
            storage: vec![0; len],
        }
    }

    /// Pads each plane's row stride in bytes to a multiple of the next power
    /// of two greater than or equal to `padding`, reallocating zeroed storage.
    /// Panics on overflow.
    pub fn with_padding(mut self, padding: usize) -> Self {
        let padding_mask = padding
            .checked_next_power_of_two()
            .expect("padding should not overflow")
            - 1;
        for dims in self.dims.iter_mut() {
            dims.stride = dims
                .stride
                .checked_add(padding_mask)
                .expect("plane stride with padding should not overflow")
                & !padding_mask;
        }
        let len = total_size(&self.dims).expect("total frame size should not overflow");
        self.storage = vec![0; len];
        self
    }

    /// Wraps existing consecutive planes with the given dimensions.
    pub fn from_vec(
        format: PixelFormat,
        width: usize,
        height: usize,
        plane_dims: impl IntoIterator<Item = PlaneDims>,
        storage: Vec<u8>,
    ) -> Result<Self, ConversionError> {
        let mut dims = [PlaneDims::default(); MAX_PLANES];
        let mut actual = 0;
        for d in plane_dims {
            if let Some(slot) = dims.get_mut(actual) {
                *slot = d;
            }
            actual += 1;
        }
        if actual != format.num_planes() {
            return Err(ConversionError::PlaneCount {
                format,
                expected: format.num_planes(),
                actual,
            });
        }
        let mins = format
            .checked_plane_dims(width, height)
            .ok_or(ConversionError::Overflow)?;
        for ((d, min), name) in dims.iter().zip(mins).zip(format.plane_names()) {
            if d.rows != min.rows {
                return Err(ConversionError::DimensionMismatch {
                    src_width: width,
                    src_height: d.rows,
                    dst_width: width,
                    dst_height: min.rows,
                });
            }
            // Lengths are checked as a whole below.
            check_plane(name, usize::MAX, d.stride, min)?;
        }
        let needed = total_size(&dims)?;
        if storage.len() != needed {
            return Err(ConversionError::BufferTooSmall {
                plane: "frame",
                len: storage.len(),
                needed,
            });
        }
        Ok(VideoFrame {
            format,
            width,
            height,
            dims,
            flag: ConvertFlag::DEFAULT,
            storage,
        })
    }

    /// Sets how YUV samples should be interpreted by in-place conversion.
    pub fn with_flag(mut self, flag: ConvertFlag) -> Self {
        self.flag = flag;
        self
    }

    #[inline]
    pub fn flag(&self) -> ConvertFlag {
        self.flag
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Returns `(width, height)` in pixels.
    #[inline]
    pub fn pixel_dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Returns the dimensions of each of the format's planes.
    #[inline]
    pub fn plane_dims(&self) -> &[PlaneDims] {
        &self.dims[..self.format.num_planes()]
    }

    pub fn planes(&self) -> ArrayVec<Plane<'_>, MAX_PLANES> {
        split_planes(&self.dims[..self.format.num_planes()], &self.storage)
    }

    pub fn planes_mut(&mut self) -> ArrayVec<PlaneMut<'_>, MAX_PLANES> {
        let mut rest = &mut self.storage[..];
        let mut planes = ArrayVec::new();
        for dims in &self.dims[..self.format.num_planes()] {
            let (plane, tail) = std::mem::take(&mut rest).split_at_mut(dims.stride * dims.rows);
            planes.push(PlaneMut::new(plane, dims.stride));
            rest = tail;
        }
        planes
    }

    /// Returns the frame as a conversion source.
    pub fn image(&self) -> Image<'_> {
        Image {
            format: self.format,
            width: self.width,
            height: self.height,
            planes: self.planes(),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.storage
    }

    /// Replaces the frame's contents after an in-place conversion.
    pub(crate) fn storage_mut(&mut self) -> &mut Vec<u8> {
        &mut self.storage
    }

    pub(crate) fn set_layout(&mut self, format: PixelFormat, stride: usize) {
        self.format = format;
        self.dims = [
            PlaneDims {
                stride,
                rows: self.height,
            },
            PlaneDims::default(),
            PlaneDims::default(),
        ];
    }
}

/// Splits consecutive plane bytes per `dims`.
pub(crate) fn split_planes<'a>(
    dims: &[PlaneDims],
    mut data: &'a [u8],
) -> ArrayVec<Plane<'a>, MAX_PLANES> {
    let mut planes = ArrayVec::new();
    for d in dims {
        let (plane, rest) = data.split_at(d.stride * d.rows);
        planes.push(Plane::new(plane, d.stride));
        data = rest;
    }
    planes
}
