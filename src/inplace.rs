// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-place conversion of owned [`VideoFrame`]s.

use arrayvec::ArrayVec;
use tracing::debug;

use crate::{
    frame::{split_planes, Image, ImageMut, Orientation, PlaneMut, VideoFrame},
    scratch, ConversionError, Converter, PixelFormat, PlaneDims, MAX_PLANES,
};

/// Returns the row stride an in-place conversion to `to` produces.
fn packed_stride(to: PixelFormat, width: usize) -> Option<usize> {
    match to.rgb_channels()? {
        4 => width.checked_mul(4),
        // 3-channel rows are padded to 32 bytes.
        _ => width.checked_mul(3)?.checked_add(31).map(|s| s & !31),
    }
}

impl Converter<'_> {
    /// Converts `frame` to the packed RGB-family format `to`, reusing its storage.
    ///
    /// The frame's [`VideoFrame::flag`] selects the YUV interpretation.
    /// Converting to the current format is a no-op unless flipping. On error
    /// the frame is left unchanged.
    pub fn convert_frame(
        &self,
        frame: &mut VideoFrame,
        to: PixelFormat,
        orientation: Orientation,
    ) -> Result<(), ConversionError> {
        let from = frame.format();
        if to.is_yuv() {
            return Err(ConversionError::Unsupported { from, to });
        }
        if from == to && orientation == Orientation::TopDown {
            return Ok(());
        }
        let (width, height) = frame.pixel_dimensions();
        let stride = packed_stride(to, width).ok_or(ConversionError::Overflow)?;
        let len = stride.checked_mul(height).ok_or(ConversionError::Overflow)?;
        let flag = frame.flag();
        let dims: ArrayVec<PlaneDims, MAX_PLANES> = frame.plane_dims().iter().copied().collect();

        let mut saved = scratch::lease();
        saved.resize(frame.as_bytes().len()).copy_from_slice(frame.as_bytes());
        let src = Image::new(from, width, height, split_planes(&dims, &saved))?;

        let storage = frame.storage_mut();
        storage.resize(len, 0);
        let result = ImageMut::new(to, width, height, PlaneMut::new(&mut storage[..], stride))
            .and_then(|mut dst| self.convert(&src, &mut dst, flag, orientation));
        if let Err(e) = result {
            storage.clear();
            storage.extend_from_slice(&saved);
            return Err(e);
        }
        frame.set_layout(to, stride);
        Ok(())
    }
}

/// Converts `frame` in place to `to` with the global backend config.
///
/// Returns false, leaving the frame unchanged, if the conversion isn't possible.
pub fn convert_frame(frame: &mut VideoFrame, to: PixelFormat, vertical_flip: bool) -> bool {
    let orientation = if vertical_flip {
        Orientation::BottomUp
    } else {
        Orientation::TopDown
    };
    match Converter::global().convert_frame(frame, to, orientation) {
        Ok(()) => true,
        Err(e) => {
            debug!(%e, from = ?frame.format(), ?to, "in-place conversion failed");
            false
        }
    }
}
