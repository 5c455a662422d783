// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel reordering between packed RGB-family layouts.

use crate::{
    frame::{Image, ImageMut, Orientation},
    row::{for_each_row, RowProcessor, Shuffle},
};

/// Applies `shuffle` to every pixel of `src`, writing `dst`. Both must already
/// be validated as the same size with the channel counts `shuffle` expects.
pub(crate) fn convert_with<P: RowProcessor>(
    p: P,
    src: &Image<'_>,
    dst: &mut ImageMut<'_>,
    shuffle: Shuffle,
    orientation: Orientation,
    parallel: bool,
) {
    let (width, height) = src.pixel_dimensions();
    debug_assert_eq!(dst.pixel_dimensions(), (width, height));
    debug_assert_eq!(src.format().rgb_channels(), Some(shuffle.src_channels));
    debug_assert_eq!(dst.format().rgb_channels(), Some(shuffle.dst_channels));
    let [plane] = src.planes() else {
        unreachable!("packed source with {} planes", src.planes().len());
    };
    let plane = *plane;
    let out = dst.plane_mut();
    let stride = out.stride();
    for_each_row(out.data_mut(), stride, height, parallel, |r, row| {
        let src_r = match orientation {
            Orientation::TopDown => r,
            Orientation::BottomUp => height - 1 - r,
        };
        let src_row = plane.row(src_r, width * shuffle.src_channels);
        let row = &mut row[..width * shuffle.dst_channels];
        // SAFETY: both slices hold exactly `width` pixels and can't overlap, as
        // one is borrowed shared and the other exclusively.
        unsafe { p.shuffle_row(width, src_row.as_ptr(), row.as_mut_ptr(), shuffle) };
    });
}
