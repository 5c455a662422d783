// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NV12 / I420 / YUYV / UYVY to packed RGB-family conversion.

use crate::{
    color::Coefficients,
    frame::{Image, ImageMut, Orientation, Plane},
    row::{for_each_row, RowProcessor, YuvRow},
    PixelFormat,
};

/// Returns the source row pointers for image row `r`.
///
/// Panics if the planes are too small, which validated images never are.
fn source_row(format: PixelFormat, planes: &[Plane<'_>], width: usize, r: usize) -> YuvRow {
    let chroma_width = (width >> 1) + (width & 1);
    match (format, planes) {
        (PixelFormat::Nv12, [y, uv]) => YuvRow::Nv12 {
            y: y.row(r, width).as_ptr(),
            uv: uv.row(r >> 1, chroma_width << 1).as_ptr(),
        },
        (PixelFormat::I420, [y, u, v]) => YuvRow::I420 {
            y: y.row(r, width).as_ptr(),
            u: u.row(r >> 1, chroma_width).as_ptr(),
            v: v.row(r >> 1, chroma_width).as_ptr(),
        },
        (PixelFormat::Yuyv, [p]) => YuvRow::Yuyv(p.row(r, chroma_width << 2).as_ptr()),
        (PixelFormat::Uyvy, [p]) => YuvRow::Uyvy(p.row(r, chroma_width << 2).as_ptr()),
        _ => unreachable!("{format:?} source with {} planes", planes.len()),
    }
}

/// Converts `src` into `dst`, which must already be validated as the same
/// size, with a YUV source and an RGB-family destination.
pub(crate) fn convert_with<P: RowProcessor>(
    p: P,
    src: &Image<'_>,
    dst: &mut ImageMut<'_>,
    coeffs: &Coefficients,
    orientation: Orientation,
    parallel: bool,
) {
    let (width, height) = src.pixel_dimensions();
    debug_assert_eq!(dst.pixel_dimensions(), (width, height));
    let format = src.format();
    let out_format = dst.format();
    let Some(bpp) = out_format.rgb_channels() else {
        unreachable!("{out_format:?} destination");
    };
    let planes = src.planes();
    let plane = dst.plane_mut();
    let stride = plane.stride();
    for_each_row(plane.data_mut(), stride, height, parallel, |r, row| {
        let src_r = match orientation {
            Orientation::TopDown => r,
            Orientation::BottomUp => height - 1 - r,
        };
        let row = &mut row[..width * bpp];
        let src_row = source_row(format, planes, width, src_r);
        // SAFETY: `source_row` sliced `width` pixels of each plane, and `row`
        // holds exactly `width` output pixels.
        unsafe { p.yuv_row(width, src_row, row.as_mut_ptr(), out_format, coeffs) };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::PlaneMut,
        row::{testutil::random_bytes, Scalar},
    };

    const OUTPUTS: [PixelFormat; 4] = [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Rgba32,
        PixelFormat::Bgra32,
    ];

    fn convert(
        src: &Image<'_>,
        to: PixelFormat,
        stride: usize,
        c: &Coefficients,
        orientation: Orientation,
    ) -> Vec<u8> {
        let (width, height) = src.pixel_dimensions();
        let mut out = vec![0u8; stride * height];
        let mut dst = ImageMut::new(to, width, height, PlaneMut::new(&mut out, stride)).unwrap();
        convert_with(Scalar::new().unwrap(), src, &mut dst, c, orientation, false);
        out
    }

    /// Independently computes pixel `(x, y)` of `src`.
    fn reference_pixel(src: &Image<'_>, c: &Coefficients, x: usize, y: usize) -> [u8; 3] {
        let planes = src.planes();
        let (luma, u, v) = match src.format() {
            PixelFormat::Nv12 => {
                let uv = &planes[1].data()[(y / 2) * planes[1].stride() + (x / 2) * 2..];
                (planes[0].data()[y * planes[0].stride() + x], uv[0], uv[1])
            }
            PixelFormat::I420 => (
                planes[0].data()[y * planes[0].stride() + x],
                planes[1].data()[(y / 2) * planes[1].stride() + x / 2],
                planes[2].data()[(y / 2) * planes[2].stride() + x / 2],
            ),
            PixelFormat::Yuyv => {
                let g = &planes[0].data()[y * planes[0].stride() + (x / 2) * 4..];
                (g[(x % 2) * 2], g[1], g[3])
            }
            PixelFormat::Uyvy => {
                let g = &planes[0].data()[y * planes[0].stride() + (x / 2) * 4..];
                (g[1 + (x % 2) * 2], g[0], g[2])
            }
            f => unreachable!("{f:?}"),
        };
        c.apply(luma, u, v)
    }

    /// Builds `format` planes from random bytes, with `pad` extra bytes per row.
    fn random_planes(
        format: PixelFormat,
        width: usize,
        height: usize,
        pad: usize,
        seed: u64,
    ) -> Vec<(Vec<u8>, usize)> {
        format
            .min_plane_dims(width, height)
            .enumerate()
            .map(|(i, d)| {
                let stride = d.stride + pad;
                (random_bytes(stride * d.rows, seed + i as u64), stride)
            })
            .collect()
    }

    fn image<'a>(
        format: PixelFormat,
        width: usize,
        height: usize,
        planes: &'a [(Vec<u8>, usize)],
    ) -> Image<'a> {
        Image::new(
            format,
            width,
            height,
            planes.iter().map(|(data, stride)| Plane::new(data, *stride)),
        )
        .unwrap()
    }

    #[test]
    fn matches_reference_at_odd_sizes() {
        let c = Coefficients::BT709_VIDEO;
        for format in [PixelFormat::Nv12, PixelFormat::I420, PixelFormat::Yuyv, PixelFormat::Uyvy] {
            for (width, height) in [(1, 1), (3, 3), (5, 2), (17, 7), (33, 4)] {
                let planes = random_planes(format, width, height, 3, (width * height) as u64);
                let src = image(format, width, height, &planes);
                for to in OUTPUTS {
                    let bpp = to.rgb_channels().unwrap();
                    let stride = width * bpp + 5;
                    let out = convert(&src, to, stride, &c, Orientation::TopDown);
                    for y in 0..height {
                        for x in 0..width {
                            let [r, g, b] = reference_pixel(&src, &c, x, y);
                            let px = &out[y * stride + x * bpp..][..bpp];
                            let expected: &[u8] = match to {
                                PixelFormat::Rgb24 => &[r, g, b],
                                PixelFormat::Bgr24 => &[b, g, r],
                                PixelFormat::Rgba32 => &[r, g, b, 0xff],
                                _ => &[b, g, r, 0xff],
                            };
                            assert_eq!(
                                px, expected,
                                "{format:?} -> {to:?} {width}x{height} at ({x}, {y})"
                            );
                        }
                        // Padding is untouched.
                        let padding = &out[y * stride + width * bpp..(y + 1) * stride];
                        assert!(padding.iter().all(|&b| b == 0));
                    }
                }
            }
        }
    }

    #[test]
    fn flip_mirrors_rows() {
        let (width, height) = (19, 6);
        let c = Coefficients::BT601_VIDEO;
        for format in [PixelFormat::Nv12, PixelFormat::I420, PixelFormat::Yuyv, PixelFormat::Uyvy] {
            let planes = random_planes(format, width, height, 0, 7);
            let src = image(format, width, height, &planes);
            let stride = width * 4;
            let normal = convert(&src, PixelFormat::Rgba32, stride, &c, Orientation::TopDown);
            let flipped = convert(&src, PixelFormat::Rgba32, stride, &c, Orientation::BottomUp);
            for y in 0..height {
                assert_eq!(
                    &normal[y * stride..][..stride],
                    &flipped[(height - 1 - y) * stride..][..stride],
                    "{format:?} row {y}"
                );
            }
        }
    }

    #[test]
    fn nv12_matches_i420() {
        let (width, height) = (21, 9);
        let i420 = random_planes(PixelFormat::I420, width, height, 0, 3);
        let chroma_width = (width + 1) / 2;
        let uv: Vec<u8> = i420[1]
            .0
            .iter()
            .zip(&i420[2].0)
            .flat_map(|(&u, &v)| [u, v])
            .collect();
        let nv12 = vec![i420[0].clone(), (uv, chroma_width * 2)];
        let c = Coefficients::BT601_FULL;
        for to in OUTPUTS {
            let stride = width * to.rgb_channels().unwrap();
            let i420 = image(PixelFormat::I420, width, height, &i420);
            let nv12 = image(PixelFormat::Nv12, width, height, &nv12);
            assert_eq!(
                convert(&i420, to, stride, &c, Orientation::TopDown),
                convert(&nv12, to, stride, &c, Orientation::TopDown),
            );
        }
    }

    #[test]
    fn primaries() {
        let c = Coefficients::BT601_VIDEO;
        for ([y, u, v], expected) in [
            ([76, 84, 255], [255, 0, 0]),
            ([149, 43, 21], [0, 255, 0]),
            ([29, 255, 107], [0, 0, 255]),
        ] {
            let (width, height) = (64, 64);
            let luma = vec![y; width * height];
            let uv: Vec<u8> = [u, v].repeat(width * height / 4);
            let planes = vec![(luma, width), (uv, width)];
            let src = image(PixelFormat::Nv12, width, height, &planes);
            let out = convert(&src, PixelFormat::Rgb24, width * 3, &c, Orientation::TopDown);
            assert!(out.chunks(3).all(|px| px == expected), "{:?}", &out[..3]);
        }
    }
}
