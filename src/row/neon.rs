// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NEON row processor.

use std::arch::aarch64;

use super::{shuffle_fallback, yuv_fallback, RowProcessor, Shuffle, YuvRow, OPAQUE};
use crate::{color::Coefficients, ConversionError, PixelFormat};

const BLOCK_SIZE: usize = 16;

#[doc(hidden)]
#[derive(Copy, Clone, Debug)]
pub struct ExplicitNeon(());

impl RowProcessor for ExplicitNeon {
    fn new() -> Result<Self, ConversionError> {
        if std::arch::is_aarch64_feature_detected!("neon") {
            Ok(Self(()))
        } else {
            Err(ConversionError::BackendUnavailable(
                crate::backend::Backend::Vector,
            ))
        }
    }

    #[inline(never)]
    #[target_feature(enable = "neon")]
    unsafe fn yuv_row(
        self,
        width: usize,
        src: YuvRow,
        dst: *mut u8,
        format: PixelFormat,
        coeffs: &Coefficients,
    ) {
        let alpha = format.has_alpha();
        let bgr = format.is_bgr();
        let bpp = if alpha { 4 } else { 3 };
        let mut i = 0;
        while i + BLOCK_SIZE <= width {
            let [y, u, v] = load_yuv(src, i);
            let [r, g, b] = to_rgb(coeffs, y, u, v);
            let (first, last) = if bgr { (b, r) } else { (r, b) };
            let out = dst.add(i * bpp);
            if alpha {
                aarch64::vst4q_u8(
                    out,
                    aarch64::uint8x16x4_t(first, g, last, aarch64::vdupq_n_u8(0xff)),
                );
            } else {
                aarch64::vst3q_u8(out, aarch64::uint8x16x3_t(first, g, last));
            }
            i += BLOCK_SIZE;
        }
        if i < width {
            yuv_fallback(width - i, src.advance(i), dst.add(i * bpp), format, coeffs);
        }
    }

    #[inline(never)]
    #[target_feature(enable = "neon")]
    unsafe fn shuffle_row(self, width: usize, src: *const u8, dst: *mut u8, shuffle: Shuffle) {
        let opaque = aarch64::vdupq_n_u8(0xff);
        let mut i = 0;
        while i + BLOCK_SIZE <= width {
            let planes = if shuffle.src_channels == 4 {
                let p = aarch64::vld4q_u8(src.add(i * 4));
                [p.0, p.1, p.2, p.3]
            } else {
                let p = aarch64::vld3q_u8(src.add(i * 3));
                [p.0, p.1, p.2, opaque]
            };
            let mut out = [opaque; 4];
            for (o, &from) in out.iter_mut().zip(&shuffle.order[..shuffle.dst_channels]) {
                if from != OPAQUE {
                    *o = planes[usize::from(from)];
                }
            }
            if shuffle.dst_channels == 4 {
                aarch64::vst4q_u8(
                    dst.add(i * 4),
                    aarch64::uint8x16x4_t(out[0], out[1], out[2], out[3]),
                );
            } else {
                aarch64::vst3q_u8(dst.add(i * 3), aarch64::uint8x16x3_t(out[0], out[1], out[2]));
            }
            i += BLOCK_SIZE;
        }
        if i < width {
            shuffle_fallback(
                width - i,
                src.add(i * shuffle.src_channels),
                dst.add(i * shuffle.dst_channels),
                shuffle,
            );
        }
    }
}

#[target_feature(enable = "neon")]
#[inline]
unsafe fn zip(a: aarch64::uint8x8_t, b: aarch64::uint8x8_t) -> aarch64::uint8x16_t {
    let z = aarch64::vzip_u8(a, b);
    aarch64::vcombine_u8(z.0, z.1)
}

/// Loads 16 pixels of luma and per-pixel (duplicated) chroma.
#[target_feature(enable = "neon")]
#[inline]
unsafe fn load_yuv(src: YuvRow, i: usize) -> [aarch64::uint8x16_t; 3] {
    match src {
        YuvRow::Nv12 { y, uv } => {
            let uv = aarch64::vld2_u8(uv.add(i));
            [aarch64::vld1q_u8(y.add(i)), zip(uv.0, uv.0), zip(uv.1, uv.1)]
        }
        YuvRow::I420 { y, u, v } => {
            let u = aarch64::vld1_u8(u.add(i >> 1));
            let v = aarch64::vld1_u8(v.add(i >> 1));
            [aarch64::vld1q_u8(y.add(i)), zip(u, u), zip(v, v)]
        }
        YuvRow::Yuyv(p) => {
            // (y0, u, y1, v) x 8.
            let q = aarch64::vld4_u8(p.add(i << 1));
            [zip(q.0, q.2), zip(q.1, q.1), zip(q.3, q.3)]
        }
        YuvRow::Uyvy(p) => {
            // (u, y0, v, y1) x 8.
            let q = aarch64::vld4_u8(p.add(i << 1));
            [zip(q.1, q.3), zip(q.0, q.0), zip(q.2, q.2)]
        }
    }
}

/// Widens 16 bytes to four vectors of 4 `i32`s.
#[target_feature(enable = "neon")]
#[inline]
unsafe fn widen(x: aarch64::uint8x16_t) -> [aarch64::int32x4_t; 4] {
    let lo = aarch64::vreinterpretq_s16_u16(aarch64::vmovl_u8(aarch64::vget_low_u8(x)));
    let hi = aarch64::vreinterpretq_s16_u16(aarch64::vmovl_high_u8(x));
    [
        aarch64::vmovl_s16(aarch64::vget_low_s16(lo)),
        aarch64::vmovl_high_s16(lo),
        aarch64::vmovl_s16(aarch64::vget_low_s16(hi)),
        aarch64::vmovl_high_s16(hi),
    ]
}

/// Saturates four vectors of 4 `i32`s to 16 bytes.
#[target_feature(enable = "neon")]
#[inline]
unsafe fn narrow(q: [aarch64::int32x4_t; 4]) -> aarch64::uint8x16_t {
    let lo = aarch64::vcombine_s16(aarch64::vqmovn_s32(q[0]), aarch64::vqmovn_s32(q[1]));
    let hi = aarch64::vcombine_s16(aarch64::vqmovn_s32(q[2]), aarch64::vqmovn_s32(q[3]));
    aarch64::vcombine_u8(aarch64::vqmovun_s16(lo), aarch64::vqmovun_s16(hi))
}

#[target_feature(enable = "neon")]
#[inline]
unsafe fn to_rgb(
    c: &Coefficients,
    y: aarch64::uint8x16_t,
    u: aarch64::uint8x16_t,
    v: aarch64::uint8x16_t,
) -> [aarch64::uint8x16_t; 3] {
    let (y, u, v) = (widen(y), widen(u), widen(v));
    let y_offset = aarch64::vdupq_n_s32(c.y_offset);
    let half = aarch64::vdupq_n_s32(128);
    let zero = aarch64::vdupq_n_s32(0);
    let (mut r, mut g, mut b) = ([zero; 4], [zero; 4], [zero; 4]);
    for q in 0..4 {
        let yq = aarch64::vaddq_s32(
            aarch64::vmulq_n_s32(aarch64::vsubq_s32(y[q], y_offset), c.y),
            half,
        );
        let uq = aarch64::vsubq_s32(u[q], half);
        let vq = aarch64::vsubq_s32(v[q], half);
        r[q] = aarch64::vshrq_n_s32::<8>(aarch64::vaddq_s32(yq, aarch64::vmulq_n_s32(vq, c.r_v)));
        g[q] = aarch64::vshrq_n_s32::<8>(aarch64::vsubq_s32(
            aarch64::vsubq_s32(yq, aarch64::vmulq_n_s32(uq, c.g_u)),
            aarch64::vmulq_n_s32(vq, c.g_v),
        ));
        b[q] = aarch64::vshrq_n_s32::<8>(aarch64::vaddq_s32(yq, aarch64::vmulq_n_s32(uq, c.b_u)));
    }
    [narrow(r), narrow(g), narrow(b)]
}
