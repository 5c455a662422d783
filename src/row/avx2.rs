// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AVX2 row processor.
//!
//! Blocks of 16 pixels are split into 16-byte channel planes, converted with
//! 32-bit integer math in two 8-lane halves, and interleaved back out with
//! byte shuffles. The remainder of each row goes through the scalar code.

use std::arch::x86_64;

use super::{shuffle_fallback, yuv_fallback, RowProcessor, Shuffle, YuvRow, OPAQUE};
use crate::{color::Coefficients, ConversionError, PixelFormat};

const BLOCK_SIZE: usize = 16;

/// Builds `pshufb` masks which gather byte `p` of a 48-byte RGB run from
/// three planes: `[chunk][plane]`.
const fn interleave3() -> [[[u8; 16]; 3]; 3] {
    let mut m = [[[0x80u8; 16]; 3]; 3];
    let mut p = 0;
    while p < 48 {
        m[p / 16][p % 3][p % 16] = (p / 3) as u8;
        p += 1;
    }
    m
}

/// Builds `pshufb` masks which gather plane `ch` of 16 pixels, `bpp` bytes
/// each, from consecutive 16-byte chunks: `[plane][chunk]`.
const fn deinterleave(bpp: usize) -> [[[u8; 16]; 4]; 4] {
    let mut m = [[[0x80u8; 16]; 4]; 4];
    let mut p = 0;
    while p < 16 {
        let mut ch = 0;
        while ch < bpp {
            let byte = p * bpp + ch;
            m[ch][byte / 16][p] = (byte % 16) as u8;
            ch += 1;
        }
        p += 1;
    }
    m
}

const INTERLEAVE3: [[[u8; 16]; 3]; 3] = interleave3();
const DEINTERLEAVE3: [[[u8; 16]; 4]; 4] = deinterleave(3);
const DEINTERLEAVE4: [[[u8; 16]; 4]; 4] = deinterleave(4);

#[doc(hidden)]
#[derive(Copy, Clone, Debug)]
pub struct ExplicitAvx2(());

impl RowProcessor for ExplicitAvx2 {
    #[inline]
    fn new() -> Result<Self, ConversionError> {
        if is_x86_feature_detected!("avx2") {
            Ok(Self(()))
        } else {
            Err(ConversionError::BackendUnavailable(
                crate::backend::Backend::Vector,
            ))
        }
    }

    #[target_feature(enable = "avx2")]
    #[inline(never)]
    unsafe fn yuv_row(
        self,
        width: usize,
        src: YuvRow,
        dst: *mut u8,
        format: PixelFormat,
        coeffs: &Coefficients,
    ) {
        let k = Consts::new(coeffs);
        let alpha = format.has_alpha();
        let bgr = format.is_bgr();
        let bpp = if alpha { 4 } else { 3 };
        let opaque = x86_64::_mm_set1_epi8(-1);
        let mut i = 0;
        while i + BLOCK_SIZE <= width {
            let [y, u, v] = load_yuv(src, i);
            let [r, g, b] = to_rgb(&k, y, u, v);
            let (first, last) = if bgr { (b, r) } else { (r, b) };
            let out = dst.add(i * bpp);
            if alpha {
                store4(out, [first, g, last, opaque]);
            } else {
                store3(out, [first, g, last]);
            }
            i += BLOCK_SIZE;
        }
        if i < width {
            yuv_fallback(width - i, src.advance(i), dst.add(i * bpp), format, coeffs);
        }
    }

    #[target_feature(enable = "avx2")]
    #[inline(never)]
    unsafe fn shuffle_row(self, width: usize, src: *const u8, dst: *mut u8, shuffle: Shuffle) {
        let opaque = x86_64::_mm_set1_epi8(-1);
        let mut i = 0;
        while i + BLOCK_SIZE <= width {
            let planes = if shuffle.src_channels == 4 {
                load_planes(src.add(i * 4), 4, &DEINTERLEAVE4)
            } else {
                let [a, b, c, _] = load_planes(src.add(i * 3), 3, &DEINTERLEAVE3);
                [a, b, c, opaque]
            };
            let mut out = [opaque; 4];
            for (o, &from) in out.iter_mut().zip(&shuffle.order[..shuffle.dst_channels]) {
                if from != OPAQUE {
                    *o = planes[usize::from(from)];
                }
            }
            if shuffle.dst_channels == 4 {
                store4(dst.add(i * 4), out);
            } else {
                store3(dst.add(i * 3), [out[0], out[1], out[2]]);
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

/// Coefficients broadcast to all eight 32-bit lanes.
struct Consts {
    y_offset: x86_64::__m256i,
    chroma_offset: x86_64::__m256i,
    round: x86_64::__m256i,
    y: x86_64::__m256i,
    r_v: x86_64::__m256i,
    g_u: x86_64::__m256i,
    g_v: x86_64::__m256i,
    b_u: x86_64::__m256i,
}

impl Consts {
    #[target_feature(enable = "avx2")]
    #[inline]
    unsafe fn new(c: &Coefficients) -> Self {
        Self {
            y_offset: x86_64::_mm256_set1_epi32(c.y_offset),
            chroma_offset: x86_64::_mm256_set1_epi32(128),
            round: x86_64::_mm256_set1_epi32(128),
            y: x86_64::_mm256_set1_epi32(c.y),
            r_v: x86_64::_mm256_set1_epi32(c.r_v),
            g_u: x86_64::_mm256_set1_epi32(c.g_u),
            g_v: x86_64::_mm256_set1_epi32(c.g_v),
            b_u: x86_64::_mm256_set1_epi32(c.b_u),
        }
    }
}

/// Loads 16 pixels of luma and per-pixel (duplicated) chroma.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_yuv(src: YuvRow, i: usize) -> [x86_64::__m128i; 3] {
    match src {
        YuvRow::Nv12 { y, uv } => {
            // 8 U/V pairs cover 16 pixels.
            let uv = x86_64::_mm_loadu_si128(uv.add(i) as _);
            [
                x86_64::_mm_loadu_si128(y.add(i) as _),
                x86_64::_mm_shuffle_epi8(
                    uv,
                    x86_64::_mm_setr_epi8(0, 0, 2, 2, 4, 4, 6, 6, 8, 8, 10, 10, 12, 12, 14, 14),
                ),
                x86_64::_mm_shuffle_epi8(
                    uv,
                    x86_64::_mm_setr_epi8(1, 1, 3, 3, 5, 5, 7, 7, 9, 9, 11, 11, 13, 13, 15, 15),
                ),
            ]
        }
        YuvRow::I420 { y, u, v } => {
            let dup = x86_64::_mm_setr_epi8(0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7);
            [
                x86_64::_mm_loadu_si128(y.add(i) as _),
                x86_64::_mm_shuffle_epi8(x86_64::_mm_loadl_epi64(u.add(i >> 1) as _), dup),
                x86_64::_mm_shuffle_epi8(x86_64::_mm_loadl_epi64(v.add(i >> 1) as _), dup),
            ]
        }
        YuvRow::Yuyv(p) => load_packed(
            p.add(i << 1),
            x86_64::_mm_setr_epi8(0, 2, 4, 6, 8, 10, 12, 14, -1, -1, -1, -1, -1, -1, -1, -1),
            x86_64::_mm_setr_epi8(1, 1, 5, 5, 9, 9, 13, 13, -1, -1, -1, -1, -1, -1, -1, -1),
            x86_64::_mm_setr_epi8(3, 3, 7, 7, 11, 11, 15, 15, -1, -1, -1, -1, -1, -1, -1, -1),
        ),
        YuvRow::Uyvy(p) => load_packed(
            p.add(i << 1),
            x86_64::_mm_setr_epi8(1, 3, 5, 7, 9, 11, 13, 15, -1, -1, -1, -1, -1, -1, -1, -1),
            x86_64::_mm_setr_epi8(0, 0, 4, 4, 8, 8, 12, 12, -1, -1, -1, -1, -1, -1, -1, -1),
            x86_64::_mm_setr_epi8(2, 2, 6, 6, 10, 10, 14, 14, -1, -1, -1, -1, -1, -1, -1, -1),
        ),
    }
}

/// Loads 32 bytes of packed 4:2:2. Each mask selects 8 values from one
/// 16-byte half into the low 8 bytes.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_packed(
    p: *const u8,
    y_idx: x86_64::__m128i,
    u_idx: x86_64::__m128i,
    v_idx: x86_64::__m128i,
) -> [x86_64::__m128i; 3] {
    let a = x86_64::_mm_loadu_si128(p as _);
    let b = x86_64::_mm_loadu_si128(p.add(16) as _);
    [pick(a, b, y_idx), pick(a, b, u_idx), pick(a, b, v_idx)]
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn pick(a: x86_64::__m128i, b: x86_64::__m128i, idx: x86_64::__m128i) -> x86_64::__m128i {
    x86_64::_mm_unpacklo_epi64(
        x86_64::_mm_shuffle_epi8(a, idx),
        x86_64::_mm_shuffle_epi8(b, idx),
    )
}

/// Converts 8 pixels held in the low bytes of `y`, `u`, `v` to unclamped
/// 32-bit `[r, g, b]`.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn half(
    k: &Consts,
    y: x86_64::__m128i,
    u: x86_64::__m128i,
    v: x86_64::__m128i,
) -> [x86_64::__m256i; 3] {
    let y = x86_64::_mm256_sub_epi32(x86_64::_mm256_cvtepu8_epi32(y), k.y_offset);
    let u = x86_64::_mm256_sub_epi32(x86_64::_mm256_cvtepu8_epi32(u), k.chroma_offset);
    let v = x86_64::_mm256_sub_epi32(x86_64::_mm256_cvtepu8_epi32(v), k.chroma_offset);
    // VPMULLD (YMM, YMM, YMM) on Zen2: lat 4, cpi 1.
    let y = x86_64::_mm256_add_epi32(x86_64::_mm256_mullo_epi32(y, k.y), k.round);
    let r = x86_64::_mm256_add_epi32(y, x86_64::_mm256_mullo_epi32(v, k.r_v));
    let g = x86_64::_mm256_sub_epi32(
        x86_64::_mm256_sub_epi32(y, x86_64::_mm256_mullo_epi32(u, k.g_u)),
        x86_64::_mm256_mullo_epi32(v, k.g_v),
    );
    let b = x86_64::_mm256_add_epi32(y, x86_64::_mm256_mullo_epi32(u, k.b_u));
    [
        x86_64::_mm256_srai_epi32::<8>(r),
        x86_64::_mm256_srai_epi32::<8>(g),
        x86_64::_mm256_srai_epi32::<8>(b),
    ]
}

/// Saturates two 8-lane halves to 16 ordered bytes.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn pack(lo: x86_64::__m256i, hi: x86_64::__m256i) -> x86_64::__m128i {
    // packs_epi32 interleaves 64-bit groups as (lo0 hi0 lo1 hi1); put them back in order.
    let words =
        x86_64::_mm256_permute4x64_epi64::<0b11_01_10_00>(x86_64::_mm256_packs_epi32(lo, hi));
    x86_64::_mm_packus_epi16(
        x86_64::_mm256_castsi256_si128(words),
        x86_64::_mm256_extracti128_si256::<1>(words),
    )
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn to_rgb(
    k: &Consts,
    y: x86_64::__m128i,
    u: x86_64::__m128i,
    v: x86_64::__m128i,
) -> [x86_64::__m128i; 3] {
    let lo = half(k, y, u, v);
    let hi = half(
        k,
        x86_64::_mm_srli_si128::<8>(y),
        x86_64::_mm_srli_si128::<8>(u),
        x86_64::_mm_srli_si128::<8>(v),
    );
    [
        pack(lo[0], hi[0]),
        pack(lo[1], hi[1]),
        pack(lo[2], hi[2]),
    ]
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn mask(m: &[u8; 16]) -> x86_64::__m128i {
    x86_64::_mm_loadu_si128(m.as_ptr() as _)
}

/// Splits 16 pixels of `bpp` bytes each into channel planes. Planes at or
/// beyond `bpp` are zero.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_planes(
    src: *const u8,
    bpp: usize,
    masks: &[[[u8; 16]; 4]; 4],
) -> [x86_64::__m128i; 4] {
    let mut chunks = [x86_64::_mm_setzero_si128(); 4];
    for (k, chunk) in chunks.iter_mut().enumerate().take(bpp) {
        *chunk = x86_64::_mm_loadu_si128(src.add(16 * k) as _);
    }
    let mut planes = [x86_64::_mm_setzero_si128(); 4];
    for (plane, plane_masks) in planes.iter_mut().zip(masks).take(bpp) {
        for (chunk, m) in chunks.iter().zip(plane_masks).take(bpp) {
            *plane = x86_64::_mm_or_si128(*plane, x86_64::_mm_shuffle_epi8(*chunk, mask(m)));
        }
    }
    planes
}

/// Interleaves four planes into 64 bytes.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn store4(dst: *mut u8, [c0, c1, c2, c3]: [x86_64::__m128i; 4]) {
    let lo01 = x86_64::_mm_unpacklo_epi8(c0, c1);
    let hi01 = x86_64::_mm_unpackhi_epi8(c0, c1);
    let lo23 = x86_64::_mm_unpacklo_epi8(c2, c3);
    let hi23 = x86_64::_mm_unpackhi_epi8(c2, c3);
    x86_64::_mm_storeu_si128(dst as _, x86_64::_mm_unpacklo_epi16(lo01, lo23));
    x86_64::_mm_storeu_si128(dst.add(16) as _, x86_64::_mm_unpackhi_epi16(lo01, lo23));
    x86_64::_mm_storeu_si128(dst.add(32) as _, x86_64::_mm_unpacklo_epi16(hi01, hi23));
    x86_64::_mm_storeu_si128(dst.add(48) as _, x86_64::_mm_unpackhi_epi16(hi01, hi23));
}

/// Interleaves three planes into 48 bytes.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn store3(dst: *mut u8, planes: [x86_64::__m128i; 3]) {
    for (k, chunk_masks) in INTERLEAVE3.iter().enumerate() {
        let mut out = x86_64::_mm_setzero_si128();
        for (plane, m) in planes.iter().zip(chunk_masks) {
            out = x86_64::_mm_or_si128(out, x86_64::_mm_shuffle_epi8(*plane, mask(m)));
        }
        x86_64::_mm_storeu_si128(dst.add(16 * k) as _, out);
    }
}
