// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-row conversion kernels.
//!
//! Calling crates should use the conversion functions at the crate root. This
//! module is `pub` solely for use in the included benchmarks.

#[cfg(target_arch = "x86_64")]
mod avx2;
#[cfg(target_arch = "aarch64")]
mod neon;

#[cfg(target_arch = "x86_64")]
pub use avx2::ExplicitAvx2;
#[cfg(target_arch = "aarch64")]
pub use neon::ExplicitNeon;

use crate::{color::Coefficients, ConversionError, PixelFormat};

/// Source pointers for one row of YUV input.
///
/// Chroma pointers address the samples for the row's first pixel, which must
/// be even.
#[doc(hidden)]
#[derive(Copy, Clone, Debug)]
pub enum YuvRow {
    Nv12 { y: *const u8, uv: *const u8 },
    I420 { y: *const u8, u: *const u8, v: *const u8 },
    Yuyv(*const u8),
    Uyvy(*const u8),
}

impl YuvRow {
    /// Returns the row starting `pixels` pixels further along.
    ///
    /// # Safety
    ///
    /// `pixels` must be even and within the row.
    #[inline]
    pub unsafe fn advance(self, pixels: usize) -> Self {
        debug_assert_eq!(pixels & 1, 0);
        match self {
            YuvRow::Nv12 { y, uv } => YuvRow::Nv12 {
                y: y.add(pixels),
                uv: uv.add(pixels),
            },
            YuvRow::I420 { y, u, v } => YuvRow::I420 {
                y: y.add(pixels),
                u: u.add(pixels >> 1),
                v: v.add(pixels >> 1),
            },
            YuvRow::Yuyv(p) => YuvRow::Yuyv(p.add(pixels << 1)),
            YuvRow::Uyvy(p) => YuvRow::Uyvy(p.add(pixels << 1)),
        }
    }
}

/// Value of [`Shuffle::order`] entries which produce an opaque alpha byte.
pub const OPAQUE: u8 = 0xff;

/// A byte reordering between packed 3- or 4-channel layouts.
#[doc(hidden)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shuffle {
    pub src_channels: usize,
    pub dst_channels: usize,

    /// Destination channel `i` takes source channel `order[i]`, or 255 when
    /// `order[i] == OPAQUE`. Entries past `dst_channels` are ignored.
    pub order: [u8; 4],
}

impl Shuffle {
    /// Returns the shuffle from one RGB-family format to another, or `None`
    /// if either is a YUV format.
    pub fn between(from: PixelFormat, to: PixelFormat) -> Option<Self> {
        let src_channels = from.rgb_channels()?;
        let dst_channels = to.rgb_channels()?;
        let (r, b) = if from.is_bgr() == to.is_bgr() {
            (0, 2)
        } else {
            (2, 0)
        };
        let a = if src_channels == 4 { 3 } else { OPAQUE };
        Some(Self {
            src_channels,
            dst_channels,
            order: [r, 1, b, a],
        })
    }

    /// Returns a permutation of `channels` channels, validating `order`.
    pub fn permute(channels: usize, order: [u8; 4]) -> Result<Self, ConversionError> {
        if order[..channels].iter().any(|&c| usize::from(c) >= channels) {
            return Err(ConversionError::InvalidShuffle { order, channels });
        }
        Ok(Self {
            src_channels: channels,
            dst_channels: channels,
            order,
        })
    }

    /// Returns true if this shuffle copies pixels unchanged.
    #[cfg(test)]
    pub(crate) fn is_identity(&self) -> bool {
        self.src_channels == self.dst_channels
            && (0..self.dst_channels).all(|i| usize::from(self.order[i]) == i)
    }
}

/// Converts rows of pixels; implementations differ only in the instructions used.
#[doc(hidden)]
pub trait RowProcessor: Copy + Clone + Sized + Send + Sync {
    /// Returns `Ok` if this processor is supported on this machine.
    fn new() -> Result<Self, ConversionError>;

    /// Converts `width` pixels of YUV to the packed RGB-family `format`.
    ///
    /// # Safety
    ///
    /// Caller must ensure the following:
    /// * `src` addresses `width` luma samples and `(width + 1) / 2` chroma
    ///   pairs of initialized data, laid out per its variant.
    /// * `dst` is valid for writing `width * format.rgb_channels()` bytes.
    /// * `format` is an RGB-family format.
    unsafe fn yuv_row(
        self,
        width: usize,
        src: YuvRow,
        dst: *mut u8,
        format: PixelFormat,
        coeffs: &Coefficients,
    );

    /// Reorders `width` pixels.
    ///
    /// # Safety
    ///
    /// * `src` holds `width * shuffle.src_channels` initialized bytes.
    /// * `dst` is valid for writing `width * shuffle.dst_channels` bytes and
    ///   does not overlap `src`.
    /// * `shuffle` was built by [`Shuffle::between`] or [`Shuffle::permute`].
    unsafe fn shuffle_row(self, width: usize, src: *const u8, dst: *mut u8, shuffle: Shuffle);
}

#[inline(always)]
unsafe fn put<const BGR: bool, const ALPHA: bool>(dst: *mut u8, [r, g, b]: [u8; 3]) {
    let (first, last) = if BGR { (b, r) } else { (r, b) };
    std::ptr::write(dst, first);
    std::ptr::write(dst.add(1), g);
    std::ptr::write(dst.add(2), last);
    if ALPHA {
        std::ptr::write(dst.add(3), 0xff);
    }
}

unsafe fn yuv_fallback_as<const BGR: bool, const ALPHA: bool>(
    width: usize,
    src: YuvRow,
    dst: *mut u8,
    c: &Coefficients,
) {
    let bpp = if ALPHA { 4 } else { 3 };
    let read = |p: *const u8, i: usize| std::ptr::read(p.add(i));
    match src {
        YuvRow::Nv12 { y, uv } => {
            for x in 0..width {
                let pair = x & !1;
                let rgb = c.apply(read(y, x), read(uv, pair), read(uv, pair + 1));
                put::<BGR, ALPHA>(dst.add(x * bpp), rgb);
            }
        }
        YuvRow::I420 { y, u, v } => {
            for x in 0..width {
                let rgb = c.apply(read(y, x), read(u, x >> 1), read(v, x >> 1));
                put::<BGR, ALPHA>(dst.add(x * bpp), rgb);
            }
        }
        YuvRow::Yuyv(p) => {
            for x in 0..width {
                let group = (x >> 1) << 2;
                let rgb = c.apply(
                    read(p, group + ((x & 1) << 1)),
                    read(p, group + 1),
                    read(p, group + 3),
                );
                put::<BGR, ALPHA>(dst.add(x * bpp), rgb);
            }
        }
        YuvRow::Uyvy(p) => {
            for x in 0..width {
                let group = (x >> 1) << 2;
                let rgb = c.apply(
                    read(p, group + 1 + ((x & 1) << 1)),
                    read(p, group),
                    read(p, group + 2),
                );
                put::<BGR, ALPHA>(dst.add(x * bpp), rgb);
            }
        }
    }
}

/// Scalar YUV row conversion; also the tail of the vector processors.
pub(crate) unsafe fn yuv_fallback(
    width: usize,
    src: YuvRow,
    dst: *mut u8,
    format: PixelFormat,
    c: &Coefficients,
) {
    match (format.is_bgr(), format.has_alpha()) {
        (false, false) => yuv_fallback_as::<false, false>(width, src, dst, c),
        (true, false) => yuv_fallback_as::<true, false>(width, src, dst, c),
        (false, true) => yuv_fallback_as::<false, true>(width, src, dst, c),
        (true, true) => yuv_fallback_as::<true, true>(width, src, dst, c),
    }
}

unsafe fn shuffle_fallback_as<const SRC: usize, const DST: usize>(
    width: usize,
    src: *const u8,
    dst: *mut u8,
    order: [u8; 4],
) {
    for x in 0..width {
        let s = src.add(x * SRC);
        let d = dst.add(x * DST);
        for (i, &o) in order[..DST].iter().enumerate() {
            let v = if o == OPAQUE {
                0xff
            } else {
                std::ptr::read(s.add(usize::from(o)))
            };
            std::ptr::write(d.add(i), v);
        }
    }
}

/// Scalar channel shuffle; also the tail of the vector processors.
pub(crate) unsafe fn shuffle_fallback(
    width: usize,
    src: *const u8,
    dst: *mut u8,
    shuffle: Shuffle,
) {
    match (shuffle.src_channels, shuffle.dst_channels) {
        (3, 3) => shuffle_fallback_as::<3, 3>(width, src, dst, shuffle.order),
        (3, 4) => shuffle_fallback_as::<3, 4>(width, src, dst, shuffle.order),
        (4, 3) => shuffle_fallback_as::<4, 3>(width, src, dst, shuffle.order),
        (4, 4) => shuffle_fallback_as::<4, 4>(width, src, dst, shuffle.order),
        _ => unreachable!("invalid shuffle {shuffle:?}"),
    }
}

/// Portable processor.
#[doc(hidden)]
#[derive(Copy, Clone, Debug)]
pub struct Scalar(());

impl RowProcessor for Scalar {
    #[inline]
    fn new() -> Result<Self, ConversionError> {
        Ok(Self(()))
    }

    #[inline(never)]
    unsafe fn yuv_row(
        self,
        width: usize,
        src: YuvRow,
        dst: *mut u8,
        format: PixelFormat,
        coeffs: &Coefficients,
    ) {
        yuv_fallback(width, src, dst, format, coeffs)
    }

    #[inline(never)]
    unsafe fn shuffle_row(self, width: usize, src: *const u8, dst: *mut u8, shuffle: Shuffle) {
        shuffle_fallback(width, src, dst, shuffle)
    }
}

/// Returns true if this machine has an explicit vector processor.
pub(crate) fn vector_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    return ExplicitAvx2::new().is_ok();

    #[cfg(target_arch = "aarch64")]
    return ExplicitNeon::new().is_ok();

    #[allow(unreachable_code)]
    false
}

/// A processor chosen at runtime.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Rows {
    Scalar(Scalar),
    #[cfg(target_arch = "x86_64")]
    Avx2(ExplicitAvx2),
    #[cfg(target_arch = "aarch64")]
    Neon(ExplicitNeon),
}

impl Rows {
    pub(crate) fn scalar() -> Self {
        Rows::Scalar(Scalar(()))
    }

    /// Returns the vector processor, or scalar if there is none.
    pub(crate) fn vector() -> Self {
        #[cfg(target_arch = "x86_64")]
        if let Ok(p) = ExplicitAvx2::new() {
            return Rows::Avx2(p);
        }
        #[cfg(target_arch = "aarch64")]
        if let Ok(p) = ExplicitNeon::new() {
            return Rows::Neon(p);
        }
        Self::scalar()
    }
}

/// Evaluates `$body` with `$p` bound to the concrete processor inside `$rows`.
macro_rules! with_rows {
    ($rows:expr, |$p:ident| $body:expr) => {
        match $rows {
            $crate::row::Rows::Scalar($p) => $body,
            #[cfg(target_arch = "x86_64")]
            $crate::row::Rows::Avx2($p) => $body,
            #[cfg(target_arch = "aarch64")]
            $crate::row::Rows::Neon($p) => $body,
        }
    };
}
pub(crate) use with_rows;

/// Calls `f(row_index, row)` for the first `height` rows of `data`, each
/// `stride` bytes apart. With `parallel`, rows are spread across the `rayon` pool.
///
/// The final row may be shorter than `stride`.
pub(crate) fn for_each_row<F>(data: &mut [u8], stride: usize, height: usize, parallel: bool, f: F)
where
    F: Fn(usize, &mut [u8]) + Send + Sync,
{
    if height == 0 || stride == 0 {
        return;
    }
    #[cfg(feature = "rayon")]
    if parallel {
        use rayon::prelude::*;
        data.par_chunks_mut(stride)
            .take(height)
            .enumerate()
            .for_each(|(r, row)| f(r, row));
        return;
    }
    let _ = parallel;
    data.chunks_mut(stride)
        .take(height)
        .enumerate()
        .for_each(|(r, row)| f(r, row));
}

#[cfg(test)]
pub(crate) mod testutil {
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    pub const WIDTHS: &[usize] = &[
        1, 2, 3, 5, 7, 11, 13, 15, 16, 17, 31, 32, 33, 47, 48, 63, 64, 65, 127,
    ];

    pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{random_bytes, WIDTHS};
    use super::*;

    #[test]
    fn shuffle_between() {
        use PixelFormat::*;
        assert_eq!(
            Shuffle::between(Rgb24, Bgr24),
            Some(Shuffle {
                src_channels: 3,
                dst_channels: 3,
                order: [2, 1, 0, OPAQUE]
            })
        );
        assert_eq!(
            Shuffle::between(Bgra32, Bgr24).map(|s| s.order),
            Some([0, 1, 2, 3])
        );
        assert_eq!(
            Shuffle::between(Rgb24, Bgra32).map(|s| s.order),
            Some([2, 1, 0, OPAQUE])
        );
        assert!(Shuffle::between(Rgba32, Rgba32).unwrap().is_identity());
        assert_eq!(Shuffle::between(Nv12, Rgb24), None);
        assert_eq!(Shuffle::between(Rgb24, I420), None);
    }

    #[test]
    fn permute_validation() {
        assert!(Shuffle::permute(3, [2, 0, 1, 0]).is_ok());
        assert!(Shuffle::permute(4, [3, 3, 3, 3]).is_ok());
        assert_eq!(
            Shuffle::permute(3, [0, 1, 3, 0]),
            Err(ConversionError::InvalidShuffle {
                order: [0, 1, 3, 0],
                channels: 3
            })
        );
        assert!(Shuffle::permute(4, [0, 1, 2, OPAQUE]).is_err());
    }

    #[test]
    fn scalar_packed_odd_width() {
        // Two groups; the third pixel's luma is Y2 and the padding luma is ignored.
        let yuyv = [16u8, 128, 235, 128, 235, 128, 99, 128];
        let uyvy = [128u8, 16, 128, 235, 128, 235, 128, 99];
        let c = Coefficients::BT601_VIDEO;
        for (src, expected) in [
            (YuvRow::Yuyv(yuyv.as_ptr()), [0, 255, 255]),
            (YuvRow::Uyvy(uyvy.as_ptr()), [0, 255, 255]),
        ] {
            let mut out = [0u8; 9];
            unsafe { Scalar(()).yuv_row(3, src, out.as_mut_ptr(), PixelFormat::Rgb24, &c) };
            let lumas: Vec<u8> = out.chunks(3).map(|p| p[0]).collect();
            assert_eq!(lumas, expected);
        }
    }

    #[test]
    fn scalar_nv12_chroma_pairs() {
        let y = [128u8; 3];
        let uv = [84u8, 255, 255, 107];
        let mut out = [0u8; 12];
        let c = Coefficients::BT601_VIDEO;
        unsafe {
            Scalar(()).yuv_row(
                3,
                YuvRow::Nv12 {
                    y: y.as_ptr(),
                    uv: uv.as_ptr(),
                },
                out.as_mut_ptr(),
                PixelFormat::Bgra32,
                &c,
            )
        };
        let [r, g, b] = c.apply(128, 84, 255);
        assert_eq!(&out[..4], &[b, g, r, 0xff]);
        assert_eq!(&out[4..8], &[b, g, r, 0xff]);
        let [r, g, b] = c.apply(128, 255, 107);
        assert_eq!(&out[8..], &[b, g, r, 0xff]);
    }

    /// Checks `P` against [`Scalar`] at every awkward width. The vector
    /// processors do the same integer math, so outputs must match exactly.
    macro_rules! test_processor {
        ($processor:ty, $mod:ident) => {
            #[cfg(not(miri))]
            mod $mod {
                use super::super::{RowProcessor as _, Scalar, Shuffle, YuvRow, OPAQUE};
                use super::{random_bytes, WIDTHS};
                use crate::{color::Coefficients, PixelFormat};

                type P = $processor;

                const OUTPUTS: [PixelFormat; 4] = [
                    PixelFormat::Rgb24,
                    PixelFormat::Bgr24,
                    PixelFormat::Rgba32,
                    PixelFormat::Bgra32,
                ];
                const COEFFS: [Coefficients; 4] = [
                    Coefficients::BT601_VIDEO,
                    Coefficients::BT601_FULL,
                    Coefficients::BT709_VIDEO,
                    Coefficients::BT709_FULL,
                ];

                fn check_yuv(name: &str, make: impl Fn(usize, &[u8]) -> YuvRow) {
                    let p = P::new().unwrap();
                    for &width in WIDTHS {
                        // Sized generously for every layout: 2 bytes per pixel, rounded up.
                        let src = random_bytes(4 * width + 4, width as u64);
                        let row = make(width, &src);
                        for format in OUTPUTS {
                            let bpp = format.rgb_channels().unwrap();
                            for c in &COEFFS {
                                // Guard bytes catch writes past the row.
                                let mut expected = vec![0xa5u8; width * bpp + 16];
                                let mut actual = expected.clone();
                                unsafe {
                                    Scalar::new()
                                        .unwrap()
                                        .yuv_row(width, row, expected.as_mut_ptr(), format, c);
                                    p.yuv_row(width, row, actual.as_mut_ptr(), format, c);
                                }
                                assert_eq!(
                                    expected, actual,
                                    "{name} -> {format:?} width={width} coeffs={c:?}"
                                );
                                assert!(actual[width * bpp..].iter().all(|&b| b == 0xa5));
                            }
                        }
                    }
                }

                #[test]
                fn nv12() {
                    check_yuv("nv12", |w, s| YuvRow::Nv12 {
                        y: s.as_ptr(),
                        uv: s[w..].as_ptr(),
                    });
                }

                #[test]
                fn i420() {
                    check_yuv("i420", |w, s| YuvRow::I420 {
                        y: s.as_ptr(),
                        u: s[w..].as_ptr(),
                        v: s[2 * w..].as_ptr(),
                    });
                }

                #[test]
                fn yuyv() {
                    check_yuv("yuyv", |_, s| YuvRow::Yuyv(s.as_ptr()));
                }

                #[test]
                fn uyvy() {
                    check_yuv("uyvy", |_, s| YuvRow::Uyvy(s.as_ptr()));
                }

                #[test]
                fn shuffles() {
                    let p = P::new().unwrap();
                    let mut shuffles = Vec::new();
                    for from in OUTPUTS {
                        for to in OUTPUTS {
                            shuffles.push(Shuffle::between(from, to).unwrap());
                        }
                    }
                    shuffles.push(Shuffle::permute(3, [1, 2, 0, OPAQUE]).unwrap());
                    shuffles.push(Shuffle::permute(3, [0, 0, 0, OPAQUE]).unwrap());
                    shuffles.push(Shuffle::permute(4, [3, 2, 1, 0]).unwrap());
                    shuffles.push(Shuffle::permute(4, [1, 1, 3, 2]).unwrap());
                    for &width in WIDTHS {
                        let src = random_bytes(4 * width, !(width as u64));
                        for s in &shuffles {
                            let mut expected = vec![0x5au8; width * s.dst_channels + 16];
                            let mut actual = expected.clone();
                            unsafe {
                                Scalar::new().unwrap().shuffle_row(
                                    width,
                                    src.as_ptr(),
                                    expected.as_mut_ptr(),
                                    *s,
                                );
                                p.shuffle_row(width, src.as_ptr(), actual.as_mut_ptr(), *s);
                            }
                            assert_eq!(expected, actual, "{s:?} width={width}");
                        }
                    }
                }
            }
        };
    }

    test_processor!(super::Scalar, scalar);
    #[cfg(target_arch = "x86_64")]
    test_processor!(super::ExplicitAvx2, explicit_avx2);
    #[cfg(target_arch = "aarch64")]
    test_processor!(super::ExplicitNeon, explicit_neon);

    #[test]
    fn shuffle_fallback_exact() {
        for &width in WIDTHS {
            let src = random_bytes(3 * width, width as u64);
            let mut rgba = vec![0u8; 4 * width];
            let mut back = vec![0u8; 3 * width];
            let to_rgba = Shuffle::between(PixelFormat::Rgb24, PixelFormat::Rgba32).unwrap();
            let to_rgb = Shuffle::between(PixelFormat::Rgba32, PixelFormat::Rgb24).unwrap();
            unsafe {
                shuffle_fallback(width, src.as_ptr(), rgba.as_mut_ptr(), to_rgba);
                shuffle_fallback(width, rgba.as_ptr(), back.as_mut_ptr(), to_rgb);
            }
            assert!(rgba.chunks(4).all(|p| p[3] == 0xff));
            assert_eq!(src, back);
        }
    }
}
