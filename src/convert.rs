// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion entry points and backend dispatch.

use tracing::trace;

use crate::{
    backend::{Backend, BackendConfig},
    color::{Coefficients, ConvertFlag},
    frame::{Image, ImageMut, Orientation, Plane, PlaneMut},
    row::{with_rows, Rows, Shuffle, OPAQUE},
    scratch, shuffle, yuv_to_rgb, ConversionError, PixelFormat,
};

/// The per-pixel operation of one conversion, resolved before any row is touched.
#[derive(Copy, Clone, Debug)]
enum Op {
    Yuv(Coefficients),
    Shuffle(Shuffle),
}

impl Op {
    fn run(
        self,
        rows: Rows,
        src: &Image<'_>,
        dst: &mut ImageMut<'_>,
        orientation: Orientation,
        parallel: bool,
    ) {
        with_rows!(rows, |p| match self {
            Op::Yuv(c) => yuv_to_rgb::convert_with(p, src, dst, &c, orientation, parallel),
            Op::Shuffle(s) => shuffle::convert_with(p, src, dst, s, orientation, parallel),
        })
    }
}

/// Performs conversions with the backend chosen by a [`BackendConfig`].
///
/// The backend is resolved once at the start of each call.
///
/// ```
/// use pixconv::{backend::{Backend, BackendConfig}, Converter};
/// let config = BackendConfig::new();
/// let scalar = Converter::new(&config).pinned(Backend::Scalar).unwrap();
/// let (rgb, mut bgr) = ([1u8, 2, 3], [0u8; 3]);
/// scalar.rgb_to_bgr(&rgb, 3, &mut bgr, 3, 1, 1).unwrap();
/// assert_eq!(bgr, [3, 2, 1]);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct Converter<'c> {
    config: &'c BackendConfig,
    pinned: Option<Backend>,
}

impl Converter<'static> {
    /// Returns a converter using [`BackendConfig::global`].
    pub fn global() -> Self {
        Self::new(BackendConfig::global())
    }
}

impl<'c> Converter<'c> {
    pub fn new(config: &'c BackendConfig) -> Self {
        Self {
            config,
            pinned: None,
        }
    }

    /// Returns a converter which always uses `backend`, regardless of later
    /// changes to the selection. [`Backend::Automatic`] unpins.
    ///
    /// While the pinned backend is disabled, conversions use [`Backend::Scalar`].
    pub fn pinned(self, backend: Backend) -> Result<Self, ConversionError> {
        if !self.config.query(backend) {
            return Err(ConversionError::BackendUnavailable(backend));
        }
        Ok(Self {
            pinned: (backend != Backend::Automatic).then_some(backend),
            ..self
        })
    }

    #[inline]
    pub fn config(&self) -> &'c BackendConfig {
        self.config
    }

    /// Returns the concrete backend the next conversion will use.
    pub fn backend(&self) -> Backend {
        match self.pinned {
            Some(backend) if self.config.query(backend) => backend,
            Some(_) => Backend::Scalar,
            None => self.config.backend(),
        }
    }

    /// Converts `src` into `dst`.
    ///
    /// YUV sources are interpreted per `flag`; RGB-family sources ignore it.
    /// Nothing is written unless every check passes.
    pub fn convert(
        &self,
        src: &Image<'_>,
        dst: &mut ImageMut<'_>,
        flag: ConvertFlag,
        orientation: Orientation,
    ) -> Result<(), ConversionError> {
        let op = if src.format().is_yuv() {
            Op::Yuv(Coefficients::for_flag(flag)?)
        } else {
            Op::Shuffle(Shuffle::between(src.format(), dst.format()).ok_or(
                ConversionError::Unsupported {
                    from: src.format(),
                    to: dst.format(),
                },
            )?)
        };
        self.run(src, dst, op, orientation)
    }

    fn run(
        &self,
        src: &Image<'_>,
        dst: &mut ImageMut<'_>,
        op: Op,
        orientation: Orientation,
    ) -> Result<(), ConversionError> {
        let (width, height) = src.pixel_dimensions();
        let (dst_width, dst_height) = dst.pixel_dimensions();
        if (dst_width, dst_height) != (width, height) {
            return Err(ConversionError::DimensionMismatch {
                src_width: width,
                src_height: height,
                dst_width,
                dst_height,
            });
        }
        if width == 0 || height == 0 {
            return Ok(());
        }
        let backend = self.backend();
        trace!(
            %backend,
            from = ?src.format(),
            to = ?dst.format(),
            width,
            height,
            ?orientation,
            "converting"
        );
        match backend {
            Backend::Automatic | Backend::Scalar => {
                op.run(Rows::scalar(), src, dst, orientation, false)
            }
            Backend::Vector => op.run(Rows::vector(), src, dst, orientation, false),
            Backend::Accelerated => {
                let rows = if self.config.query(Backend::Vector) {
                    Rows::vector()
                } else {
                    Rows::scalar()
                };
                match op {
                    Op::Yuv(c) if dst.format().rgb_channels() == Some(3) => {
                        return staged(rows, src, dst, c, orientation);
                    }
                    _ => op.run(rows, src, dst, orientation, true),
                }
            }
        }
        Ok(())
    }

    fn permute(
        &self,
        format: PixelFormat,
        src: Plane<'_>,
        dst: PlaneMut<'_>,
        width: usize,
        height: isize,
        shuffle: Result<Shuffle, ConversionError>,
    ) -> Result<(), ConversionError> {
        let shuffle = shuffle?;
        let (height, orientation) = Orientation::from_height(height);
        let src = Image::new(format, width, height, [src])?;
        let mut dst = ImageMut::new(format, width, height, dst)?;
        self.run(&src, &mut dst, Op::Shuffle(shuffle), orientation)
    }

    /// Reorders the channels of packed RGB pixels: destination channel `i`
    /// takes source channel `order[i]`.
    #[allow(clippy::too_many_arguments)]
    pub fn rgb_shuffle(
        &self,
        src: &[u8],
        src_stride: usize,
        dst: &mut [u8],
        dst_stride: usize,
        width: usize,
        height: isize,
        order: [u8; 3],
    ) -> Result<(), ConversionError> {
        let [a, b, c] = order;
        self.permute(
            PixelFormat::Rgb24,
            Plane::new(src, src_stride),
            PlaneMut::new(dst, dst_stride),
            width,
            height,
            Shuffle::permute(3, [a, b, c, OPAQUE]),
        )
    }

    /// Reorders the channels of packed RGBA pixels: destination channel `i`
    /// takes source channel `order[i]`.
    #[allow(clippy::too_many_arguments)]
    pub fn rgba_shuffle(
        &self,
        src: &[u8],
        src_stride: usize,
        dst: &mut [u8],
        dst_stride: usize,
        width: usize,
        height: isize,
        order: [u8; 4],
    ) -> Result<(), ConversionError> {
        self.permute(
            PixelFormat::Rgba32,
            Plane::new(src, src_stride),
            PlaneMut::new(dst, dst_stride),
            width,
            height,
            Shuffle::permute(4, order),
        )
    }
}

/// Converts YUV to a 3-channel format by way of a 4-channel scratch image,
/// so both passes run on whole rows in parallel.
fn staged(
    rows: Rows,
    src: &Image<'_>,
    dst: &mut ImageMut<'_>,
    coeffs: Coefficients,
    orientation: Orientation,
) -> Result<(), ConversionError> {
    let (width, height) = src.pixel_dimensions();
    let wide = if dst.format().is_bgr() {
        PixelFormat::Bgra32
    } else {
        PixelFormat::Rgba32
    };
    let shuffle = Shuffle::between(wide, dst.format()).ok_or(ConversionError::Unsupported {
        from: wide,
        to: dst.format(),
    })?;
    let stride = width.checked_mul(4).ok_or(ConversionError::Overflow)?;
    let len = stride.checked_mul(height).ok_or(ConversionError::Overflow)?;
    let mut lease = scratch::lease();
    let mut stage = ImageMut::new(wide, width, height, PlaneMut::new(lease.resize(len), stride))?;
    Op::Yuv(coeffs).run(rows, src, &mut stage, orientation, true);
    Op::Shuffle(shuffle).run(rows, &stage.as_image(), dst, Orientation::TopDown, true);
    Ok(())
}

/// Defines YUV entry points as [`Converter`] methods plus free functions
/// using [`Converter::global`].
macro_rules! yuv_conversions {
    ($( fn $name:ident($($plane:ident, $stride:ident);+) $from:ident -> $to:ident; )*) => {
        impl Converter<'_> {
            $(
                #[doc = concat!(
                    "Converts [`PixelFormat::", stringify!($from), "`] to [`PixelFormat::",
                    stringify!($to), "`].\n\nA negative `height` flips the image vertically."
                )]
                #[allow(clippy::too_many_arguments)]
                pub fn $name(
                    &self,
                    $($plane: &[u8], $stride: usize,)+
                    dst: &mut [u8],
                    dst_stride: usize,
                    width: usize,
                    height: isize,
                    flag: ConvertFlag,
                ) -> Result<(), ConversionError> {
                    let (height, orientation) = Orientation::from_height(height);
                    let src = Image::new(
                        PixelFormat::$from,
                        width,
                        height,
                        [$(Plane::new($plane, $stride)),+],
                    )?;
                    let mut dst = ImageMut::new(
                        PixelFormat::$to,
                        width,
                        height,
                        PlaneMut::new(dst, dst_stride),
                    )?;
                    self.convert(&src, &mut dst, flag, orientation)
                }
            )*
        }

        $(
            #[doc = concat!(
                "See [`Converter::", stringify!($name), "`]; uses the global backend config."
            )]
            #[allow(clippy::too_many_arguments)]
            pub fn $name(
                $($plane: &[u8], $stride: usize,)+
                dst: &mut [u8],
                dst_stride: usize,
                width: usize,
                height: isize,
                flag: ConvertFlag,
            ) -> Result<(), ConversionError> {
                Converter::global().$name($($plane, $stride,)+ dst, dst_stride, width, height, flag)
            }
        )*
    };
}

yuv_conversions! {
    fn nv12_to_rgb24(y, y_stride; uv, uv_stride) Nv12 -> Rgb24;
    fn nv12_to_bgr24(y, y_stride; uv, uv_stride) Nv12 -> Bgr24;
    fn nv12_to_rgba32(y, y_stride; uv, uv_stride) Nv12 -> Rgba32;
    fn nv12_to_bgra32(y, y_stride; uv, uv_stride) Nv12 -> Bgra32;
    fn i420_to_rgb24(y, y_stride; u, u_stride; v, v_stride) I420 -> Rgb24;
    fn i420_to_bgr24(y, y_stride; u, u_stride; v, v_stride) I420 -> Bgr24;
    fn i420_to_rgba32(y, y_stride; u, u_stride; v, v_stride) I420 -> Rgba32;
    fn i420_to_bgra32(y, y_stride; u, u_stride; v, v_stride) I420 -> Bgra32;
    fn yuyv_to_rgb24(src, src_stride) Yuyv -> Rgb24;
    fn yuyv_to_bgr24(src, src_stride) Yuyv -> Bgr24;
    fn yuyv_to_rgba32(src, src_stride) Yuyv -> Rgba32;
    fn yuyv_to_bgra32(src, src_stride) Yuyv -> Bgra32;
    fn uyvy_to_rgb24(src, src_stride) Uyvy -> Rgb24;
    fn uyvy_to_bgr24(src, src_stride) Uyvy -> Bgr24;
    fn uyvy_to_rgba32(src, src_stride) Uyvy -> Rgba32;
    fn uyvy_to_bgra32(src, src_stride) Uyvy -> Bgra32;
}

/// Defines channel shuffles as [`Converter`] methods plus free functions
/// using [`Converter::global`].
macro_rules! shuffle_conversions {
    ($( fn $name:ident $from:ident -> $to:ident; )*) => {
        impl Converter<'_> {
            $(
                #[doc = concat!(
                    "Converts [`PixelFormat::", stringify!($from), "`] to [`PixelFormat::",
                    stringify!($to), "`].\n\nA negative `height` flips the image vertically."
                )]
                pub fn $name(
                    &self,
                    src: &[u8],
                    src_stride: usize,
                    dst: &mut [u8],
                    dst_stride: usize,
                    width: usize,
                    height: isize,
                ) -> Result<(), ConversionError> {
                    let (height, orientation) = Orientation::from_height(height);
                    let src = Image::new(
                        PixelFormat::$from,
                        width,
                        height,
                        [Plane::new(src, src_stride)],
                    )?;
                    let mut dst = ImageMut::new(
                        PixelFormat::$to,
                        width,
                        height,
                        PlaneMut::new(dst, dst_stride),
                    )?;
                    self.convert(&src, &mut dst, ConvertFlag::DEFAULT, orientation)
                }
            )*
        }

        $(
            #[doc = concat!(
                "See [`Converter::", stringify!($name), "`]; uses the global backend config."
            )]
            pub fn $name(
                src: &[u8],
                src_stride: usize,
                dst: &mut [u8],
                dst_stride: usize,
                width: usize,
                height: isize,
            ) -> Result<(), ConversionError> {
                Converter::global().$name(src, src_stride, dst, dst_stride, width, height)
            }
        )*
    };
}

shuffle_conversions! {
    fn rgb_to_bgr Rgb24 -> Bgr24;
    fn bgr_to_rgb Bgr24 -> Rgb24;
    fn rgba_to_bgra Rgba32 -> Bgra32;
    fn bgra_to_rgba Bgra32 -> Rgba32;
    fn rgba_to_rgb Rgba32 -> Rgb24;
    fn bgra_to_bgr Bgra32 -> Bgr24;
    fn rgba_to_bgr Rgba32 -> Bgr24;
    fn bgra_to_rgb Bgra32 -> Rgb24;
    fn rgb_to_rgba Rgb24 -> Rgba32;
    fn bgr_to_bgra Bgr24 -> Bgra32;
    fn rgb_to_bgra Rgb24 -> Bgra32;
    fn bgr_to_rgba Bgr24 -> Rgba32;
}

/// See [`Converter::rgb_shuffle`]; uses the global backend config.
pub fn rgb_shuffle(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: isize,
    order: [u8; 3],
) -> Result<(), ConversionError> {
    Converter::global().rgb_shuffle(src, src_stride, dst, dst_stride, width, height, order)
}

/// See [`Converter::rgba_shuffle`]; uses the global backend config.
pub fn rgba_shuffle(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: isize,
    order: [u8; 4],
) -> Result<(), ConversionError> {
    Converter::global().rgba_shuffle(src, src_stride, dst, dst_stride, width, height, order)
}
