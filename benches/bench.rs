// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use pixconv::{
    backend::{Backend, BackendConfig},
    color::{Coefficients, ConvertFlag},
    row::{RowProcessor, Scalar, YuvRow},
    Converter, PixelFormat,
};

const WIDTH: usize = 1920;
const HEIGHT: usize = 1080;

/// Reads and writes about the right amount of stuff with `memcpy`.
///
/// This produces nonsense; it's useful only as a memory bandwidth baseline.
fn memcpy_baseline(y: &[u8], uv: &[u8], out: &mut [u8]) {
    let (out_y, rest) = out.split_at_mut(y.len());
    out_y.copy_from_slice(y);
    let (out_uv, rest) = rest.split_at_mut(uv.len());
    out_uv.copy_from_slice(uv);
    rest.fill(0xff);
}

fn libyuv(y: &[u8], uv: &[u8], out: &mut [u8]) {
    assert_eq!(y.len(), WIDTH * HEIGHT);
    assert_eq!(uv.len(), WIDTH * HEIGHT / 2);
    assert_eq!(out.len(), WIDTH * HEIGHT * 4);
    // libyuv's "ARGB" is B, G, R, A in memory.
    unsafe {
        assert_eq!(
            0,
            yuv_sys::rs_NV12ToARGB(
                y.as_ptr(),
                WIDTH as i32,
                uv.as_ptr(),
                WIDTH as i32,
                out.as_mut_ptr(),
                (WIDTH * 4) as i32,
                WIDTH as i32,
                HEIGHT as i32,
            )
        );
    }
}

/// Common implementation between `bench_cold` and `bench_hot`.
fn bench_common<const FRAMES_PER_ITER: usize>(
    mut g: criterion::BenchmarkGroup<criterion::measurement::WallTime>,
) {
    // These dummy frames are filled with 1s rather than 0s so that they have
    // to occupy distinct physical memory rather than take advantage of the
    // zero page optimization on Linux. [1] Distinct physical memory is
    // important to stress the CPU cache as real images would.
    //
    // [1] https://lwn.net/Articles/517465/
    let inputs: [_; FRAMES_PER_ITER] =
        std::array::from_fn(|_| (vec![1u8; WIDTH * HEIGHT], vec![1u8; WIDTH * HEIGHT / 2]));
    let mut out = vec![0u8; WIDTH * HEIGHT * 4];
    g.throughput(criterion::Throughput::Bytes(
        (inputs.len() * (WIDTH * HEIGHT * 11) / 2) as u64,
    ));
    g.bench_function("memcpy_baseline", |b| {
        b.iter(|| {
            for (y, uv) in &inputs {
                memcpy_baseline(y, uv, &mut out);
                black_box(&out);
            }
        })
    });
    g.bench_function("libyuv", |b| {
        b.iter(|| {
            for (y, uv) in &inputs {
                libyuv(y, uv, &mut out);
                black_box(&out);
            }
        })
    });
    let config = BackendConfig::new();
    for backend in Backend::CONCRETE {
        let Ok(converter) = Converter::new(&config).pinned(backend) else {
            continue;
        };
        g.bench_function(backend.to_string(), |b| {
            b.iter(|| {
                for (y, uv) in &inputs {
                    converter
                        .nv12_to_bgra32(
                            y,
                            WIDTH,
                            uv,
                            WIDTH,
                            &mut out,
                            WIDTH * 4,
                            WIDTH,
                            HEIGHT as isize,
                            ConvertFlag::DEFAULT,
                        )
                        .unwrap();
                    black_box(&out);
                }
            })
        });
    }
    g.finish();
}

/// Cold benchmark: each iteration processes enough data to be unlikely to fit in cache.
fn bench_cold(c: &mut Criterion) {
    bench_common::<32>(c.benchmark_group("cold"));
}

/// Hot benchmark: each iteration operates on a single frame that likely fits in the CPU's LLC.
fn bench_hot(c: &mut Criterion) {
    bench_common::<1>(c.benchmark_group("hot"));
}

/// Single-row benchmark of each row processor, without dispatch or threading.
fn bench_rows(c: &mut Criterion) {
    let mut g = c.benchmark_group("rows");
    let y = vec![1u8; WIDTH];
    let uv = vec![1u8; WIDTH];
    let mut out = vec![0u8; WIDTH * 4];
    g.throughput(criterion::Throughput::Elements(WIDTH as u64));
    macro_rules! bench_row {
        ($name:literal, $impl:ty) => {
            if let Ok(p) = <$impl>::new() {
                g.bench_function($name, |b| {
                    b.iter(|| unsafe {
                        p.yuv_row(
                            WIDTH,
                            YuvRow::Nv12 {
                                y: y.as_ptr(),
                                uv: uv.as_ptr(),
                            },
                            out.as_mut_ptr(),
                            PixelFormat::Bgra32,
                            &Coefficients::BT601_VIDEO,
                        );
                        black_box(&out);
                    })
                });
            }
        };
    }
    bench_row!("scalar", Scalar);
    #[cfg(target_arch = "x86_64")]
    bench_row!("explicit_avx2", pixconv::row::ExplicitAvx2);
    #[cfg(target_arch = "aarch64")]
    bench_row!("explicit_neon", pixconv::row::ExplicitNeon);
    g.finish();
}

criterion_group!(benches, bench_cold, bench_hot, bench_rows);

criterion_main!(benches);
