//! CPU/GPU output parity. Compiled only with `--features gpu`; every test
//! skips itself on machines with no usable adapter.

#![cfg(feature = "gpu")]

use pixfx::PixelBuffer;
use pixfx::backend::{CpuFilterBackend, GpuFilterBackend, probe};
use pixfx::filters::{
    BlendColor, BlendMode, Blur, Brightness, ColorMatrix, Contrast, Filter, Gamma, Grayscale,
    GrayscaleMode, Invert, Resize, ResizeType, Saturation, Vibrance,
};

fn gpu_backend() -> Option<GpuFilterBackend> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    probe()?;
    match GpuFilterBackend::new() {
        Ok(backend) => Some(backend),
        Err(err) => {
            eprintln!("skipping gpu tests: {err}");
            None
        }
    }
}

fn test_image() -> PixelBuffer {
    let mut buf = PixelBuffer::new(16, 12).unwrap();
    for y in 0..12u32 {
        for x in 0..16u32 {
            buf.set_pixel(
                x,
                y,
                [
                    (x * 16) as u8,
                    (y * 20) as u8,
                    ((x + y) * 9 % 256) as u8,
                    255,
                ],
            );
        }
    }
    buf
}

fn max_channel_delta(a: &PixelBuffer, b: &PixelBuffer) -> u8 {
    assert_eq!((a.width, a.height), (b.width, b.height));
    a.data
        .iter()
        .zip(b.data.iter())
        .map(|(&x, &y)| x.abs_diff(y))
        .max()
        .unwrap_or(0)
}

fn assert_parity(gpu: &mut GpuFilterBackend, chain: &[Filter], tolerance: u8) {
    let src = test_image();
    let mut cpu_backend = CpuFilterBackend::new();
    let mut cpu_out = PixelBuffer::new(1, 1).unwrap();
    let mut gpu_out = PixelBuffer::new(1, 1).unwrap();

    cpu_backend.apply_filters(chain, &src, &mut cpu_out).unwrap();
    gpu.apply_filters(chain, &src, &mut gpu_out, None).unwrap();

    let delta = max_channel_delta(&cpu_out, &gpu_out);
    assert!(
        delta <= tolerance,
        "chain {chain:?} drifted by {delta} (> {tolerance})"
    );
}

#[test]
fn pointwise_filters_match_within_two() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    let chains: Vec<Vec<Filter>> = vec![
        vec![Filter::Brightness(Brightness { brightness: 0.3 })],
        vec![Filter::Brightness(Brightness { brightness: -0.25 })],
        vec![Filter::Contrast(Contrast { contrast: 0.4 })],
        vec![Filter::Invert(Invert::default())],
        vec![Filter::Grayscale(Grayscale {
            mode: GrayscaleMode::Luminosity,
        })],
        vec![Filter::Saturation(Saturation { saturation: 0.5 })],
        vec![Filter::Vibrance(Vibrance { vibrance: 0.5 })],
        vec![Filter::ColorMatrix(ColorMatrix {
            matrix: [
                0.0, 1.0, 0.0, 0.0, 0.1, //
                1.0, 0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.5, 0.0, 0.2, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            colors_only: false,
        })],
        vec![Filter::Gamma(Gamma::new([2.2, 1.4, 0.9]))],
    ];
    for chain in &chains {
        assert_parity(&mut gpu, chain, 2);
    }
}

#[test]
fn blend_color_modes_match_exactly_within_rounding() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    for mode in [
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Add,
        BlendMode::Difference,
        BlendMode::Subtract,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::Exclusion,
        BlendMode::Tint,
    ] {
        let chain = vec![Filter::BlendColor(BlendColor {
            color: "#d06030".to_string(),
            mode,
            alpha: 0.8,
        })];
        assert_parity(&mut gpu, &chain, 2);
    }
}

#[test]
fn chained_filters_share_one_pass_countdown() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    let chain = vec![
        Filter::Invert(Invert::default()),
        Filter::Brightness(Brightness { brightness: 0.1 }),
        Filter::Contrast(Contrast { contrast: 0.2 }),
    ];
    assert_parity(&mut gpu, &chain, 2);
}

#[test]
fn blur_is_visually_equivalent_not_bit_exact() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    // The CPU 15-tap sampler and the GPU separable shader share taps but
    // not interpolation order; allow a loose band.
    let chain = vec![Filter::Blur(Blur { blur: 0.5 })];
    assert_parity(&mut gpu, &chain, 12);
}

#[test]
fn lanczos_resize_tracks_cpu_output() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    let chain = vec![Filter::Resize(Resize {
        scale_x: 0.5,
        scale_y: 0.5,
        resize_type: ResizeType::Lanczos,
        lanczos_lobes: 3,
    })];

    let src = test_image();
    let mut cpu_backend = CpuFilterBackend::new();
    let mut cpu_out = PixelBuffer::new(1, 1).unwrap();
    let mut gpu_out = PixelBuffer::new(1, 1).unwrap();
    cpu_backend.apply_filters(&chain, &src, &mut cpu_out).unwrap();
    gpu.apply_filters(&chain, &src, &mut gpu_out, None).unwrap();

    assert_eq!((gpu_out.width, gpu_out.height), (8, 6));
    assert_eq!((cpu_out.width, cpu_out.height), (8, 6));
    // Approximations differ at the tap level; the surfaces must stay close.
    let delta = max_channel_delta(&cpu_out, &gpu_out);
    assert!(delta <= 16, "lanczos parity drifted by {delta}");
}

#[test]
fn texture_cache_reuse_and_eviction() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    let src = test_image();
    let chain = vec![Filter::Invert(Invert::default())];
    let mut first = PixelBuffer::new(1, 1).unwrap();
    let mut second = PixelBuffer::new(1, 1).unwrap();

    gpu.apply_filters(&chain, &src, &mut first, Some("img-1"))
        .unwrap();
    // Second run reuses the cached original texture.
    gpu.apply_filters(&chain, &src, &mut second, Some("img-1"))
        .unwrap();
    assert_eq!(first, second);

    gpu.evict_caches_for_key("img-1");
    gpu.clear_caches();
    gpu.apply_filters(&chain, &src, &mut second, Some("img-1"))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_and_neutral_chains_copy_source() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    let src = test_image();
    let mut out = PixelBuffer::new(1, 1).unwrap();
    gpu.apply_filters(&[], &src, &mut out, None).unwrap();
    assert_eq!(out, src);

    let neutral = vec![Filter::Brightness(Brightness { brightness: 0.0 })];
    gpu.apply_filters(&neutral, &src, &mut out, None).unwrap();
    assert_eq!(out, src);
}
