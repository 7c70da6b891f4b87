//! Resampling. Four CPU algorithms are selectable; the GPU path is always
//! the two-pass separable windowed sinc and is expected to track the CPU
//! lanczos output closely.

use std::collections::HashMap;
use std::f32::consts::PI;

use crate::{
    PixelBuffer, PixfxResult,
    backend::{CpuState, ScratchKey},
    filters::PixelFilter,
    filters::clamp_u8,
};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeType {
    Bilinear,
    #[default]
    Hermite,
    Lanczos,
    SliceByTwo,
}

fn default_scale() -> f32 {
    1.0
}

fn default_lobes() -> u32 {
    3
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resize {
    #[serde(default = "default_scale")]
    pub scale_x: f32,
    #[serde(default = "default_scale")]
    pub scale_y: f32,
    #[serde(default)]
    pub resize_type: ResizeType,
    #[serde(default = "default_lobes")]
    pub lanczos_lobes: u32,
}

impl Default for Resize {
    fn default() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            resize_type: ResizeType::default(),
            lanczos_lobes: default_lobes(),
        }
    }
}

impl Resize {
    fn dest_dims(&self, sw: u32, sh: u32) -> (u32, u32) {
        let dw = ((sw as f32 * self.scale_x).round() as u32).max(1);
        let dh = ((sh as f32 * self.scale_y).round() as u32).max(1);
        (dw, dh)
    }
}

impl PixelFilter for Resize {
    fn is_neutral(&self) -> bool {
        self.scale_x == 1.0 && self.scale_y == 1.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        if state.buffer.width == 0 || state.buffer.height == 0 {
            return Ok(());
        }
        let (dw, dh) = self.dest_dims(state.buffer.width, state.buffer.height);
        let out = match self.resize_type {
            ResizeType::Bilinear => bilinear(&state.buffer, dw, dh)?,
            ResizeType::Hermite => hermite(&state.buffer, dw, dh)?,
            ResizeType::Lanczos => lanczos(&state.buffer, dw, dh, self.lanczos_lobes.max(1))?,
            ResizeType::SliceByTwo => slice_by_two(state, dw, dh)?,
        };
        state.buffer = out;
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        // One pass per axis; reserve the extra one before running.
        state.passes += 1;
        let (sw, sh) = (state.source_width, state.source_height);
        let (dw, dh) = self.dest_dims(sw, sh);
        let lobes = self.lanczos_lobes.max(1);

        let (win_x, taps_x) = lanczos_taps(lobes, dw as f32 / sw as f32);
        state.run_pass(PassSpec {
            cache_key: format!("Resize_{win_x}"),
            fragment: &resize_fragment(win_x),
            params: vec![1.0 / sw as f32, 0.0, 0.0, 0.0],
            data: Some(taps_x),
            aux: None,
            sampling: Sampling::Linear,
            output_size: (dw, sh),
        })?;

        let (win_y, taps_y) = lanczos_taps(lobes, dh as f32 / sh as f32);
        state.run_pass(PassSpec {
            cache_key: format!("Resize_{win_y}"),
            fragment: &resize_fragment(win_y),
            params: vec![0.0, 1.0 / sh as f32, 0.0, 0.0],
            data: Some(taps_y),
            aux: None,
            sampling: Sampling::Linear,
            output_size: (dw, dh),
        })
    }

    fn cache_key(&self) -> String {
        // The tap window depends on the current per-axis scale, so it is
        // part of the program identity, not just the lobe count.
        let wx = filter_window(self.lanczos_lobes.max(1), self.scale_x);
        let wy = filter_window(self.lanczos_lobes.max(1), self.scale_y);
        format!("Resize_{wx}_{wy}")
    }
}

fn lanczos_kernel(lobes: f32) -> impl Fn(f32) -> f32 {
    move |x: f32| {
        if x.abs() >= lobes {
            return 0.0;
        }
        if x.abs() < 1e-16 {
            return 1.0;
        }
        let xpi = x * PI;
        (xpi.sin() / xpi) * ((xpi / lobes).sin() / (xpi / lobes))
    }
}

fn filter_window(lobes: u32, scale: f32) -> i32 {
    let temp = if scale < 1.0 && scale > 0.0 { scale } else { 1.0 };
    (lobes as f32 / temp).ceil() as i32
}

/// Symmetric tap weights for one axis: `lanczos(i * temp_scale)` for
/// `i in 1..=window`, with the implicit center tap weighing 1.
#[cfg(feature = "gpu")]
fn lanczos_taps(lobes: u32, scale: f32) -> (i32, Vec<f32>) {
    let window = filter_window(lobes, scale);
    let temp = if scale < 1.0 && scale > 0.0 { scale } else { 1.0 };
    let kernel = lanczos_kernel(lobes as f32);
    let taps = (1..=window).map(|i| kernel(i as f32 * temp)).collect();
    (window, taps)
}

#[cfg(feature = "gpu")]
fn resize_fragment(window: i32) -> String {
    format!(
        r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;
@group(0) @binding(3) var<storage, read> data: array<f32>;

const WINDOW: i32 = {window};

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {{
  let uv = pos.xy / params[0].xy;
  let axis = params[1].xy;
  var acc = textureSample(t_src, s_src, uv);
  var total = 1.0;
  for (var i: i32 = 1; i <= WINDOW; i++) {{
    let w = data[i - 1];
    let off = axis * f32(i);
    acc += (textureSample(t_src, s_src, uv + off) + textureSample(t_src, s_src, uv - off)) * w;
    total += 2.0 * w;
  }}
  return acc / total;
}}
"#
    )
}

fn bilinear(src: &PixelBuffer, dw: u32, dh: u32) -> PixfxResult<PixelBuffer> {
    bilinear_from(&src.data, src.width, src.height, dw, dh)
}

/// 4-neighbor interpolation at fractional source coordinates, every
/// channel independently, alpha included.
fn bilinear_from(
    data: &[u8],
    sw: u32,
    sh: u32,
    dw: u32,
    dh: u32,
) -> PixfxResult<PixelBuffer> {
    let mut out = PixelBuffer::new(dw, dh)?;
    let rcp_x = sw as f32 / dw as f32;
    let rcp_y = sh as f32 / dh as f32;
    let (sw_i, sh_i) = (sw as usize, sh as usize);

    for i in 0..dh as usize {
        let ty = i as f32 * rcp_y;
        let y0 = (ty.floor() as usize).min(sh_i - 1);
        let y1 = (y0 + 1).min(sh_i - 1);
        let fy = ty - y0 as f32;
        for j in 0..dw as usize {
            let tx = j as f32 * rcp_x;
            let x0 = (tx.floor() as usize).min(sw_i - 1);
            let x1 = (x0 + 1).min(sw_i - 1);
            let fx = tx - x0 as f32;

            let a = (y0 * sw_i + x0) * 4;
            let b = (y0 * sw_i + x1) * 4;
            let c = (y1 * sw_i + x0) * 4;
            let d = (y1 * sw_i + x1) * 4;
            let out_idx = (i * dw as usize + j) * 4;
            for ch in 0..4 {
                let v = data[a + ch] as f32 * (1.0 - fx) * (1.0 - fy)
                    + data[b + ch] as f32 * fx * (1.0 - fy)
                    + data[c + ch] as f32 * (1.0 - fx) * fy
                    + data[d + ch] as f32 * fx * fy;
                out.data[out_idx + ch] = clamp_u8(v);
            }
        }
    }
    Ok(out)
}

/// Area-weighted box resampling with a cubic falloff. Color channels are
/// alpha-weighted for translucent sources so transparent pixels do not
/// bleed color; alpha keeps its own weight sum to dodge zero divisions at
/// fully transparent edges.
fn hermite(src: &PixelBuffer, dw: u32, dh: u32) -> PixfxResult<PixelBuffer> {
    let mut out = PixelBuffer::new(dw, dh)?;
    let (sw, sh) = (src.width as i64, src.height as i64);
    let ratio_w = src.width as f32 / dw as f32;
    let ratio_h = src.height as f32 / dh as f32;
    let half_w = (ratio_w / 2.0).ceil();
    let half_h = (ratio_h / 2.0).ceil();

    for j in 0..dh as i64 {
        let center_y = (j as f32 + 0.5) * ratio_h;
        let y_start = ((j as f32 * ratio_h).floor() as i64).max(0);
        let y_end = (((j + 1) as f32 * ratio_h).ceil() as i64).min(sh);
        for i in 0..dw as i64 {
            let center_x = (i as f32 + 0.5) * ratio_w;
            let x_start = ((i as f32 * ratio_w).floor() as i64).max(0);
            let x_end = (((i + 1) as f32 * ratio_w).ceil() as i64).min(sw);

            let mut weights = 0.0f32;
            let mut weights_alpha = 0.0f32;
            let mut acc = [0.0f32; 3];
            let mut acc_a = 0.0f32;

            for yy in y_start..y_end {
                let dy = (center_y - (yy as f32 + 0.5)).abs() / half_h;
                let w0 = dy * dy;
                for xx in x_start..x_end {
                    let dx = (center_x - (xx as f32 + 0.5)).abs() / half_w;
                    let w = (w0 + dx * dx).sqrt();
                    if w >= 1.0 {
                        continue;
                    }
                    let mut weight = 2.0 * w * w * w - 3.0 * w * w + 1.0;
                    if weight <= 0.0 {
                        continue;
                    }
                    let idx = ((yy * sw + xx) * 4) as usize;
                    let alpha = src.data[idx + 3] as f32;
                    acc_a += weight * alpha;
                    weights_alpha += weight;
                    if alpha < 255.0 {
                        weight = weight * alpha / 255.0;
                    }
                    for c in 0..3 {
                        acc[c] += weight * src.data[idx + c] as f32;
                    }
                    weights += weight;
                }
            }

            let out_idx = ((j * dw as i64 + i) * 4) as usize;
            for c in 0..3 {
                out.data[out_idx + c] = if weights > 0.0 {
                    clamp_u8(acc[c] / weights)
                } else {
                    0
                };
            }
            out.data[out_idx + 3] = if weights_alpha > 0.0 {
                clamp_u8(acc_a / weights_alpha)
            } else {
                0
            };
        }
    }
    Ok(out)
}

/// Windowed sinc over the full 2D footprint. Kernel evaluations are
/// memoized by distance quantized to thousandths, since the same offsets
/// recur for every destination pixel.
fn lanczos(src: &PixelBuffer, dw: u32, dh: u32, lobes: u32) -> PixfxResult<PixelBuffer> {
    let mut out = PixelBuffer::new(dw, dh)?;
    let (sw, sh) = (src.width as i64, src.height as i64);
    let ratio_x = src.width as f32 / dw as f32;
    let ratio_y = src.height as f32 / dh as f32;
    let rcp_ratio_x = dw as f32 / src.width as f32;
    let rcp_ratio_y = dh as f32 / src.height as f32;
    let range_x = ((ratio_x * lobes as f32) / 2.0).ceil() as i64;
    let range_y = ((ratio_y * lobes as f32) / 2.0).ceil() as i64;
    let kernel = lanczos_kernel(lobes as f32);
    let mut cache: HashMap<(i64, i64), f32> = HashMap::new();

    for u in 0..dw as i64 {
        let cx = (u as f32 + 0.5) * ratio_x;
        let icx = cx.floor() as i64;
        for v in 0..dh as i64 {
            let cy = (v as f32 + 0.5) * ratio_y;
            let icy = cy.floor() as i64;

            let mut total = 0.0f32;
            let mut acc = [0.0f32; 4];
            for i in (icx - range_x)..=(icx + range_x) {
                if i < 0 || i >= sw {
                    continue;
                }
                let fx = (1000.0 * (i as f32 - cx).abs()).floor() as i64;
                for j in (icy - range_y)..=(icy + range_y) {
                    if j < 0 || j >= sh {
                        continue;
                    }
                    let fy = (1000.0 * (j as f32 - cy).abs()).floor() as i64;
                    let weight = *cache.entry((fx, fy)).or_insert_with(|| {
                        let dist = ((fx as f32 * rcp_ratio_x).powi(2)
                            + (fy as f32 * rcp_ratio_y).powi(2))
                        .sqrt()
                            / 1000.0;
                        kernel(dist)
                    });
                    if weight <= 0.0 {
                        continue;
                    }
                    let idx = ((j * sw + i) * 4) as usize;
                    total += weight;
                    for c in 0..4 {
                        acc[c] += weight * src.data[idx + c] as f32;
                    }
                }
            }

            let out_idx = ((v * dw as i64 + u) * 4) as usize;
            for c in 0..4 {
                out.data[out_idx + c] = if total > 0.0 {
                    clamp_u8(acc[c] / total)
                } else {
                    0
                };
            }
        }
    }
    Ok(out)
}

/// Iterative halving: box-halve while both axes stay at least twice the
/// target, then one bilinear draw to the exact size. Large single-step
/// downscales alias badly; stepping at 0.5x per round does not.
fn slice_by_two(state: &mut CpuState<'_>, dw: u32, dh: u32) -> PixfxResult<PixelBuffer> {
    let (mut cw, mut ch) = (state.buffer.width, state.buffer.height);
    let mut front = state.buffer.data.clone();
    let mut back = state.take_scratch(ScratchKey::ResizeSlice, front.len());

    while cw >= dw * 2 && ch >= dh * 2 && (cw > 1 || ch > 1) {
        let nw = cw.div_ceil(2);
        let nh = ch.div_ceil(2);
        half_box(&front, cw, ch, &mut back, nw, nh);
        std::mem::swap(&mut front, &mut back);
        cw = nw;
        ch = nh;
    }

    state.put_scratch(ScratchKey::ResizeSlice, back);
    bilinear_from(&front, cw, ch, dw, dh)
}

/// Average 2x2 blocks into one pixel, clamping the footprint on odd edges.
fn half_box(src: &[u8], sw: u32, sh: u32, dst: &mut Vec<u8>, nw: u32, nh: u32) {
    let needed = (nw * nh * 4) as usize;
    if dst.len() < needed {
        dst.resize(needed, 0);
    }
    let (sw, sh) = (sw as usize, sh as usize);
    for y in 0..nh as usize {
        let y0 = (y * 2).min(sh - 1);
        let y1 = (y * 2 + 1).min(sh - 1);
        for x in 0..nw as usize {
            let x0 = (x * 2).min(sw - 1);
            let x1 = (x * 2 + 1).min(sw - 1);
            let out = (y * nw as usize + x) * 4;
            for c in 0..4 {
                let sum = src[(y0 * sw + x0) * 4 + c] as u16
                    + src[(y0 * sw + x1) * 4 + c] as u16
                    + src[(y1 * sw + x0) * 4 + c] as u16
                    + src[(y1 * sw + x1) * 4 + c] as u16;
                dst[out + c] = ((sum + 2) / 4) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuFilterBackend;
    use crate::filters::Filter;

    fn run(filter: Filter, src: &PixelBuffer) -> PixelBuffer {
        let mut backend = CpuFilterBackend::new();
        let mut out = PixelBuffer::new(1, 1).unwrap();
        backend
            .apply_filters(std::slice::from_ref(&filter), src, &mut out)
            .unwrap();
        out
    }

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h).unwrap();
        for y in 0..h {
            for x in 0..w {
                let v = ((x * 255 / w.max(1)) % 256) as u8;
                buf.set_pixel(x, y, [v, 255 - v, (y * 37 % 256) as u8, 255]);
            }
        }
        buf
    }

    #[test]
    fn scale_one_is_identity_for_every_resize_type() {
        let src = gradient(7, 5);
        for ty in [
            ResizeType::Bilinear,
            ResizeType::Hermite,
            ResizeType::Lanczos,
            ResizeType::SliceByTwo,
        ] {
            let out = run(
                Filter::Resize(Resize {
                    scale_x: 1.0,
                    scale_y: 1.0,
                    resize_type: ty,
                    lanczos_lobes: 3,
                }),
                &src,
            );
            assert_eq!(out, src, "resize_type {ty:?}");
        }
    }

    #[test]
    fn downscale_halves_dimensions() {
        let src = gradient(8, 6);
        for ty in [
            ResizeType::Bilinear,
            ResizeType::Hermite,
            ResizeType::Lanczos,
            ResizeType::SliceByTwo,
        ] {
            let out = run(
                Filter::Resize(Resize {
                    scale_x: 0.5,
                    scale_y: 0.5,
                    resize_type: ty,
                    lanczos_lobes: 3,
                }),
                &src,
            );
            assert_eq!((out.width, out.height), (4, 3), "resize_type {ty:?}");
        }
    }

    #[test]
    fn constant_image_survives_every_algorithm() {
        let src = PixelBuffer::solid(16, 16, [120, 60, 30, 255]).unwrap();
        for ty in [
            ResizeType::Bilinear,
            ResizeType::Hermite,
            ResizeType::Lanczos,
            ResizeType::SliceByTwo,
        ] {
            let out = run(
                Filter::Resize(Resize {
                    scale_x: 0.25,
                    scale_y: 0.25,
                    resize_type: ty,
                    lanczos_lobes: 3,
                }),
                &src,
            );
            for (i, px) in out.data.chunks_exact(4).enumerate() {
                for c in 0..3 {
                    assert!(
                        (px[c] as i32 - [120, 60, 30][c] as i32).abs() <= 1,
                        "resize_type {ty:?} pixel {i} channel {c} = {}",
                        px[c]
                    );
                }
                assert_eq!(px[3], 255);
            }
        }
    }

    #[test]
    fn bilinear_upscale_interpolates_between_neighbors() {
        let mut src = PixelBuffer::new(2, 1).unwrap();
        src.set_pixel(0, 0, [0, 0, 0, 255]);
        src.set_pixel(1, 0, [200, 200, 200, 255]);
        let out = run(
            Filter::Resize(Resize {
                scale_x: 2.0,
                scale_y: 1.0,
                resize_type: ResizeType::Bilinear,
                lanczos_lobes: 3,
            }),
            &src,
        );
        assert_eq!(out.width, 4);
        assert_eq!(out.pixel(0, 0)[0], 0);
        assert_eq!(out.pixel(1, 0)[0], 100);
        assert_eq!(out.pixel(2, 0)[0], 200);
    }

    #[test]
    fn hermite_ignores_color_of_transparent_pixels() {
        // Left half loud red but fully transparent; right half opaque blue.
        let mut src = PixelBuffer::new(8, 2).unwrap();
        for y in 0..2 {
            for x in 0..8 {
                if x < 4 {
                    src.set_pixel(x, y, [255, 0, 0, 0]);
                } else {
                    src.set_pixel(x, y, [0, 0, 255, 255]);
                }
            }
        }
        let out = run(
            Filter::Resize(Resize {
                scale_x: 0.25,
                scale_y: 0.5,
                resize_type: ResizeType::Hermite,
                lanczos_lobes: 3,
            }),
            &src,
        );
        // The fully transparent destination pixel carries no red.
        assert_eq!(out.pixel(0, 0)[3], 0);
        assert_eq!(out.pixel(0, 0)[0], 0);
        // The opaque side stays blue.
        assert_eq!(out.pixel(1, 0)[2], 255);
    }

    #[test]
    fn lanczos_weight_cache_quantizes_consistently() {
        // A 4x downscale revisits identical quantized offsets for every
        // destination pixel; interior pixels must agree on a constant
        // source.
        let src = PixelBuffer::solid(32, 32, [77, 150, 9, 255]).unwrap();
        let out = run(
            Filter::Resize(Resize {
                scale_x: 0.25,
                scale_y: 0.25,
                resize_type: ResizeType::Lanczos,
                lanczos_lobes: 2,
            }),
            &src,
        );
        let center = out.pixel(4, 4);
        let other = out.pixel(3, 5);
        assert_eq!(center, other);
    }

    #[test]
    fn slice_by_two_handles_odd_dimensions() {
        let src = gradient(13, 9);
        let out = run(
            Filter::Resize(Resize {
                scale_x: 0.2,
                scale_y: 0.2,
                resize_type: ResizeType::SliceByTwo,
                lanczos_lobes: 3,
            }),
            &src,
        );
        assert_eq!((out.width, out.height), (3, 2));
    }

    #[test]
    fn cache_key_folds_the_tap_window() {
        let down = Resize {
            scale_x: 0.25,
            scale_y: 0.25,
            resize_type: ResizeType::Lanczos,
            lanczos_lobes: 3,
        };
        let up = Resize {
            scale_x: 2.0,
            scale_y: 2.0,
            resize_type: ResizeType::Lanczos,
            lanczos_lobes: 3,
        };
        assert_eq!(down.cache_key(), "Resize_12_12");
        assert_eq!(up.cache_key(), "Resize_3_3");
        assert_ne!(down.cache_key(), up.cache_key());
    }
}
