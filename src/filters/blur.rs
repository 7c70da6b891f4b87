//! Separable blur. The CPU path runs a fixed 15-tap triangle-weighted 1D
//! sampler twice (horizontal then vertical) with mirrored edges; the GPU
//! path is the same taps as a true two-pass shader. The two are tuned to
//! look equivalent, not to match bit for bit.

use crate::{
    PixfxResult,
    backend::{CpuState, ScratchKey},
    filters::PixelFilter,
    filters::clamp_u8,
};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

/// Blur strength in [0, 1]. The pixel radius scales with the smaller image
/// dimension so the blur reads the same on wide and tall surfaces.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Blur {
    #[serde(default)]
    pub blur: f32,
}

const TAPS: i32 = 7;

fn radius_px(blur: f32, width: u32, height: u32) -> f32 {
    blur * 0.12 * width.min(height) as f32
}

fn tap_weight(i: i32) -> f32 {
    (8 - i.abs()) as f32 / 64.0
}

impl PixelFilter for Blur {
    fn is_neutral(&self) -> bool {
        self.blur == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let (w, h) = (state.buffer.width, state.buffer.height);
        let radius = radius_px(self.blur, w, h);
        let len = state.buffer.data.len();

        let mut temp = state.take_scratch(ScratchKey::BlurTemp, len);
        blur_axis(&state.buffer.data, &mut temp[..len], w, h, radius, true);
        blur_axis(&temp[..len], &mut state.buffer.data, w, h, radius, false);
        state.put_scratch(ScratchKey::BlurTemp, temp);
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        // Two axis passes; reserve the extra one up front.
        state.passes += 1;
        let (w, h) = (state.source_width, state.source_height);
        let radius = radius_px(self.blur, w, h);

        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: BLUR_FRAGMENT,
            params: vec![radius / (TAPS as f32 * w as f32), 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Linear,
            output_size: (w, h),
        })?;
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: BLUR_FRAGMENT,
            params: vec![0.0, radius / (TAPS as f32 * h as f32), 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Linear,
            output_size: (w, h),
        })
    }

    fn cache_key(&self) -> String {
        "Blur".to_string()
    }
}

/// One 15-tap pass along one axis, reading `src` and writing `dst`.
/// Fractional tap positions are resolved with linear interpolation and
/// mirrored at the edges.
fn blur_axis(src: &[u8], dst: &mut [u8], width: u32, height: u32, radius: f32, horizontal: bool) {
    let (w, h) = (width as i64, height as i64);
    let axis_len = if horizontal { w } else { h };

    for y in 0..h {
        for x in 0..w {
            let along = if horizontal { x } else { y };
            let mut acc = [0.0f32; 4];
            for i in -TAPS..=TAPS {
                let weight = tap_weight(i);
                let t = along as f32 + radius * (i as f32 / TAPS as f32);
                let i0 = t.floor() as i64;
                let frac = t - i0 as f32;
                let a = mirror(i0, axis_len);
                let b = mirror(i0 + 1, axis_len);
                let (ia, ib) = if horizontal {
                    (((y * w + a) * 4) as usize, ((y * w + b) * 4) as usize)
                } else {
                    (((a * w + x) * 4) as usize, ((b * w + x) * 4) as usize)
                };
                for c in 0..4 {
                    let v = src[ia + c] as f32 * (1.0 - frac) + src[ib + c] as f32 * frac;
                    acc[c] += weight * v;
                }
            }
            let out = ((y * w + x) * 4) as usize;
            for c in 0..4 {
                dst[out + c] = clamp_u8(acc[c]);
            }
        }
    }
}

fn mirror(i: i64, n: i64) -> i64 {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    if m < n { m } else { period - m }
}

#[cfg(feature = "gpu")]
const BLUR_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let delta = params[1].xy;
  var acc = vec4<f32>(0.0);
  for (var i: i32 = -7; i <= 7; i++) {
    let w = f32(8 - abs(i)) / 64.0;
    acc += textureSample(t_src, s_src, uv + delta * f32(i)) * w;
  }
  return acc;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelBuffer;
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

    #[test]
    fn tap_weights_sum_to_one() {
        let sum: f32 = (-TAPS..=TAPS).map(tap_weight).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mirror_reflects_at_both_ends() {
        assert_eq!(mirror(-1, 5), 1);
        assert_eq!(mirror(0, 5), 0);
        assert_eq!(mirror(4, 5), 4);
        assert_eq!(mirror(5, 5), 3);
        assert_eq!(mirror(-3, 5), 3);
    }

    #[test]
    fn blur_of_constant_image_is_identity() {
        let src = PixelBuffer::solid(8, 8, [40, 80, 120, 255]).unwrap();
        let out = run(Filter::Blur(Blur { blur: 0.8 }), &src);
        assert_eq!(out, src);
    }

    #[test]
    fn blur_spreads_a_point() {
        let mut src = PixelBuffer::solid(9, 9, [0, 0, 0, 255]).unwrap();
        src.set_pixel(4, 4, [255, 255, 255, 255]);
        let out = run(Filter::Blur(Blur { blur: 1.0 }), &src);
        let lit = out
            .data
            .chunks_exact(4)
            .filter(|px| px[0] > 0)
            .count();
        assert!(lit > 1, "expected the point to spread, got {lit} lit pixels");
        assert!(out.pixel(4, 4)[0] < 255);
    }

    #[test]
    fn blur_keeps_dimensions() {
        let src = PixelBuffer::solid(6, 3, [10, 10, 10, 255]).unwrap();
        let out = run(Filter::Blur(Blur { blur: 0.5 }), &src);
        assert_eq!((out.width, out.height), (6, 3));
    }
}
