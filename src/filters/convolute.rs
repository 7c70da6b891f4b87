//! Generic NxN kernel convolution.

use crate::{
    PixelBuffer, PixfxError, PixfxResult, backend::CpuState, filters::PixelFilter,
    filters::clamp_u8,
};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

fn default_kernel() -> Vec<f32> {
    vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]
}

/// Odd-sided square kernel up to 9x9. Out-of-bounds taps are skipped, not
/// clamped or wrapped; `opaque` copies the source pixel's alpha verbatim
/// instead of convolving it.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Convolute {
    #[serde(default = "default_kernel")]
    pub matrix: Vec<f32>,
    #[serde(default)]
    pub opaque: bool,
}

impl Default for Convolute {
    fn default() -> Self {
        Self {
            matrix: default_kernel(),
            opaque: false,
        }
    }
}

impl Convolute {
    fn side(&self) -> PixfxResult<usize> {
        let side = (self.matrix.len() as f64).sqrt().round() as usize;
        if side == 0 || side * side != self.matrix.len() || side % 2 == 0 || side > 9 {
            return Err(PixfxError::validation(
                "convolution kernel must be square with an odd side <= 9",
            ));
        }
        Ok(side)
    }
}

impl PixelFilter for Convolute {
    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let side = self.side()? as i64;
        let half = side / 2;
        let src = &state.buffer;
        let (w, h) = (src.width as i64, src.height as i64);
        let mut out = PixelBuffer::new(src.width, src.height)?;

        for y in 0..h {
            for x in 0..w {
                let mut acc = [0.0f32; 4];
                for cy in 0..side {
                    for cx in 0..side {
                        let sy = y + cy - half;
                        let sx = x + cx - half;
                        if sx < 0 || sy < 0 || sx >= w || sy >= h {
                            continue;
                        }
                        let weight = self.matrix[(cy * side + cx) as usize];
                        let idx = ((sy * w + sx) as usize) * 4;
                        acc[0] += weight * src.data[idx] as f32;
                        acc[1] += weight * src.data[idx + 1] as f32;
                        acc[2] += weight * src.data[idx + 2] as f32;
                        if !self.opaque {
                            acc[3] += weight * src.data[idx + 3] as f32;
                        }
                    }
                }
                let out_idx = ((y * w + x) as usize) * 4;
                out.data[out_idx] = clamp_u8(acc[0]);
                out.data[out_idx + 1] = clamp_u8(acc[1]);
                out.data[out_idx + 2] = clamp_u8(acc[2]);
                out.data[out_idx + 3] = if self.opaque {
                    src.data[out_idx + 3]
                } else {
                    clamp_u8(acc[3])
                };
            }
        }

        // Non-separable transform: the chain continues on a fresh buffer.
        state.buffer = out;
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        let side = self.side()?;
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: &convolute_fragment(side),
            params: vec![if self.opaque { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
            data: Some(self.matrix.clone()),
            aux: None,
            sampling: Sampling::LoadOnly,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        // Loop bounds are baked into the shader, so the side must
        // discriminate compiled programs.
        let side = (self.matrix.len() as f64).sqrt().round() as usize;
        format!("Convolute_{side}")
    }
}

#[cfg(feature = "gpu")]
fn convolute_fragment(side: usize) -> String {
    let half = side / 2;
    format!(
        r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;
@group(0) @binding(3) var<storage, read> data: array<f32>;

const SIDE: i32 = {side};
const HALF: i32 = {half};

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {{
  let p = vec2<i32>(pos.xy);
  let dims = vec2<i32>(textureDimensions(t_src));
  var acc = vec4<f32>(0.0);
  for (var cy: i32 = 0; cy < SIDE; cy++) {{
    for (var cx: i32 = 0; cx < SIDE; cx++) {{
      let sc = p + vec2<i32>(cx - HALF, cy - HALF);
      if (sc.x < 0 || sc.y < 0 || sc.x >= dims.x || sc.y >= dims.y) {{
        continue;
      }}
      acc += textureLoad(t_src, sc, 0) * data[cy * SIDE + cx];
    }}
  }}
  var a = clamp(acc.a, 0.0, 1.0);
  if (params[1].x > 0.5) {{
    a = textureLoad(t_src, p, 0).a;
  }}
  return vec4<f32>(clamp(acc.rgb, vec3<f32>(0.0), vec3<f32>(1.0)), a);
}}
"#
    )
}

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
    fn identity_kernel_is_a_noop() {
        let mut src = PixelBuffer::new(4, 3).unwrap();
        for (i, byte) in src.data.iter_mut().enumerate() {
            *byte = (i * 7 % 256) as u8;
        }
        let out = run(Filter::Convolute(Convolute::default()), &src);
        assert_eq!(out, src);
    }

    #[test]
    fn box_kernel_averages_neighbors() {
        let mut src = PixelBuffer::solid(3, 3, [0, 0, 0, 255]).unwrap();
        src.set_pixel(1, 1, [90, 90, 90, 255]);
        let ninth = 1.0 / 9.0;
        let out = run(
            Filter::Convolute(Convolute {
                matrix: vec![ninth; 9],
                opaque: true,
            }),
            &src,
        );
        assert_eq!(out.pixel(0, 0)[0], 10);
        assert_eq!(out.pixel(1, 1)[0], 10);
        // opaque keeps the source alpha untouched even at corners where
        // the kernel footprint is cut down to four taps.
        assert_eq!(out.pixel(0, 0)[3], 255);
    }

    #[test]
    fn out_of_bounds_taps_are_skipped_not_clamped() {
        // A kernel that only reads the left neighbor: at x=0 that tap is
        // out of bounds and must contribute nothing.
        let src = PixelBuffer::solid(2, 1, [100, 100, 100, 255]).unwrap();
        let out = run(
            Filter::Convolute(Convolute {
                matrix: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                opaque: false,
            }),
            &src,
        );
        assert_eq!(out.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(out.pixel(1, 0), [100, 100, 100, 255]);
    }

    #[test]
    fn rejects_non_square_and_even_kernels() {
        let f = Convolute {
            matrix: vec![1.0; 6],
            opaque: false,
        };
        let mut backend = CpuFilterBackend::new();
        let src = PixelBuffer::new(2, 2).unwrap();
        let mut out = PixelBuffer::new(1, 1).unwrap();
        assert!(
            backend
                .apply_filters(&[Filter::Convolute(f)], &src, &mut out)
                .is_err()
        );
    }

    #[test]
    fn cache_key_folds_kernel_side() {
        let three = Convolute::default();
        let five = Convolute {
            matrix: vec![0.0; 25],
            opaque: false,
        };
        assert_eq!(three.cache_key(), "Convolute_3");
        assert_eq!(five.cache_key(), "Convolute_5");
    }
}
