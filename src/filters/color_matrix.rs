//! Linear-algebra color transforms: the generic 4x5 matrix, hue rotation
//! expressed as a synthesized matrix, and gamma via a per-channel lookup
//! table.

use std::cell::OnceCell;

use crate::{PixfxResult, backend::CpuState, filters::PixelFilter, filters::clamp_u8};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

pub(crate) const IDENTITY_MATRIX: [f32; 20] = [
    1.0, 0.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, 0.0,
];

fn default_matrix() -> [f32; 20] {
    IDENTITY_MATRIX
}

/// 4x5 row-major matrix over the RGBA vector plus a constant column
/// (scaled by 255 on the CPU path). `colors_only` skips the alpha row and
/// the alpha input terms.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColorMatrix {
    #[serde(default = "default_matrix")]
    pub matrix: [f32; 20],
    #[serde(default)]
    pub colors_only: bool,
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self {
            matrix: IDENTITY_MATRIX,
            colors_only: false,
        }
    }
}

impl PixelFilter for ColorMatrix {
    fn is_neutral(&self) -> bool {
        self.matrix == IDENTITY_MATRIX
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        apply_matrix_cpu(&mut state.buffer.data, &self.matrix, self.colors_only);
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: COLOR_MATRIX_FRAGMENT,
            params: matrix_params(&self.matrix, self.colors_only),
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "ColorMatrix".to_string()
    }
}

pub(crate) fn apply_matrix_cpu(data: &mut [u8], m: &[f32; 20], colors_only: bool) {
    for px in data.chunks_exact_mut(4) {
        let (r, g, b, a) = (
            px[0] as f32,
            px[1] as f32,
            px[2] as f32,
            px[3] as f32,
        );
        if colors_only {
            px[0] = clamp_u8(m[0] * r + m[1] * g + m[2] * b + m[4] * 255.0);
            px[1] = clamp_u8(m[5] * r + m[6] * g + m[7] * b + m[9] * 255.0);
            px[2] = clamp_u8(m[10] * r + m[11] * g + m[12] * b + m[14] * 255.0);
        } else {
            px[0] = clamp_u8(m[0] * r + m[1] * g + m[2] * b + m[3] * a + m[4] * 255.0);
            px[1] = clamp_u8(m[5] * r + m[6] * g + m[7] * b + m[8] * a + m[9] * 255.0);
            px[2] = clamp_u8(m[10] * r + m[11] * g + m[12] * b + m[13] * a + m[14] * 255.0);
            px[3] = clamp_u8(m[15] * r + m[16] * g + m[17] * b + m[18] * a + m[19] * 255.0);
        }
    }
}

#[cfg(feature = "gpu")]
fn matrix_params(m: &[f32; 20], colors_only: bool) -> Vec<f32> {
    let mut params = Vec::with_capacity(24);
    params.extend_from_slice(m);
    params.extend_from_slice(&[if colors_only { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0]);
    params
}

#[cfg(feature = "gpu")]
const COLOR_MATRIX_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 7>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  // params[1..6] hold the 4x5 matrix flattened row-major.
  let m = array<f32, 20>(
    params[1].x, params[1].y, params[1].z, params[1].w, params[2].x,
    params[2].y, params[2].z, params[2].w, params[3].x, params[3].y,
    params[3].z, params[3].w, params[4].x, params[4].y, params[4].z,
    params[4].w, params[5].x, params[5].y, params[5].z, params[5].w,
  );
  let colors_only = params[6].x > 0.5;
  var r = m[0] * c.r + m[1] * c.g + m[2] * c.b + m[4];
  var g = m[5] * c.r + m[6] * c.g + m[7] * c.b + m[9];
  var b = m[10] * c.r + m[11] * c.g + m[12] * c.b + m[14];
  var a = c.a;
  if (!colors_only) {
    r += m[3] * c.a;
    g += m[8] * c.a;
    b += m[13] * c.a;
    a = m[15] * c.r + m[16] * c.g + m[17] * c.b + m[18] * c.a + m[19];
  }
  return clamp(vec4<f32>(r, g, b, a), vec4<f32>(0.0), vec4<f32>(1.0));
}
"#;

/// Hue rotation around the gray axis, `rotation` in radians. Synthesizes
/// a color matrix and reuses the ColorMatrix kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HueRotation {
    #[serde(default)]
    pub rotation: f32,
}

impl HueRotation {
    pub fn matrix(&self) -> [f32; 20] {
        let cos = self.rotation.cos();
        let sin = self.rotation.sin();
        let third = 1.0f32 / 3.0;
        let third_sqrt_sin = third.sqrt() * sin;
        let one_minus_cos = 1.0 - cos;

        let mut m = IDENTITY_MATRIX;
        m[0] = cos + one_minus_cos / 3.0;
        m[1] = third * one_minus_cos - third_sqrt_sin;
        m[2] = third * one_minus_cos + third_sqrt_sin;
        m[5] = third * one_minus_cos + third_sqrt_sin;
        m[6] = cos + third * one_minus_cos;
        m[7] = third * one_minus_cos - third_sqrt_sin;
        m[10] = third * one_minus_cos - third_sqrt_sin;
        m[11] = third * one_minus_cos + third_sqrt_sin;
        m[12] = cos + third * one_minus_cos;
        m
    }

    fn as_color_matrix(&self) -> ColorMatrix {
        ColorMatrix {
            matrix: self.matrix(),
            colors_only: true,
        }
    }
}

impl PixelFilter for HueRotation {
    fn is_neutral(&self) -> bool {
        self.rotation == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        self.as_color_matrix().apply_to_cpu(state)
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: COLOR_MATRIX_FRAGMENT,
            params: matrix_params(&self.matrix(), true),
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        // Shares the ColorMatrix program; the shader source is identical.
        "ColorMatrix".to_string()
    }
}

fn default_gamma() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

/// Per-channel gamma correction through a cached 256-entry lookup table.
/// The table is rebuilt lazily after every [`Gamma::set_gamma`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Gamma {
    #[serde(default = "default_gamma")]
    gamma: [f32; 3],
    #[serde(skip)]
    lut: OnceCell<Box<[[u8; 256]; 3]>>,
}

impl Gamma {
    pub fn new(gamma: [f32; 3]) -> Self {
        Self {
            gamma,
            lut: OnceCell::new(),
        }
    }

    pub fn gamma(&self) -> [f32; 3] {
        self.gamma
    }

    /// Replace the gamma triple and drop the stale lookup table.
    pub fn set_gamma(&mut self, gamma: [f32; 3]) {
        self.gamma = gamma;
        self.lut = OnceCell::new();
    }

    fn lut(&self) -> &[[u8; 256]; 3] {
        self.lut.get_or_init(|| {
            let mut table = Box::new([[0u8; 256]; 3]);
            for (channel, &g) in self.gamma.iter().enumerate() {
                let exponent = 1.0 / g;
                for (i, slot) in table[channel].iter_mut().enumerate() {
                    *slot = clamp_u8(255.0 * (i as f32 / 255.0).powf(exponent));
                }
            }
            table
        })
    }
}

impl Default for Gamma {
    fn default() -> Self {
        Self::new(default_gamma())
    }
}

impl PartialEq for Gamma {
    fn eq(&self, other: &Self) -> bool {
        self.gamma == other.gamma
    }
}

impl PixelFilter for Gamma {
    fn is_neutral(&self) -> bool {
        self.gamma == [1.0, 1.0, 1.0]
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let lut = self.lut();
        for px in state.buffer.data.chunks_exact_mut(4) {
            px[0] = lut[0][px[0] as usize];
            px[1] = lut[1][px[1] as usize];
            px[2] = lut[2][px[2] as usize];
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: GAMMA_FRAGMENT,
            params: vec![
                1.0 / self.gamma[0],
                1.0 / self.gamma[1],
                1.0 / self.gamma[2],
                0.0,
            ],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Gamma".to_string()
    }
}

#[cfg(feature = "gpu")]
const GAMMA_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let rgb = pow(max(c.rgb, vec3<f32>(0.0)), params[1].xyz);
  return vec4<f32>(rgb, c.a);
}
"#;
