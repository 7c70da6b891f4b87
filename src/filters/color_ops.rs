//! Per-pixel color adjustments with no neighborhood reads.

use crate::{PixfxResult, backend::CpuState, filters::PixelFilter, filters::clamp_u8};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

/// Additive brightness, `brightness` in [-1, 1] mapping to ±255 per channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Brightness {
    #[serde(default)]
    pub brightness: f32,
}

impl PixelFilter for Brightness {
    fn is_neutral(&self) -> bool {
        self.brightness == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let delta = self.brightness * 255.0;
        for px in state.buffer.data.chunks_exact_mut(4) {
            for c in 0..3 {
                px[c] = clamp_u8(px[c] as f32 + delta);
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: BRIGHTNESS_FRAGMENT,
            params: vec![self.brightness, 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Brightness".to_string()
    }
}

#[cfg(feature = "gpu")]
const BRIGHTNESS_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let rgb = clamp(c.rgb + vec3<f32>(params[1].x), vec3<f32>(0.0), vec3<f32>(1.0));
  return vec4<f32>(rgb, c.a);
}
"#;

/// Contrast curve around mid-gray, `contrast` in [-1, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Contrast {
    #[serde(default)]
    pub contrast: f32,
}

impl Contrast {
    fn factor(&self) -> f32 {
        let c = self.contrast * 255.0;
        (259.0 * (c + 255.0)) / (255.0 * (259.0 - c))
    }
}

impl PixelFilter for Contrast {
    fn is_neutral(&self) -> bool {
        self.contrast == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let f = self.factor();
        for px in state.buffer.data.chunks_exact_mut(4) {
            for c in 0..3 {
                px[c] = clamp_u8(f * (px[c] as f32 - 128.0) + 128.0);
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: CONTRAST_FRAGMENT,
            params: vec![self.factor(), 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Contrast".to_string()
    }
}

#[cfg(feature = "gpu")]
const CONTRAST_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let rgb = clamp((c.rgb - vec3<f32>(0.5)) * params[1].x + vec3<f32>(0.5),
                  vec3<f32>(0.0), vec3<f32>(1.0));
  return vec4<f32>(rgb, c.a);
}
"#;

/// Pushes non-dominant channels away from (positive) or toward (negative)
/// the dominant one.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Saturation {
    #[serde(default)]
    pub saturation: f32,
}

impl PixelFilter for Saturation {
    fn is_neutral(&self) -> bool {
        self.saturation == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let adjust = -self.saturation;
        for px in state.buffer.data.chunks_exact_mut(4) {
            let max = px[0].max(px[1]).max(px[2]) as f32;
            for c in 0..3 {
                px[c] = clamp_u8(px[c] as f32 + (max - px[c] as f32) * adjust);
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: SATURATION_FRAGMENT,
            params: vec![-self.saturation, 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Saturation".to_string()
    }
}

#[cfg(feature = "gpu")]
const SATURATION_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let mx = max(c.r, max(c.g, c.b));
  let rgb = clamp(c.rgb + (vec3<f32>(mx) - c.rgb) * params[1].x,
                  vec3<f32>(0.0), vec3<f32>(1.0));
  return vec4<f32>(rgb, c.a);
}
"#;

/// Like saturation, but scaled by how far the pixel already is from gray,
/// so muted colors move more than saturated ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Vibrance {
    #[serde(default)]
    pub vibrance: f32,
}

impl PixelFilter for Vibrance {
    fn is_neutral(&self) -> bool {
        self.vibrance == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let adjust = -self.vibrance;
        for px in state.buffer.data.chunks_exact_mut(4) {
            let max = px[0].max(px[1]).max(px[2]) as f32;
            let avg = (px[0] as f32 + px[1] as f32 + px[2] as f32) / 3.0;
            let amt = (max - avg).abs() * 2.0 / 255.0 * adjust;
            for c in 0..3 {
                px[c] = clamp_u8(px[c] as f32 + (max - px[c] as f32) * amt);
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: VIBRANCE_FRAGMENT,
            params: vec![-self.vibrance, 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Vibrance".to_string()
    }
}

#[cfg(feature = "gpu")]
const VIBRANCE_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let mx = max(c.r, max(c.g, c.b));
  let avg = (c.r + c.g + c.b) / 3.0;
  let amt = abs(mx - avg) * 2.0 * params[1].x;
  let rgb = clamp(c.rgb + (vec3<f32>(mx) - c.rgb) * amt,
                  vec3<f32>(0.0), vec3<f32>(1.0));
  return vec4<f32>(rgb, c.a);
}
"#;

fn default_true() -> bool {
    true
}

/// Channel inversion. `alpha` extends the inversion to the alpha channel.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Invert {
    #[serde(default = "default_true")]
    pub invert: bool,
    #[serde(default)]
    pub alpha: bool,
}

impl Default for Invert {
    fn default() -> Self {
        Self {
            invert: true,
            alpha: false,
        }
    }
}

impl PixelFilter for Invert {
    fn is_neutral(&self) -> bool {
        !self.invert
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        if !self.invert {
            return Ok(());
        }
        for px in state.buffer.data.chunks_exact_mut(4) {
            px[0] = 255 - px[0];
            px[1] = 255 - px[1];
            px[2] = 255 - px[2];
            if self.alpha {
                px[3] = 255 - px[3];
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: INVERT_FRAGMENT,
            params: vec![if self.alpha { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Invert".to_string()
    }
}

#[cfg(feature = "gpu")]
const INVERT_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  var a = c.a;
  if (params[1].x > 0.5) { a = 1.0 - a; }
  return vec4<f32>(vec3<f32>(1.0) - c.rgb, a);
}
"#;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrayscaleMode {
    #[default]
    Average,
    Lightness,
    Luminosity,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Grayscale {
    #[serde(default)]
    pub mode: GrayscaleMode,
}

impl PixelFilter for Grayscale {
    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        for px in state.buffer.data.chunks_exact_mut(4) {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            let v = match self.mode {
                GrayscaleMode::Average => (r + g + b) / 3.0,
                GrayscaleMode::Lightness => {
                    (r.max(g).max(b) + r.min(g).min(b)) / 2.0
                }
                GrayscaleMode::Luminosity => 0.21 * r + 0.72 * g + 0.07 * b,
            };
            let v = clamp_u8(v);
            px[0] = v;
            px[1] = v;
            px[2] = v;
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        let mode = match self.mode {
            GrayscaleMode::Average => 0.0,
            GrayscaleMode::Lightness => 1.0,
            GrayscaleMode::Luminosity => 2.0,
        };
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: GRAYSCALE_FRAGMENT,
            params: vec![mode, 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Grayscale".to_string()
    }
}

#[cfg(feature = "gpu")]
const GRAYSCALE_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  var v = (c.r + c.g + c.b) / 3.0;
  if (params[1].x == 1.0) {
    v = (max(c.r, max(c.g, c.b)) + min(c.r, min(c.g, c.b))) / 2.0;
  } else if (params[1].x == 2.0) {
    v = 0.21 * c.r + 0.72 * c.g + 0.07 * c.b;
  }
  return vec4<f32>(vec3<f32>(v), c.a);
}
"#;

/// Seeded uniform noise; one offset shared by r, g and b per pixel so the
/// grain stays achromatic. `noise` is the amplitude in [0, 255].
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Noise {
    #[serde(default)]
    pub noise: f32,
    #[serde(default)]
    pub seed: u64,
}

impl PixelFilter for Noise {
    fn is_neutral(&self) -> bool {
        self.noise == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let mut rng = self.seed.wrapping_mul(2) | 1;
        for px in state.buffer.data.chunks_exact_mut(4) {
            let offset = (next_unit(&mut rng) - 0.5) * self.noise;
            for c in 0..3 {
                px[c] = clamp_u8(px[c] as f32 + offset);
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: NOISE_FRAGMENT,
            params: vec![
                self.noise / 255.0,
                (self.seed % 1024) as f32,
                0.0,
                0.0,
            ],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Noise".to_string()
    }
}

fn next_unit(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 33) as u32 as f32) / (u32::MAX >> 1) as f32
}

#[cfg(feature = "gpu")]
const NOISE_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let h = fract(sin(dot(pos.xy + vec2<f32>(params[1].y), vec2<f32>(12.9898, 78.233))) * 43758.5453);
  let offset = (h - 0.5) * params[1].x;
  let rgb = clamp(c.rgb + vec3<f32>(offset), vec3<f32>(0.0), vec3<f32>(1.0));
  return vec4<f32>(rgb, c.a);
}
"#;
