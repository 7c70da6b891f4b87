//! Stylize filters: block pixelation and chroma-key style color removal.

use crate::{
    PixfxResult, backend::CpuState, buffer::parse_hex_color, filters::PixelFilter,
};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

fn default_blocksize() -> u32 {
    4
}

/// Replaces every `blocksize`-sided block with its top-left pixel's color.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pixelate {
    #[serde(default = "default_blocksize")]
    pub blocksize: u32,
}

impl Default for Pixelate {
    fn default() -> Self {
        Self {
            blocksize: default_blocksize(),
        }
    }
}

impl PixelFilter for Pixelate {
    fn is_neutral(&self) -> bool {
        self.blocksize <= 1
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let (w, h) = (state.buffer.width, state.buffer.height);
        let block = self.blocksize.max(1);
        for by in (0..h).step_by(block as usize) {
            for bx in (0..w).step_by(block as usize) {
                let color = state.buffer.pixel(bx, by);
                for y in by..(by + block).min(h) {
                    for x in bx..(bx + block).min(w) {
                        state.buffer.set_pixel(x, y, color);
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: PIXELATE_FRAGMENT,
            params: vec![self.blocksize.max(1) as f32, 0.0, 0.0, 0.0],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "Pixelate".to_string()
    }
}

#[cfg(feature = "gpu")]
const PIXELATE_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let block = params[1].x;
  let corner = floor(floor(pos.xy) / block) * block + vec2<f32>(0.5);
  return textureSample(t_src, s_src, corner / params[0].xy);
}
"#;

fn default_color() -> String {
    "#FFFFFF".to_string()
}

fn default_distance() -> f32 {
    0.02
}

/// Knocks out pixels whose channels all sit within `distance` (a 0..1
/// fraction of 255) of the key color by zeroing their alpha.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RemoveColor {
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_distance")]
    pub distance: f32,
}

impl Default for RemoveColor {
    fn default() -> Self {
        Self {
            color: default_color(),
            distance: default_distance(),
        }
    }
}

impl PixelFilter for RemoveColor {
    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let key = parse_hex_color(&self.color)?;
        let dist = self.distance * 255.0;
        for px in state.buffer.data.chunks_exact_mut(4) {
            let hit = (0..3).all(|c| {
                let low = key[c] as f32 - dist;
                let high = key[c] as f32 + dist;
                let v = px[c] as f32;
                v > low && v < high
            });
            if hit {
                px[3] = 0;
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        let key = parse_hex_color(&self.color)?;
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: REMOVE_COLOR_FRAGMENT,
            params: vec![
                key[0] as f32 / 255.0,
                key[1] as f32 / 255.0,
                key[2] as f32 / 255.0,
                self.distance,
            ],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        "RemoveColor".to_string()
    }
}

#[cfg(feature = "gpu")]
const REMOVE_COLOR_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let uv = pos.xy / params[0].xy;
  var c = textureSample(t_src, s_src, uv);
  let key = params[1].xyz;
  let dist = params[1].w;
  let delta = abs(c.rgb - key);
  if (delta.x < dist && delta.y < dist && delta.z < dist) {
    c.a = 0.0;
  }
  return c;
}
"#;
