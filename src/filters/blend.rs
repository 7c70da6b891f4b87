//! Blend filters: mixing a flat color or a second image into the working
//! surface. CPU and GPU share one per-channel algebra; the final value is
//! `lerp(source, blended, alpha)`.

use crate::{
    PixelBuffer, PixfxResult,
    backend::{CpuState, ScratchKey},
    buffer::parse_hex_color,
    filters::PixelFilter,
    filters::clamp_u8,
};

#[cfg(feature = "gpu")]
use crate::backend::{GpuState, PassSpec, Sampling};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Multiply,
    Screen,
    Add,
    Difference,
    Subtract,
    Darken,
    Lighten,
    Overlay,
    Exclusion,
    Tint,
    /// Image blending only: the second source's red channel becomes an
    /// alpha matte. Falls back to the identity for color blending.
    Mask,
}

impl BlendMode {
    fn name(self) -> &'static str {
        match self {
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Add => "add",
            BlendMode::Difference => "difference",
            BlendMode::Subtract => "subtract",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Overlay => "overlay",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Tint => "tint",
            BlendMode::Mask => "mask",
        }
    }
}

/// Per-channel blend algebra over [0, 255]. The GPU shaders implement the
/// same formulas over [0, 1]; keep both sides in lockstep.
fn blend_channel(mode: BlendMode, s: f32, t: f32) -> f32 {
    match mode {
        BlendMode::Multiply => s * t / 255.0,
        BlendMode::Screen => 255.0 - (255.0 - s) * (255.0 - t) / 255.0,
        BlendMode::Add => s + t,
        BlendMode::Difference => (s - t).abs(),
        BlendMode::Subtract => s - t,
        BlendMode::Darken => s.min(t),
        BlendMode::Lighten => s.max(t),
        BlendMode::Overlay => {
            if t < 128.0 {
                2.0 * s * t / 255.0
            } else {
                255.0 - 2.0 * (255.0 - s) * (255.0 - t) / 255.0
            }
        }
        BlendMode::Exclusion => s + t - 2.0 * s * t / 255.0,
        BlendMode::Tint => t,
        BlendMode::Mask => s,
    }
}

#[cfg(feature = "gpu")]
fn blend_expr(mode: BlendMode) -> &'static str {
    match mode {
        BlendMode::Multiply => "c.rgb * t",
        BlendMode::Screen => "vec3<f32>(1.0) - (vec3<f32>(1.0) - c.rgb) * (vec3<f32>(1.0) - t)",
        BlendMode::Add => "c.rgb + t",
        BlendMode::Difference => "abs(c.rgb - t)",
        BlendMode::Subtract => "c.rgb - t",
        BlendMode::Darken => "min(c.rgb, t)",
        BlendMode::Lighten => "max(c.rgb, t)",
        BlendMode::Overlay => {
            "select(vec3<f32>(1.0) - 2.0 * (vec3<f32>(1.0) - c.rgb) * (vec3<f32>(1.0) - t), \
             2.0 * c.rgb * t, t < vec3<f32>(0.5))"
        }
        BlendMode::Exclusion => "c.rgb + t - 2.0 * c.rgb * t",
        BlendMode::Tint => "t",
        BlendMode::Mask => "c.rgb",
    }
}

fn default_alpha() -> f32 {
    1.0
}

fn default_blend_color() -> String {
    "#FFFFFF".to_string()
}

/// Blends a flat color into the image. Alpha is preserved: only the color
/// channels participate.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlendColor {
    #[serde(default = "default_blend_color")]
    pub color: String,
    #[serde(default)]
    pub mode: BlendMode,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

impl Default for BlendColor {
    fn default() -> Self {
        Self {
            color: default_blend_color(),
            mode: BlendMode::default(),
            alpha: default_alpha(),
        }
    }
}

impl PixelFilter for BlendColor {
    fn is_neutral(&self) -> bool {
        self.alpha == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let tint = parse_hex_color(&self.color)?;
        let alpha = self.alpha.clamp(0.0, 1.0);
        for px in state.buffer.data.chunks_exact_mut(4) {
            for c in 0..3 {
                let s = px[c] as f32;
                let blended = blend_channel(self.mode, s, tint[c] as f32);
                px[c] = clamp_u8(s + (blended - s) * alpha);
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        let tint = parse_hex_color(&self.color)?;
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: &blend_color_fragment(self.mode),
            params: vec![
                tint[0] as f32 / 255.0,
                tint[1] as f32 / 255.0,
                tint[2] as f32 / 255.0,
                self.alpha.clamp(0.0, 1.0),
            ],
            data: None,
            aux: None,
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        // The mode picks the formula baked into the shader source.
        format!("BlendColor_{}", self.mode.name())
    }
}

#[cfg(feature = "gpu")]
fn blend_color_fragment(mode: BlendMode) -> String {
    format!(
        r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {{
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let t = params[1].xyz;
  let alpha = params[1].w;
  let blended = clamp({expr}, vec3<f32>(0.0), vec3<f32>(1.0));
  return vec4<f32>(mix(c.rgb, blended, alpha), c.a);
}}
"#,
        expr = blend_expr(mode)
    )
}

/// Blends a second image into the working surface. The image is scaled to
/// cover the surface with nearest sampling; `mask` turns its red channel
/// into an alpha matte instead of touching the color channels.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlendImage {
    pub image: PixelBuffer,
    #[serde(default)]
    pub mode: BlendMode,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

impl PixelFilter for BlendImage {
    fn is_neutral(&self) -> bool {
        self.alpha == 0.0
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        let (w, h) = (state.buffer.width, state.buffer.height);
        let (iw, ih) = (self.image.width, self.image.height);
        if iw == 0 || ih == 0 {
            return Ok(());
        }
        let len = state.buffer.data.len();
        let alpha = self.alpha.clamp(0.0, 1.0);

        // Nearest-scale the secondary image to cover the surface once per
        // invocation; live previews reuse the allocation.
        let mut scaled = state.take_scratch(ScratchKey::BlendImageScaled, len);
        for y in 0..h {
            let sy = (y as u64 * ih as u64 / h as u64).min(ih as u64 - 1) as u32;
            for x in 0..w {
                let sx = (x as u64 * iw as u64 / w as u64).min(iw as u64 - 1) as u32;
                let src = self.image.pixel(sx, sy);
                let i = ((y * w + x) as usize) * 4;
                scaled[i..i + 4].copy_from_slice(&src);
            }
        }

        for (px, img) in state
            .buffer
            .data
            .chunks_exact_mut(4)
            .zip(scaled[..len].chunks_exact(4))
        {
            if self.mode == BlendMode::Mask {
                let s = px[3] as f32;
                let matte = s * img[0] as f32 / 255.0;
                px[3] = clamp_u8(s + (matte - s) * alpha);
            } else {
                for c in 0..3 {
                    let s = px[c] as f32;
                    let blended = blend_channel(self.mode, s, img[c] as f32);
                    px[c] = clamp_u8(s + (blended - s) * alpha);
                }
            }
        }

        state.put_scratch(ScratchKey::BlendImageScaled, scaled);
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        state.run_pass(PassSpec {
            cache_key: self.cache_key(),
            fragment: &blend_image_fragment(self.mode),
            params: vec![self.alpha.clamp(0.0, 1.0), 0.0, 0.0, 0.0],
            data: None,
            aux: Some(&self.image),
            sampling: Sampling::Nearest,
            output_size: (state.source_width, state.source_height),
        })
    }

    fn cache_key(&self) -> String {
        format!("BlendImage_{}", self.mode.name())
    }
}

#[cfg(feature = "gpu")]
fn blend_image_fragment(mode: BlendMode) -> String {
    let body = if mode == BlendMode::Mask {
        "let matte = c.a * i.r;\n  return vec4<f32>(c.rgb, mix(c.a, matte, alpha));".to_string()
    } else {
        format!(
            "let t = i.rgb;\n  let blended = clamp({expr}, vec3<f32>(0.0), vec3<f32>(1.0));\n  \
             return vec4<f32>(mix(c.rgb, blended, alpha), c.a);",
            expr = blend_expr(mode)
        )
    };
    format!(
        r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: array<vec4<f32>, 2>;
@group(0) @binding(4) var t_aux: texture_2d<f32>;

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {{
  let uv = pos.xy / params[0].xy;
  let c = textureSample(t_src, s_src, uv);
  let i = textureSample(t_aux, s_src, uv);
  let alpha = params[1].x;
  {body}
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
    fn multiply_by_black_blacks_out_and_preserves_alpha() {
        let src = PixelBuffer::solid(3, 3, [87, 201, 44, 180]).unwrap();
        let out = run(
            Filter::BlendColor(BlendColor {
                color: "#000000".to_string(),
                mode: BlendMode::Multiply,
                alpha: 1.0,
            }),
            &src,
        );
        assert_eq!(out.pixel(1, 1), [0, 0, 0, 180]);
    }

    #[test]
    fn screen_with_white_whites_out() {
        let src = PixelBuffer::solid(1, 1, [87, 201, 44, 255]).unwrap();
        let out = run(
            Filter::BlendColor(BlendColor {
                color: "#FFFFFF".to_string(),
                mode: BlendMode::Screen,
                alpha: 1.0,
            }),
            &src,
        );
        assert_eq!(out.pixel(0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn alpha_halves_the_effect() {
        let src = PixelBuffer::solid(1, 1, [200, 200, 200, 255]).unwrap();
        let out = run(
            Filter::BlendColor(BlendColor {
                color: "#000000".to_string(),
                mode: BlendMode::Tint,
                alpha: 0.5,
            }),
            &src,
        );
        assert_eq!(out.pixel(0, 0), [100, 100, 100, 255]);
    }

    #[test]
    fn difference_and_exclusion_match_on_extremes() {
        let src = PixelBuffer::solid(1, 1, [255, 0, 128, 255]).unwrap();
        let diff = run(
            Filter::BlendColor(BlendColor {
                color: "#FFFFFF".to_string(),
                mode: BlendMode::Difference,
                alpha: 1.0,
            }),
            &src,
        );
        assert_eq!(diff.pixel(0, 0), [0, 255, 127, 255]);
    }

    #[test]
    fn alpha_zero_is_neutral() {
        let f = BlendColor {
            color: "#123456".to_string(),
            mode: BlendMode::Add,
            alpha: 0.0,
        };
        assert!(f.is_neutral());
    }

    #[test]
    fn blend_image_multiply_scales_to_cover() {
        // 1x1 mid-gray image multiplied over a 2x2 white surface.
        let src = PixelBuffer::solid(2, 2, [255, 255, 255, 255]).unwrap();
        let overlay = PixelBuffer::solid(1, 1, [128, 128, 128, 255]).unwrap();
        let out = run(
            Filter::BlendImage(BlendImage {
                image: overlay,
                mode: BlendMode::Multiply,
                alpha: 1.0,
            }),
            &src,
        );
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(out.pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn blend_image_mask_uses_red_as_matte() {
        let src = PixelBuffer::solid(2, 1, [50, 60, 70, 255]).unwrap();
        let mut matte = PixelBuffer::new(2, 1).unwrap();
        matte.set_pixel(0, 0, [255, 0, 0, 255]);
        matte.set_pixel(1, 0, [0, 0, 0, 255]);
        let out = run(
            Filter::BlendImage(BlendImage {
                image: matte,
                mode: BlendMode::Mask,
                alpha: 1.0,
            }),
            &src,
        );
        assert_eq!(out.pixel(0, 0), [50, 60, 70, 255]);
        assert_eq!(out.pixel(1, 0)[3], 0);
    }
}
