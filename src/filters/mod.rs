//! The filter vocabulary: one pixel operation per type, a closed enum as
//! the serialization registry, and the dispatch that routes a chain onto
//! whichever pipeline state variant it was handed.

use crate::{PixfxError, PixfxResult, backend::CpuState, backend::PipelineState};

#[cfg(feature = "gpu")]
use crate::backend::GpuState;

mod blend;
mod blur;
mod color_matrix;
mod color_ops;
mod composed;
mod convolute;
mod pixelate;
mod resize;

pub use blend::{BlendColor, BlendImage, BlendMode};
pub use blur::Blur;
pub use color_matrix::{ColorMatrix, Gamma, HueRotation};
pub use color_ops::{
    Brightness, Contrast, Grayscale, GrayscaleMode, Invert, Noise, Saturation, Vibrance,
};
pub use composed::Composed;
pub use convolute::Convolute;
pub use pixelate::{Pixelate, RemoveColor};
pub use resize::{Resize, ResizeType};

/// The per-filter contract. `apply_to_cpu` defaults to the identity
/// filter; every filter must say how it runs on the GPU and what shader
/// program it keys.
pub(crate) trait PixelFilter {
    /// True when current parameters make the filter a no-op. Backends
    /// prune neutral filters before computing the pass count.
    fn is_neutral(&self) -> bool {
        false
    }

    fn apply_to_cpu(&self, _state: &mut CpuState<'_>) -> PixfxResult<()> {
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()>;

    /// Shader program discriminator. Must fold in any parameter that
    /// shapes the generated shader source (kernel side, tap window,
    /// blend mode), or two filters of the same type would reuse each
    /// other's compiled program.
    fn cache_key(&self) -> String;
}

/// Every concrete filter, closed over at this module boundary. The serde
/// `type` tag is the wire discriminant: `{"type": "Brightness", ...}`,
/// with `Composed` nesting `{"type": "Composed", "sub_filters": [...]}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Filter {
    Brightness(Brightness),
    Contrast(Contrast),
    Saturation(Saturation),
    Vibrance(Vibrance),
    HueRotation(HueRotation),
    ColorMatrix(ColorMatrix),
    Gamma(Gamma),
    Invert(Invert),
    Grayscale(Grayscale),
    Noise(Noise),
    Pixelate(Pixelate),
    Blur(Blur),
    Convolute(Convolute),
    RemoveColor(RemoveColor),
    BlendColor(BlendColor),
    BlendImage(BlendImage),
    Resize(Resize),
    Composed(Composed),
}

macro_rules! dispatch {
    ($value:expr, $f:ident => $body:expr) => {
        match $value {
            Filter::Brightness($f) => $body,
            Filter::Contrast($f) => $body,
            Filter::Saturation($f) => $body,
            Filter::Vibrance($f) => $body,
            Filter::HueRotation($f) => $body,
            Filter::ColorMatrix($f) => $body,
            Filter::Gamma($f) => $body,
            Filter::Invert($f) => $body,
            Filter::Grayscale($f) => $body,
            Filter::Noise($f) => $body,
            Filter::Pixelate($f) => $body,
            Filter::Blur($f) => $body,
            Filter::Convolute($f) => $body,
            Filter::RemoveColor($f) => $body,
            Filter::BlendColor($f) => $body,
            Filter::BlendImage($f) => $body,
            Filter::Resize($f) => $body,
            Filter::Composed($f) => $body,
        }
    };
}

impl Filter {
    /// Dispatch on the pipeline state variant. The match is exhaustive:
    /// adding a backend forces every filter to say what it does there.
    pub fn apply_to(&self, state: &mut PipelineState<'_>) -> PixfxResult<()> {
        match state {
            PipelineState::Cpu(s) => self.apply_to_cpu(s),
            #[cfg(feature = "gpu")]
            PipelineState::Gpu(s) => self.apply_to_gpu(s),
        }
    }

    pub(crate) fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        dispatch!(self, f => f.apply_to_cpu(state))
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        dispatch!(self, f => f.apply_to_gpu(state))
    }

    pub fn is_neutral(&self) -> bool {
        dispatch!(self, f => f.is_neutral())
    }

    pub fn cache_key(&self) -> String {
        dispatch!(self, f => f.cache_key())
    }

    /// Serialize to the `{type, ...declared-parameter-fields}` object form.
    pub fn to_object(&self) -> PixfxResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| PixfxError::serde(e.to_string()))
    }

    /// Reconstruct a filter from its object form, dispatching on `type`.
    pub fn from_object(value: serde_json::Value) -> PixfxResult<Filter> {
        serde_json::from_value(value).map_err(|e| PixfxError::serde(e.to_string()))
    }
}

/// Drop neutral filters before execution. Pass counts are computed from
/// the pruned list, so this is a performance contract, not cosmetics.
pub fn active(filters: &[Filter]) -> Vec<&Filter> {
    filters.iter().filter(|f| !f.is_neutral()).collect()
}

pub(crate) fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_drops_neutral_filters() {
        let chain = vec![
            Filter::Brightness(Brightness { brightness: 0.0 }),
            Filter::Brightness(Brightness { brightness: 0.2 }),
            Filter::Blur(Blur { blur: 0.0 }),
        ];
        let live = active(&chain);
        assert_eq!(live.len(), 1);
        assert!(matches!(live[0], Filter::Brightness(b) if b.brightness == 0.2));
    }

    #[test]
    fn object_form_carries_type_tag() {
        let f = Filter::Brightness(Brightness { brightness: 0.25 });
        let obj = f.to_object().unwrap();
        assert_eq!(obj["type"], "Brightness");
        assert_eq!(Filter::from_object(obj).unwrap(), f);
    }

    #[test]
    fn from_object_rejects_unknown_type() {
        let obj = serde_json::json!({ "type": "Sharpen" });
        assert!(Filter::from_object(obj).is_err());
    }

    #[test]
    fn clamp_u8_saturates() {
        assert_eq!(clamp_u8(-4.0), 0);
        assert_eq!(clamp_u8(300.0), 255);
        assert_eq!(clamp_u8(127.5), 128);
    }
}
