//! A filter that owns an ordered list of sub-filters and applies them as
//! one unit.

use crate::{PixfxResult, backend::CpuState, filters::Filter, filters::PixelFilter};

#[cfg(feature = "gpu")]
use crate::backend::GpuState;

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Composed {
    #[serde(default)]
    pub sub_filters: Vec<Filter>,
}

impl Composed {
    pub fn new(sub_filters: Vec<Filter>) -> Self {
        Self { sub_filters }
    }
}

impl PixelFilter for Composed {
    /// Neutral only when every child is.
    fn is_neutral(&self) -> bool {
        self.sub_filters.iter().all(Filter::is_neutral)
    }

    fn apply_to_cpu(&self, state: &mut CpuState<'_>) -> PixfxResult<()> {
        for filter in &self.sub_filters {
            if !filter.is_neutral() {
                filter.apply_to_cpu(state)?;
            }
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn apply_to_gpu(&self, state: &mut GpuState<'_>) -> PixfxResult<()> {
        let live: Vec<&Filter> = self.sub_filters.iter().filter(|f| !f.is_neutral()).collect();
        // The chain counted this filter as one pass; grow the shared
        // countdown to cover every live child before any of them runs.
        match live.len() as u32 {
            0 => {
                state.passes = state.passes.saturating_sub(1);
                return Ok(());
            }
            n => state.passes += n - 1,
        }
        for filter in live {
            filter.apply_to_gpu(state)?;
        }
        Ok(())
    }

    fn cache_key(&self) -> String {
        // Children key their own programs; the composite has none.
        "Composed".to_string()
    }
}
