//! Backend selection and the per-invocation pipeline state threaded
//! through every filter.

use std::sync::Mutex;

use crate::{PixelBuffer, PixfxResult, filters::Filter};

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

pub use cpu::{CpuFilterBackend, CpuState, ScratchKey};
#[cfg(feature = "gpu")]
pub use gpu::{GpuCaps, GpuFilterBackend, GpuState, PassSpec, Sampling, probe};

/// Transient per-invocation context. A tagged union rather than a
/// duck-typed capability check: every filter matches exhaustively.
pub enum PipelineState<'a> {
    Cpu(CpuState<'a>),
    #[cfg(feature = "gpu")]
    Gpu(GpuState<'a>),
}

/// The two interchangeable execution paths. Both must produce visually
/// equivalent output for the same chain.
pub enum FilterBackend {
    Cpu(CpuFilterBackend),
    #[cfg(feature = "gpu")]
    Gpu(GpuFilterBackend),
}

impl FilterBackend {
    /// Apply an ordered filter chain to `source`, writing the result (and
    /// its possibly changed dimensions) into `target`. `cache_key`, when
    /// given, lets the GPU path reuse the uploaded source texture across
    /// calls; the CPU path ignores it.
    pub fn apply_filters(
        &mut self,
        filters: &[Filter],
        source: &PixelBuffer,
        target: &mut PixelBuffer,
        cache_key: Option<&str>,
    ) -> PixfxResult<()> {
        match self {
            FilterBackend::Cpu(backend) => backend.apply_filters(filters, source, target),
            #[cfg(feature = "gpu")]
            FilterBackend::Gpu(backend) => {
                backend.apply_filters(filters, source, target, cache_key)
            }
        }
    }

    pub fn is_gpu(&self) -> bool {
        match self {
            FilterBackend::Cpu(_) => false,
            #[cfg(feature = "gpu")]
            FilterBackend::Gpu(_) => true,
        }
    }

    /// Drop backend-held caches. A no-op on the CPU path.
    pub fn clear_caches(&mut self) {
        match self {
            FilterBackend::Cpu(_) => {}
            #[cfg(feature = "gpu")]
            FilterBackend::Gpu(backend) => backend.clear_caches(),
        }
    }

    pub fn evict_caches_for_key(&mut self, key: &str) {
        match self {
            FilterBackend::Cpu(_) => {}
            #[cfg(feature = "gpu")]
            FilterBackend::Gpu(backend) => backend.evict_caches_for_key(key),
        }
    }
}

static ACTIVE: Mutex<Option<FilterBackend>> = Mutex::new(None);

/// Process-wide, lazily constructed backend singleton.
///
/// The first [`BackendSelector::with`] call probes GPU capability once and
/// constructs the GPU backend when supported (and the `gpu` feature is
/// enabled), else the CPU backend. Probing never fails loudly; missing GPU
/// support is a normal branch.
pub struct BackendSelector;

impl BackendSelector {
    /// Run `f` against the active backend, constructing it first if needed.
    pub fn with<R>(f: impl FnOnce(&mut FilterBackend) -> R) -> R {
        let mut guard = ACTIVE.lock().unwrap_or_else(|p| p.into_inner());
        let backend = guard.get_or_insert_with(Self::construct);
        f(backend)
    }

    /// Inject a backend (tests, forced fallback).
    pub fn set(backend: FilterBackend) {
        let mut guard = ACTIVE.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(backend);
    }

    /// Drop the active backend; the next `with` re-constructs it.
    pub fn reset() {
        let mut guard = ACTIVE.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    pub fn is_initialized() -> bool {
        let guard = ACTIVE.lock().unwrap_or_else(|p| p.into_inner());
        guard.is_some()
    }

    fn construct() -> FilterBackend {
        #[cfg(feature = "gpu")]
        if gpu::probe().is_some() {
            match GpuFilterBackend::new() {
                Ok(backend) => {
                    tracing::debug!("filter backend: gpu");
                    return FilterBackend::Gpu(backend);
                }
                Err(err) => {
                    tracing::debug!(%err, "gpu backend construction failed, falling back");
                }
            }
        }
        tracing::debug!("filter backend: cpu");
        FilterBackend::Cpu(CpuFilterBackend::new())
    }
}

/// Apply a filter chain through the process-wide backend singleton.
pub fn apply_filters(
    filters: &[Filter],
    source: &PixelBuffer,
    target: &mut PixelBuffer,
    cache_key: Option<&str>,
) -> PixfxResult<()> {
    BackendSelector::with(|backend| backend.apply_filters(filters, source, target, cache_key))
}
