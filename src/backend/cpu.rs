use std::collections::HashMap;

use crate::{
    PixelBuffer, PixfxResult,
    backend::PipelineState,
    filters::{self, Filter},
};

/// Purpose-partitioned keys for reusable helper surfaces. Each filter owns
/// its key; entries are created lazily, grown when outgrown and never
/// cleared automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScratchKey {
    BlurTemp,
    BlendImageScaled,
    ResizeSlice,
}

/// Per-invocation context for the CPU path: the working buffer every filter
/// mutates in place (or replaces wholesale, for non-separable transforms),
/// plus the backend's scratch map.
pub struct CpuState<'a> {
    pub buffer: PixelBuffer,
    resources: &'a mut HashMap<ScratchKey, Vec<u8>>,
}

impl CpuState<'_> {
    /// Borrow the scratch buffer for `key` out of the map, grown to at
    /// least `min_len`. Pair with [`CpuState::put_scratch`] so the
    /// allocation survives into the next invocation.
    pub fn take_scratch(&mut self, key: ScratchKey, min_len: usize) -> Vec<u8> {
        let mut buf = self.resources.remove(&key).unwrap_or_default();
        if buf.len() < min_len {
            buf.resize(min_len, 0);
        }
        buf
    }

    pub fn put_scratch(&mut self, key: ScratchKey, buf: Vec<u8>) {
        self.resources.insert(key, buf);
    }
}

/// Fallback backend: runs a filter chain sequentially over a byte buffer
/// with no GPU state at all.
pub struct CpuFilterBackend {
    resources: HashMap<ScratchKey, Vec<u8>>,
}

impl CpuFilterBackend {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    /// Draw `source` into a working buffer, run each filter over that same
    /// buffer reference, and write the result to `target`. `target` takes
    /// the chain's final dimensions, which may differ from the source's.
    pub fn apply_filters(
        &mut self,
        filters: &[Filter],
        source: &PixelBuffer,
        target: &mut PixelBuffer,
    ) -> PixfxResult<()> {
        let active = filters::active(filters);
        if active.is_empty() {
            *target = source.clone();
            return Ok(());
        }

        let mut state = PipelineState::Cpu(CpuState {
            buffer: source.clone(),
            resources: &mut self.resources,
        });
        for filter in &active {
            filter.apply_to(&mut state)?;
        }

        #[allow(irrefutable_let_patterns)]
        if let PipelineState::Cpu(state) = state {
            *target = state.buffer;
        }
        Ok(())
    }
}

impl Default for CpuFilterBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Brightness, Filter};

    #[test]
    fn empty_chain_copies_source() {
        let mut backend = CpuFilterBackend::new();
        let src = PixelBuffer::solid(4, 4, [10, 20, 30, 255]).unwrap();
        let mut dst = PixelBuffer::new(1, 1).unwrap();
        backend.apply_filters(&[], &src, &mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn neutral_filters_are_pruned() {
        let mut backend = CpuFilterBackend::new();
        let src = PixelBuffer::solid(2, 2, [100, 100, 100, 255]).unwrap();
        let mut dst = PixelBuffer::new(1, 1).unwrap();
        let chain = vec![Filter::Brightness(Brightness { brightness: 0.0 })];
        backend.apply_filters(&chain, &src, &mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn scratch_is_grown_and_retained() {
        let mut backend = CpuFilterBackend::new();
        let mut state = CpuState {
            buffer: PixelBuffer::new(1, 1).unwrap(),
            resources: &mut backend.resources,
        };
        let buf = state.take_scratch(ScratchKey::BlurTemp, 64);
        assert_eq!(buf.len(), 64);
        state.put_scratch(ScratchKey::BlurTemp, buf);

        let buf = state.take_scratch(ScratchKey::BlurTemp, 16);
        assert_eq!(buf.len(), 64);
        state.put_scratch(ScratchKey::BlurTemp, buf);
    }
}
