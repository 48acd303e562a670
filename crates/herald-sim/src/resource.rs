//! Per-node bookkeeping of memory outcomes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SimResult;
use crate::event::Env;
use crate::memory::Memory;

/// What the resource layer knows about a memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryInfo {
    #[default]
    Raw,
    Entangled,
}

/// Receives attempt outcomes from the generation protocol.
///
/// A RAW update releases the memory (reset) and counts one failed attempt;
/// the runner reads `raw_counter` as the number of attempts a trial needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManager {
    raw_counter: u64,
    entangled_counter: u64,
    state: MemoryInfo,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_counter(&self) -> u64 {
        self.raw_counter
    }

    pub fn entangled_counter(&self) -> u64 {
        self.entangled_counter
    }

    pub fn state(&self) -> MemoryInfo {
        self.state
    }

    /// Clear the per-trial counters.
    pub fn reset_counters(&mut self) {
        self.raw_counter = 0;
        self.state = MemoryInfo::Raw;
    }

    /// Apply an outcome to `memory`.
    pub fn update(&mut self, memory: &mut Memory, info: MemoryInfo, env: &mut Env<'_>) -> SimResult<()> {
        match info {
            MemoryInfo::Raw => {
                memory.reset(env)?;
                self.raw_counter += 1;
            }
            MemoryInfo::Entangled => self.entangled_counter += 1,
        }
        debug!(memory = %memory.name(), ?info, raw = self.raw_counter, "resource update");
        self.state = info;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingKind;
    use crate::event::NodeId;
    use crate::memory::{EntangledMemory, MemoryParams};
    use crate::metrics::NullMetrics;
    use herald_kernel::{QuantumManager, Timeline};

    #[test]
    fn test_raw_resets_memory_and_counts() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = NullMetrics;
        let mut memory = Memory::new(
            "node1.memo",
            NodeId(0),
            MemoryParams::default(),
            EncodingKind::TimeBin.profile().encoding,
            &mut qm,
        );
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        let mut rm = ResourceManager::new();

        memory.mark_entangled(
            EntangledMemory { node: "node2".into(), memory: "node2.memo".into() },
            &mut env,
        );
        rm.update(&mut memory, MemoryInfo::Entangled, &mut env).unwrap();
        assert_eq!(rm.state(), MemoryInfo::Entangled);
        assert!(memory.entangled_memory().is_some());

        rm.update(&mut memory, MemoryInfo::Raw, &mut env).unwrap();
        rm.update(&mut memory, MemoryInfo::Raw, &mut env).unwrap();
        assert_eq!(rm.raw_counter(), 2);
        assert!(memory.entangled_memory().is_none());

        rm.reset_counters();
        assert_eq!(rm.raw_counter(), 0);
        assert_eq!(rm.entangled_counter(), 1);
    }
}
