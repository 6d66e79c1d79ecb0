use std::fs;
use std::ops::AddAssign;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::mem::arbiter::ArbiterStats;
use crate::mem::dma::DmaStats;
use crate::mem::mesh::MeshStats;
use crate::mem::tile::{TileState, TileStats};
use crate::mem::types::GridCoord;
use crate::sim::core::CoreStats;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Serialize)]
pub struct CoreSummary {
    pub core_id: usize,
    pub coord: GridCoord,
    pub lsu: CoreStats,
    pub arbiter: ArbiterStats,
    pub tiles: TileStats,
    pub tile_states: Vec<TileState>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateSummary {
    pub num_cores: usize,
    pub issued: u64,
    pub retired_ops: u64,
    pub retries: u64,
    pub warp_stall_cycles: u64,
    pub grants: u64,
    pub conflicts: u64,
    pub gated: u64,
    pub max_wait: u64,
    pub tile_transitions: u64,
    pub fences_completed: u64,
}

impl AddAssign<&CoreSummary> for AggregateSummary {
    fn add_assign(&mut self, core: &CoreSummary) {
        self.num_cores += 1;
        self.issued = self.issued.saturating_add(core.lsu.issued);
        self.retired_ops = self.retired_ops.saturating_add(core.lsu.retired_ops);
        self.retries = self.retries.saturating_add(core.lsu.retries);
        self.warp_stall_cycles = self
            .warp_stall_cycles
            .saturating_add(core.lsu.warp_stall_cycles);
        self.grants = self.grants.saturating_add(core.arbiter.grants);
        self.conflicts = self.conflicts.saturating_add(core.arbiter.conflicts);
        self.gated = self.gated.saturating_add(core.arbiter.gated);
        self.max_wait = self.max_wait.max(core.arbiter.max_wait);
        self.tile_transitions = self.tile_transitions.saturating_add(core.tiles.transitions);
        self.fences_completed = self
            .fences_completed
            .saturating_add(core.tiles.fences_completed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cycles: Cycle,
    pub total_threads: usize,
    pub total: AggregateSummary,
    pub mesh: MeshStats,
    pub dma: DmaStats,
    pub per_core: Vec<CoreSummary>,
}

pub fn aggregate_summaries(per_core: &[CoreSummary]) -> AggregateSummary {
    let mut total = AggregateSummary::default();
    for core in per_core {
        total += core;
    }
    total
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let payload = serde_json::to_string_pretty(summary)?;
    fs::write(path, payload).with_context(|| format!("cannot write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(id: usize, conflicts: u64, max_wait: u64) -> CoreSummary {
        CoreSummary {
            core_id: id,
            coord: GridCoord::new(0, id),
            lsu: CoreStats {
                retired_ops: 10,
                ..CoreStats::default()
            },
            arbiter: ArbiterStats {
                conflicts,
                max_wait,
                ..ArbiterStats::default()
            },
            tiles: TileStats::default(),
            tile_states: vec![TileState::Idle],
        }
    }

    #[test]
    fn aggregate_sums_counters_and_keeps_worst_wait() {
        let total = aggregate_summaries(&[core(0, 3, 2), core(1, 4, 7)]);
        assert_eq!(2, total.num_cores);
        assert_eq!(20, total.retired_ops);
        assert_eq!(7, total.conflicts);
        assert_eq!(7, total.max_wait);
    }

    #[test]
    fn summary_serializes_to_json() {
        let per_core = vec![core(0, 1, 1)];
        let summary = RunSummary {
            cycles: 42,
            total_threads: 4,
            total: aggregate_summaries(&per_core),
            mesh: MeshStats::default(),
            dma: DmaStats::default(),
            per_core,
        };
        let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
        assert_eq!(42, json["cycles"]);
        assert_eq!("Idle", json["per_core"][0]["tile_states"][0]);
        assert_eq!(0, json["per_core"][0]["coord"]["row"]);
    }
}
