use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, ensure};
use log::{debug, info};

use crate::base::behavior::*;
use crate::mem::dma::{DmaDirection, DmaEngine, DmaTransfer};
use crate::mem::mesh::MeshFabric;
use crate::mem::slice::MemorySliceStore;
use crate::mem::tile::{TileCommand, TileState};
use crate::sim::config::{GridConfig, RunConfig};
use crate::sim::core::GridCore;
use crate::sim::summary::{aggregate_summaries, CoreSummary, RunSummary};
use crate::sim::trace::{TraceEvent, TraceSink};
use crate::timeq::Cycle;
use crate::traffic::patterns::PatternEngine;

/// The whole grid: one core per mesh coordinate, the mesh fabric of L2 slices, the
/// global store and the DMA engine staging tiles in and out of it.
pub struct GridTop {
    config: Arc<GridConfig>,
    pub cores: Vec<GridCore>,
    pub fabric: MeshFabric,
    pub global: MemorySliceStore,
    pub dma: DmaEngine,
    dma_backlog: VecDeque<DmaTransfer>,
    trace: Option<TraceSink>,
    total_threads: usize,
    timeout: Cycle,
    cycle: Cycle,
}

impl GridTop {
    pub fn new(run: &RunConfig) -> anyhow::Result<Self> {
        run.grid.validate()?;
        run.dma.validate()?;
        let config = Arc::new(run.grid);

        let tiles_end = run.dma.global_base
            + (config.num_cores() * config.tile.num_tiles) as u64 * config.tile.tile_words;
        ensure!(
            tiles_end <= config.mem.global_size,
            "tile staging area ends at {:#x}, past the global store of {:#x} words",
            tiles_end,
            config.mem.global_size
        );

        let engine = PatternEngine::new(&run.traffic, config.num_cores())?;
        let print_lines = run.traffic.logging.print_traffic_lines;
        let cores = (0..config.num_cores())
            .map(|id| GridCore::new(Arc::clone(&config), id, &engine, print_lines))
            .collect();
        let trace = run.sim.trace.as_deref().map(TraceSink::create).transpose()?;

        Ok(Self {
            fabric: MeshFabric::new(Arc::clone(&config)),
            global: MemorySliceStore::new(config.mem.global_size as usize, config.data_mask()),
            dma: DmaEngine::new(&run.dma),
            dma_backlog: VecDeque::new(),
            trace,
            total_threads: engine.total_threads(),
            timeout: run.sim.timeout,
            cycle: 0,
            cores,
            config,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn set_trace(&mut self, sink: TraceSink) {
        self.trace = Some(sink);
    }

    /// TILE_LD / TILE_ST / TILE_FENCE from core `core`. Takes effect on the next step.
    pub fn tile_command(&mut self, core: usize, command: TileCommand) {
        self.cores[core].tiles.issue(command);
    }

    /// Global-store word where `tile` of `core` is staged.
    pub fn tile_backing(&self, core: usize, tile: usize) -> u64 {
        self.dma
            .global_address(core, tile, self.config.tile.num_tiles, self.config.tile.tile_words)
    }

    pub fn finished(&self) -> bool {
        self.cores.iter().all(GridCore::is_done)
            && !self.dma.is_busy()
            && self.dma_backlog.is_empty()
    }

    /// Advance the grid by one clock edge.
    pub fn step(&mut self) -> anyhow::Result<()> {
        let now = self.cycle;

        for core in self.cores.iter_mut() {
            core.step(now, &mut self.fabric, &mut self.global, self.trace.as_mut())?;
        }

        self.dma.tick(now);
        while let Some(transfer) = self.dma.pop_ready() {
            DmaEngine::complete(&transfer, &mut self.cores[transfer.core].tiles, &mut self.global)?;
            debug!(
                "dma {:?} core {} tile {} done @ {}",
                transfer.direction, transfer.core, transfer.tile, now
            );
            self.record("dma_done", "dma", transfer.core, || {
                format!("{:?} tile {}", transfer.direction, transfer.tile)
            });
        }

        self.cores.iter_mut().for_each(GridCore::tick_one);
        self.fabric.tick_one();

        self.collect_transitions(now);
        self.issue_dma(now);

        self.cycle += 1;
        Ok(())
    }

    /// Run until every thread has retired and the DMA engine is idle.
    pub fn run(&mut self) -> anyhow::Result<RunSummary> {
        info!(
            "running {} threads on a {}x{} grid",
            self.total_threads, self.config.mesh.width, self.config.mesh.height
        );
        while !self.finished() {
            if self.cycle >= self.timeout {
                bail!("simulation timed out after {} cycles", self.timeout);
            }
            self.step()?;
        }
        info!("all threads retired at cycle {}", self.cycle);
        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        let per_core: Vec<CoreSummary> = self
            .cores
            .iter()
            .map(|core| CoreSummary {
                core_id: core.id,
                coord: core.coord,
                lsu: core.stats.clone(),
                arbiter: core.arbiter.stats.clone(),
                tiles: core.tiles.stats.clone(),
                tile_states: core.tiles.tile_states(),
            })
            .collect();
        RunSummary {
            cycles: self.cycle,
            total_threads: self.total_threads,
            total: aggregate_summaries(&per_core),
            mesh: self.fabric.stats.clone(),
            dma: self.dma.stats.clone(),
            per_core,
        }
    }

    /// Back to cycle 0 with every store cleared and every thread program rewound.
    pub fn reset(&mut self) {
        self.cores.iter_mut().for_each(GridCore::reset);
        self.fabric.reset();
        self.global.reset();
        self.dma.reset();
        self.dma_backlog.clear();
        self.cycle = 0;
    }

    // tiles that just entered LOADING or EVICTING need a DMA transfer
    fn collect_transitions(&mut self, now: Cycle) {
        let tile_words = self.config.tile.tile_words;
        let mut started = Vec::new();
        for core in &self.cores {
            for tr in core.tiles.last_transitions() {
                let direction = match tr.to {
                    TileState::Loading => Some(DmaDirection::Fill),
                    TileState::Evicting => Some(DmaDirection::Drain),
                    _ => None,
                };
                if let Some(direction) = direction {
                    started.push(DmaTransfer {
                        core: core.id,
                        tile: tr.tile,
                        global_base: self.tile_backing(core.id, tr.tile),
                        words: tile_words as usize,
                        direction,
                    });
                }
                if let Some(sink) = self.trace.as_mut() {
                    sink.record(TraceEvent {
                        cycle: now,
                        event: "tile",
                        unit: "tiles",
                        id: core.id,
                        detail: format!("tile {} {:?} -> {:?}", tr.tile, tr.from, tr.to),
                    });
                }
            }
        }
        self.dma_backlog.extend(started);
    }

    fn issue_dma(&mut self, now: Cycle) {
        while let Some(transfer) = self.dma_backlog.front().copied() {
            match self.dma.try_issue(now, transfer) {
                Ok(_) => {
                    self.dma_backlog.pop_front();
                }
                Err(reject) => {
                    debug!(
                        "dma {:?} core {} tile {} rejected ({:?}), retry at {}",
                        transfer.direction,
                        transfer.core,
                        transfer.tile,
                        reject.reason,
                        reject.retry_at
                    );
                    break;
                }
            }
        }
    }

    fn record<F: FnOnce() -> String>(&mut self, event: &'static str, unit: &'static str, id: usize, detail: F) {
        if let Some(sink) = self.trace.as_mut() {
            sink.record(TraceEvent {
                cycle: self.cycle,
                event,
                unit,
                id,
                detail: detail(),
            });
        }
    }
}
