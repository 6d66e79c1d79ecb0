use std::sync::Arc;

use log::trace;
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::mem::HasMemory;
use crate::mem::arbiter::BankArbiter;
use crate::mem::mesh::{MeshFabric, MeshOutcome, MeshRequest};
use crate::mem::slice::MemorySliceStore;
use crate::mem::tile::TileLifecycleController;
use crate::mem::types::{GridCoord, Request, RequesterId};
use crate::sim::config::{GridConfig, Region};
use crate::sim::trace::{TraceEvent, TraceSink};
use crate::timeq::Cycle;
use crate::traffic::driver::CoreTrafficDriver;
use crate::traffic::patterns::{PatternEngine, ThreadOp};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoreStats {
    pub issued: u64,
    pub retired_ops: u64,
    pub retries: u64,
    pub warp_stall_cycles: u64,
    pub denied: u64,
    pub external: u64,
}

/// One grid coordinate: the core's private bank set behind its arbiter, its tile
/// scratch, and the LSU front end that splits thread requests by region.
pub struct GridCore {
    pub id: usize,
    pub coord: GridCoord,
    pub arbiter: BankArbiter,
    pub tiles: TileLifecycleController,
    pub driver: CoreTrafficDriver,
    pub stats: CoreStats,
    config: Arc<GridConfig>,
}

impl GridCore {
    pub fn new(config: Arc<GridConfig>, id: usize, engine: &PatternEngine, print_lines: bool) -> Self {
        Self {
            id,
            coord: config.core_coord(id),
            arbiter: BankArbiter::new(Arc::clone(&config), id),
            tiles: TileLifecycleController::new(Arc::clone(&config), id),
            driver: CoreTrafficDriver::new(engine, id, config.mem.num_requesters, print_lines),
            stats: CoreStats::default(),
            config,
        }
    }

    pub fn is_done(&self) -> bool {
        self.driver.is_done() && !self.arbiter.has_inflight() && self.arbiter.completions.is_empty()
    }

    /// Issue every free lane's request for this cycle. Loads inside the tile window
    /// read the tile scratch and stall while the tile is not visible. Other private
    /// addresses go through the bank arbiter. Everything else is handed to the mesh,
    /// whose external requests are served by the global store.
    pub fn step(
        &mut self,
        now: Cycle,
        fabric: &mut MeshFabric,
        global: &mut MemorySliceStore,
        mut sink: Option<&mut TraceSink>,
    ) -> anyhow::Result<()> {
        // responses for loads granted on earlier cycles
        while let Some(resp) = self.arbiter.pop_completion() {
            self.driver.complete(resp.requester_id, Some(resp.data), now);
            self.stats.retired_ops += 1;
        }

        let pending = self.driver.pending();
        self.stats.issued += pending.len() as u64;
        let (tile_loads, pending): (Vec<(RequesterId, ThreadOp)>, Vec<_>) =
            pending.into_iter().partition(|(_, op)| {
                !op.op.is_store() && self.tiles.tile_for_address(op.address).is_some()
            });
        let (private, shared): (Vec<(RequesterId, ThreadOp)>, Vec<_>) = pending
            .into_iter()
            .partition(|(_, op)| self.config.region(op.address) == Region::Private);

        // loads in the tile window see the scratch, and only once the tile is visible
        for (lane, op) in tile_loads {
            match self.tiles.read_address(op.address)? {
                Some(value) => {
                    self.driver.complete(lane, Some(value), now);
                    self.stats.retired_ops += 1;
                }
                None => {
                    self.stats.retries += 1;
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.record(TraceEvent {
                            cycle: now,
                            event: "tile_stall",
                            unit: "tile",
                            id: self.id,
                            detail: format!("lane {} addr {:#x}", lane, op.address),
                        });
                    }
                }
            }
        }

        let requests: Vec<Request> = private
            .iter()
            .map(|&(lane, op)| to_request(lane, &op))
            .collect();
        let result = self.arbiter.arbitrate(&requests)?;
        if result.warp_stall.iter().any(|&stall| stall) {
            self.stats.warp_stall_cycles += 1;
        }
        for (lane, op) in &private {
            let status = result.lanes[*lane];
            if status.grant {
                if op.op.is_store() {
                    self.driver.complete(*lane, None, now);
                    self.stats.retired_ops += 1;
                } else {
                    self.driver.mark_awaiting(*lane);
                }
            } else {
                self.stats.retries += 1;
                if let Some(sink) = sink.as_deref_mut() {
                    let event = if status.gated { "gated" } else { "conflict" };
                    sink.record(TraceEvent {
                        cycle: now,
                        event,
                        unit: "arbiter",
                        id: self.id,
                        detail: format!("lane {} addr {:#x}", lane, op.address),
                    });
                }
            }
        }
        // loads granted with zero latency are already waiting
        while let Some(resp) = self.arbiter.pop_completion() {
            self.driver.complete(resp.requester_id, Some(resp.data), now);
            self.stats.retired_ops += 1;
        }

        for (lane, op) in shared {
            let outcome = fabric.access(MeshRequest {
                core: self.coord,
                request: to_request(lane, &op),
            })?;
            let (value, event) = match outcome {
                MeshOutcome::Served { data, .. } => (data, "mesh"),
                MeshOutcome::Denied { .. } => {
                    // the requester sees the reset value
                    self.stats.denied += 1;
                    ((!op.op.is_store()).then_some(0), "denied")
                }
                MeshOutcome::External(ext) => {
                    self.stats.external += 1;
                    let offset = ext.address as usize;
                    let value = if ext.is_write {
                        global.store(offset, ext.data.unwrap_or_default())?;
                        None
                    } else {
                        Some(global.load(offset)?)
                    };
                    (value, "external")
                }
            };
            trace!(
                "core {} lane {}: {} {:#x} -> {}",
                self.id,
                lane,
                if op.op.is_store() { "store" } else { "load" },
                op.address,
                event
            );
            if let Some(sink) = sink.as_deref_mut() {
                sink.record(TraceEvent {
                    cycle: now,
                    event,
                    unit: "lsu",
                    id: self.id,
                    detail: format!("lane {} addr {:#x}", lane, op.address),
                });
            }
            self.driver.complete(lane, value, now);
            self.stats.retired_ops += 1;
        }
        Ok(())
    }
}

fn to_request(lane: RequesterId, op: &ThreadOp) -> Request {
    if op.op.is_store() {
        Request::store(lane, op.address, op.data)
    } else {
        Request::load(lane, op.address)
    }
}

impl ModuleBehaviors for GridCore {
    fn tick_one(&mut self) {
        self.arbiter.tick_one();
        self.tiles.tick_one();
    }

    fn reset(&mut self) {
        self.arbiter.reset();
        self.tiles.reset();
        self.driver.reset();
        self.stats = CoreStats::default();
    }
}
