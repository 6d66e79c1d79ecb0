use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::mem::HasMemory;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::mem::router::{AddressRouter, Route};
use crate::mem::slice::MemorySliceStore;
use crate::mem::types::{Direction, GridCoord, Request, RequesterId};
use crate::sim::config::GridConfig;

/// A thread request that missed the private region, tagged with the issuing core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRequest {
    pub core: GridCoord,
    pub request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Local,
    Neighbor(Direction),
}

/// Request for the global store, carrying the original requester so the response
/// can find its way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalRequest {
    pub core: GridCoord,
    pub requester_id: RequesterId,
    pub address: u64,
    pub is_write: bool,
    pub data: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshOutcome {
    /// Served by a mesh slice; `data` is set for loads.
    Served {
        slice: GridCoord,
        hop: Hop,
        data: Option<u64>,
    },
    /// Slice is out of reach. Nothing is written and no error reaches the requester.
    Denied { owner: GridCoord },
    External(ExternalRequest),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MeshStats {
    pub local: u64,
    pub neighbor: u64,
    pub denied: u64,
    pub external: u64,
    /// Neighbor hops by direction: north, south, east, west.
    pub hops_by_direction: [u64; 4],
    pub slice_writes: Vec<u64>,
}

/// The 2D grid of L2 slices. Owns one router and one slice store per coordinate and
/// forwards each request to the owning slice when it is at most one hop away.
pub struct MeshFabric {
    base: ModuleBase<(), GridConfig>,
    routers: Vec<AddressRouter>,
    slices: Vec<MemorySliceStore>,
    pub stats: MeshStats,
}

impl MeshFabric {
    pub fn new(config: Arc<GridConfig>) -> Self {
        let num_slices = config.num_cores();
        let routers = (0..num_slices)
            .map(|id| AddressRouter::new(Arc::clone(&config), config.core_coord(id)))
            .collect();
        let slices = (0..num_slices)
            .map(|_| MemorySliceStore::new(config.mesh.slice_words as usize, config.data_mask()))
            .collect();
        let mut me = Self {
            base: ModuleBase::default(),
            routers,
            slices,
            stats: MeshStats {
                slice_writes: vec![0; num_slices],
                ..MeshStats::default()
            },
        };
        me.init_conf(config);
        me
    }

    pub fn router(&self, coord: GridCoord) -> &AddressRouter {
        &self.routers[coord.linear(self.conf().mesh.width)]
    }

    pub fn slice(&self, coord: GridCoord) -> &MemorySliceStore {
        &self.slices[coord.linear(self.conf().mesh.width)]
    }

    pub fn slice_mut(&mut self, coord: GridCoord) -> &mut MemorySliceStore {
        let idx = coord.linear(self.conf().mesh.width);
        &mut self.slices[idx]
    }

    pub fn access(&mut self, req: MeshRequest) -> anyhow::Result<MeshOutcome> {
        let width = self.conf().mesh.width;
        let MeshRequest { core, request } = req;
        let route = self.router(core).route(request.address);
        let (slice, hop, offset) = match route {
            Route::External => {
                self.stats.external += 1;
                return Ok(MeshOutcome::External(ExternalRequest {
                    core,
                    requester_id: request.requester_id,
                    address: request.address,
                    is_write: request.is_write,
                    data: request.data,
                }));
            }
            Route::Denied { owner } => {
                // TODO: surface an explicit denial signal to the requester instead of a silent drop
                self.stats.denied += 1;
                debug!(
                    "mesh: {} requester {} denied {:#x} owned by {} ({} hops)",
                    core,
                    request.requester_id,
                    request.address,
                    owner,
                    core.manhattan(owner)
                );
                return Ok(MeshOutcome::Denied { owner });
            }
            Route::Local { offset } => {
                self.stats.local += 1;
                (core, Hop::Local, offset)
            }
            Route::Neighbor {
                owner,
                direction,
                offset,
            } => {
                self.stats.neighbor += 1;
                self.stats.hops_by_direction[direction.index()] += 1;
                (owner, Hop::Neighbor(direction), offset)
            }
        };

        let idx = slice.linear(width);
        let data = if request.is_write {
            self.slices[idx].store(offset, request.data.unwrap_or_default())?;
            self.stats.slice_writes[idx] += 1;
            None
        } else {
            Some(self.slices[idx].load(offset)?)
        };
        Ok(MeshOutcome::Served { slice, hop, data })
    }

    /// Resolve every request issued this cycle, in order.
    pub fn cycle(&mut self, requests: &[MeshRequest]) -> anyhow::Result<Vec<MeshOutcome>> {
        requests.iter().map(|&req| self.access(req)).collect()
    }
}

module!(MeshFabric, (), GridConfig,);

impl ModuleBehaviors for MeshFabric {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
    }

    fn reset(&mut self) {
        self.slices.iter_mut().for_each(MemorySliceStore::reset);
        self.stats = MeshStats {
            slice_writes: vec![0; self.slices.len()],
            ..MeshStats::default()
        };
        self.base.cycle = 0;
    }
}
