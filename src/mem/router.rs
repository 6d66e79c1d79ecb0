use std::sync::Arc;

use crate::mem::types::{Direction, GridCoord};
use crate::sim::config::GridConfig;

/// How far a mesh slice is from a requester. Pure function of the two coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Local,
    Neighbor(Direction),
    Unreachable,
}

pub fn reachability(from: GridCoord, to: GridCoord) -> Reachability {
    match from.manhattan(to) {
        0 => Reachability::Local,
        1 => Direction::between(from, to)
            .map(Reachability::Neighbor)
            .unwrap_or(Reachability::Unreachable),
        _ => Reachability::Unreachable,
    }
}

/// Where one address goes when issued from a given coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Outside `[sram_base, sram_limit]`: hand to the global store untouched.
    External,
    /// Owned by the requester's own slice.
    Local { offset: usize },
    /// Owned by a slice exactly one hop away.
    Neighbor {
        owner: GridCoord,
        direction: Direction,
        offset: usize,
    },
    /// Owned by a slice two or more hops away; the access is dropped.
    Denied { owner: GridCoord },
}

/// Per-coordinate address classifier. Holds no state besides the static partition,
/// so every decision is combinational on (address, requester coordinate).
#[derive(Debug, Clone)]
pub struct AddressRouter {
    config: Arc<GridConfig>,
    coord: GridCoord,
}

impl AddressRouter {
    pub fn new(config: Arc<GridConfig>, coord: GridCoord) -> Self {
        Self { config, coord }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn route(&self, addr: u64) -> Route {
        let Some((owner, offset)) = self.config.address_to_slice(addr) else {
            return Route::External;
        };
        match reachability(self.coord, owner) {
            Reachability::Local => Route::Local { offset },
            Reachability::Neighbor(direction) => Route::Neighbor {
                owner,
                direction,
                offset,
            },
            Reachability::Unreachable => Route::Denied { owner },
        }
    }
}
