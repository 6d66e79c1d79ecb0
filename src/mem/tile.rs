use std::ops::Range;
use std::sync::Arc;

use anyhow::{bail, ensure};
use log::debug;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::Serialize;
use smallvec::SmallVec;

use crate::base::behavior::*;
use crate::base::mem::HasMemory;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::mem::slice::MemorySliceStore;
use crate::mem::types::TileId;
use crate::sim::config::GridConfig;
use crate::timeq::Cycle;

/// Lifecycle of one DMA-staged scratch tile. The discriminants are the encoding the
/// hardware exposes on its `tile_state` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive, Serialize)]
pub enum TileState {
    #[default]
    Idle = 0,
    Loading = 1,
    Ready = 2,
    InUse = 3,
    Evicting = 4,
}

/// Inputs that can move a tile between states. Declared in the order they are
/// applied when several land on the same tile in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TileEvent {
    WriteComplete,
    ReadComplete,
    Load,
    Store,
    Read,
    Fence,
}

impl TileState {
    pub fn transition(self, event: TileEvent) -> TileState {
        use TileEvent::*;
        use TileState::*;
        match (self, event) {
            (Idle, Load) => Loading,
            (Loading, WriteComplete) => Ready,
            (Ready, Read) => InUse,
            (Ready, Store) => Evicting,
            (InUse, Fence) => Ready,
            (Evicting, ReadComplete) => Idle,
            (state, _) => state,
        }
    }

    /// Whether `event` is meaningful in this state. Anything else is either a
    /// stalled read, a held fence, or caller misuse; all of them leave the state alone.
    pub fn accepts(self, event: TileEvent) -> bool {
        use TileEvent::*;
        use TileState::*;
        matches!(
            (self, event),
            (Idle, Load)
                | (Loading, WriteComplete)
                | (Ready, Read)
                | (Ready, Store)
                | (Ready, Fence)
                | (InUse, Read)
                | (InUse, Fence)
                | (Evicting, ReadComplete)
        )
    }

    pub fn must_stall(self) -> bool {
        matches!(self, TileState::Idle | TileState::Loading | TileState::Evicting)
    }

    pub fn code(self) -> u8 {
        self.to_u8().unwrap_or_default()
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_u8(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCommand {
    Load(TileId),
    Store(TileId),
    Fence(TileId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileTransition {
    pub cycle: Cycle,
    pub tile: TileId,
    pub from: TileState,
    pub to: TileState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TileStats {
    pub loads: u64,
    pub stores: u64,
    pub fences_issued: u64,
    pub fences_completed: u64,
    pub fence_hold_cycles: u64,
    pub served_reads: u64,
    pub stalled_reads: u64,
    pub ignored_events: u64,
    pub transitions: u64,
}

#[derive(Debug, Clone, Default)]
struct TileSlot {
    state: TileState,
    events: SmallVec<[TileEvent; 4]>,
    fence_pending: bool,
    fence_done: bool,
}

#[derive(Debug, Default)]
pub struct TileControllerState {
    slots: Vec<TileSlot>,
}

/// Gates visibility of the per-core scratch tiles. A tile's words are readable only
/// while it is READY or IN_USE, so a consumer can never see a partially DMA'd tile.
/// Commands, DMA pulses and reads collected during a cycle take effect together on
/// the next `tick_one`.
pub struct TileLifecycleController {
    base: ModuleBase<TileControllerState, GridConfig>,
    core_id: usize,
    scratch: MemorySliceStore,
    last_transitions: Vec<TileTransition>,
    pub stats: TileStats,
}

impl TileLifecycleController {
    pub fn new(config: Arc<GridConfig>, core_id: usize) -> Self {
        let num_tiles = config.tile.num_tiles;
        let scratch_words = num_tiles * config.tile.tile_words as usize;
        let mut me = Self {
            base: ModuleBase::with_state(TileControllerState {
                slots: vec![TileSlot::default(); num_tiles],
            }),
            core_id,
            scratch: MemorySliceStore::new(scratch_words, config.data_mask()),
            last_transitions: Vec::new(),
            stats: TileStats::default(),
        };
        me.init_conf(config);
        me
    }

    pub fn num_tiles(&self) -> usize {
        self.state().slots.len()
    }

    pub fn tile_state(&self, tile: TileId) -> TileState {
        self.slot(tile).state
    }

    pub fn tile_states(&self) -> Vec<TileState> {
        self.state().slots.iter().map(|s| s.state).collect()
    }

    pub fn lsu_must_stall(&self, tile: TileId) -> bool {
        self.tile_state(tile).must_stall()
    }

    /// Whether a fence on `tile` completed on the most recent clock edge.
    pub fn fence_done(&self, tile: TileId) -> bool {
        self.slot(tile).fence_done
    }

    pub fn fence_pending(&self, tile: TileId) -> bool {
        self.slot(tile).fence_pending
    }

    pub fn last_transitions(&self) -> &[TileTransition] {
        &self.last_transitions
    }

    /// Address range owned by `tile`, in words.
    pub fn range(&self, tile: TileId) -> Range<u64> {
        let tile_conf = &self.conf().tile;
        let start = tile_conf.tile_base + tile as u64 * tile_conf.tile_words;
        start..start + tile_conf.tile_words
    }

    pub fn tile_for_address(&self, addr: u64) -> Option<(TileId, usize)> {
        let tile_conf = &self.conf().tile;
        let rel = addr.checked_sub(tile_conf.tile_base)?;
        let tile = (rel / tile_conf.tile_words) as usize;
        (tile < self.num_tiles()).then(|| (tile, (rel % tile_conf.tile_words) as usize))
    }

    pub fn issue(&mut self, command: TileCommand) {
        match command {
            TileCommand::Load(tile) => {
                self.stats.loads += 1;
                self.push_event(tile, TileEvent::Load);
            }
            TileCommand::Store(tile) => {
                self.stats.stores += 1;
                self.push_event(tile, TileEvent::Store);
            }
            TileCommand::Fence(tile) => {
                self.stats.fences_issued += 1;
                self.slot_mut(tile).fence_pending = true;
            }
        }
    }

    /// DMA finished filling `tile`.
    pub fn dma_write_complete(&mut self, tile: TileId) {
        self.push_event(tile, TileEvent::WriteComplete);
    }

    /// DMA finished draining `tile` back to its backing store.
    pub fn dma_read_complete(&mut self, tile: TileId) {
        self.push_event(tile, TileEvent::ReadComplete);
    }

    /// Consumer read of word `offset` of `tile`. Returns `None` when the LSU must
    /// stall and retry; a READY tile moves to IN_USE on the next edge.
    pub fn read(&mut self, tile: TileId, offset: usize) -> anyhow::Result<Option<u64>> {
        let words = self.conf().tile.tile_words as usize;
        ensure!(offset < words, "offset {offset} outside tile of {words} words");
        if self.lsu_must_stall(tile) {
            self.stats.stalled_reads += 1;
            return Ok(None);
        }
        self.stats.served_reads += 1;
        self.push_event(tile, TileEvent::Read);
        let base = self.range(tile).start - self.conf().tile.tile_base;
        Ok(Some(self.scratch.load(base as usize + offset)?))
    }

    pub fn read_address(&mut self, addr: u64) -> anyhow::Result<Option<u64>> {
        let Some((tile, offset)) = self.tile_for_address(addr) else {
            bail!("address {:#x} is not backed by any tile", addr);
        };
        self.read(tile, offset)
    }

    /// DMA-side write into a tile that is being filled.
    pub fn dma_fill(&mut self, tile: TileId, offset: usize, value: u64) -> anyhow::Result<()> {
        let state = self.tile_state(tile);
        ensure!(state == TileState::Loading, "DMA fill of tile {tile} while {state:?}");
        let idx = self.scratch_index(tile, offset)?;
        self.scratch.store(idx, value)
    }

    /// DMA-side read from a tile that is being drained.
    pub fn dma_drain(&self, tile: TileId, offset: usize) -> anyhow::Result<u64> {
        let state = self.tile_state(tile);
        ensure!(state == TileState::Evicting, "DMA drain of tile {tile} while {state:?}");
        let idx = self.scratch_index(tile, offset)?;
        self.scratch.load(idx)
    }

    fn scratch_index(&self, tile: TileId, offset: usize) -> anyhow::Result<usize> {
        let words = self.conf().tile.tile_words as usize;
        ensure!(offset < words, "offset {offset} outside tile of {words} words");
        Ok(tile * words + offset)
    }

    fn push_event(&mut self, tile: TileId, event: TileEvent) {
        self.slot_mut(tile).events.push(event);
    }

    fn slot(&self, tile: TileId) -> &TileSlot {
        let num_tiles = self.num_tiles();
        assert!(tile < num_tiles, "tile {tile} out of range for {num_tiles} tiles");
        &self.state().slots[tile]
    }

    fn slot_mut(&mut self, tile: TileId) -> &mut TileSlot {
        let num_tiles = self.num_tiles();
        assert!(tile < num_tiles, "tile {tile} out of range for {num_tiles} tiles");
        &mut self.state_mut().slots[tile]
    }
}

module!(TileLifecycleController, TileControllerState, GridConfig,);

impl ModuleBehaviors for TileLifecycleController {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let now = self.base.cycle;
        self.last_transitions.clear();

        for (tile, slot) in self.base.state.slots.iter_mut().enumerate() {
            let start = slot.state;

            // a fence completes only if the tile was READY going into this edge
            let fence_active = slot.fence_pending;
            slot.fence_done = fence_active && start == TileState::Ready;
            if slot.fence_done {
                slot.fence_pending = false;
                self.stats.fences_completed += 1;
            } else if fence_active {
                self.stats.fence_hold_cycles += 1;
            }

            let mut events = std::mem::take(&mut slot.events);
            if fence_active {
                events.push(TileEvent::Fence);
            }
            events.sort();
            events.dedup();

            let mut state = start;
            for event in events {
                if state.accepts(event) {
                    state = state.transition(event);
                } else if event != TileEvent::Fence {
                    self.stats.ignored_events += 1;
                    debug!(
                        "core {} tile {}: ignoring {:?} while {:?}",
                        self.core_id, tile, event, state
                    );
                }
            }

            if state != start {
                debug!(
                    "core {} tile {}: {:?} -> {:?} @ cycle {}",
                    self.core_id, tile, start, state, now
                );
                self.stats.transitions += 1;
                self.last_transitions.push(TileTransition {
                    cycle: now,
                    tile,
                    from: start,
                    to: state,
                });
            }
            slot.state = state;
        }
    }

    fn reset(&mut self) {
        let num_tiles = self.num_tiles();
        self.state_mut().slots = vec![TileSlot::default(); num_tiles];
        self.last_transitions.clear();
        self.scratch.reset();
        self.base.cycle = 0;
    }
}
