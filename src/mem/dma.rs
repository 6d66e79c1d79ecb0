use std::collections::VecDeque;

use anyhow::ensure;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::base::mem::HasMemory;
use crate::mem::slice::MemorySliceStore;
use crate::mem::tile::TileLifecycleController;
use crate::mem::types::TileId;
use crate::sim::config::Config;
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, Ticket, TimedServer};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DmaConfig {
    pub enabled: bool,
    /// First global-store word backing tile 0 of core 0. Tiles are laid out
    /// core-major behind it.
    pub global_base: u64,
    #[serde(flatten)]
    pub queue: ServerConfig,
}

impl Config for DmaConfig {}

impl DmaConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.queue.bytes_per_cycle > 0, "dma bytes_per_cycle must be > 0");
        ensure!(self.queue.queue_capacity > 0, "dma queue_capacity must be > 0");
        Ok(())
    }
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_base: 0xE000,
            queue: ServerConfig {
                base_latency: 10,
                bytes_per_cycle: 8,
                queue_capacity: 8,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DmaDirection {
    /// global store -> tile scratch
    Fill,
    /// tile scratch -> global store
    Drain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    pub core: usize,
    pub tile: TileId,
    pub global_base: u64,
    pub words: usize,
    pub direction: DmaDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaRejectReason {
    QueueFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaReject {
    pub retry_at: Cycle,
    pub reason: DmaRejectReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DmaStats {
    pub fills: u64,
    pub drains: u64,
    pub rejected: u64,
    pub bytes_issued: u64,
    pub bytes_completed: u64,
}

/// Moves whole tiles between the global store and a core's tile scratch. Data moves
/// when a transfer completes, and the owning controller gets the matching completion
/// pulse in the same step.
pub struct DmaEngine {
    enabled: bool,
    global_base: u64,
    queue_config: ServerConfig,
    queue: TimedServer<DmaTransfer>,
    ready: VecDeque<DmaTransfer>,
    pub stats: DmaStats,
}

impl DmaEngine {
    pub fn new(config: &DmaConfig) -> Self {
        if !config.enabled {
            warn!("dma disabled, transfers complete without delay");
        }
        Self {
            enabled: config.enabled,
            global_base: config.global_base,
            queue_config: config.queue,
            queue: TimedServer::new(config.queue),
            ready: VecDeque::new(),
            stats: DmaStats::default(),
        }
    }

    /// Global-store word where `tile` of `core` is staged.
    pub fn global_address(&self, core: usize, tile: TileId, num_tiles: usize, tile_words: u64) -> u64 {
        self.global_base + (core * num_tiles + tile) as u64 * tile_words
    }

    pub fn try_issue(&mut self, now: Cycle, transfer: DmaTransfer) -> Result<Ticket, DmaReject> {
        let bytes = (transfer.words * std::mem::size_of::<u64>()) as u32;
        if !self.enabled {
            self.account_issue(&transfer, bytes);
            self.ready.push_back(transfer);
            return Ok(Ticket::immediate(now, bytes));
        }
        match self.queue.try_enqueue(now, ServiceRequest::new(transfer, bytes)) {
            Ok(ticket) => {
                self.account_issue(&transfer, bytes);
                debug!(
                    "dma {:?} core {} tile {} issued @ {}, ready @ {}",
                    transfer.direction,
                    transfer.core,
                    transfer.tile,
                    now,
                    ticket.ready_at()
                );
                Ok(ticket)
            }
            Err(bp) => {
                self.stats.rejected += 1;
                Err(DmaReject {
                    retry_at: bp.retry_at,
                    reason: DmaRejectReason::QueueFull,
                })
            }
        }
    }

    pub fn tick(&mut self, now: Cycle) {
        let ready = &mut self.ready;
        let stats = &mut self.stats;
        self.queue.service_ready(now, |result| {
            stats.bytes_completed = stats
                .bytes_completed
                .saturating_add(result.ticket.size_bytes() as u64);
            ready.push_back(result.payload);
        });
    }

    /// Drop every queued and finished transfer.
    pub fn reset(&mut self) {
        self.queue = TimedServer::new(self.queue_config);
        self.ready.clear();
        self.stats = DmaStats::default();
    }

    pub fn pop_ready(&mut self) -> Option<DmaTransfer> {
        self.ready.pop_front()
    }

    pub fn is_busy(&self) -> bool {
        self.queue.outstanding() > 0 || !self.ready.is_empty()
    }

    /// Copy the words of a finished transfer and pulse the tile's controller.
    pub fn complete(
        transfer: &DmaTransfer,
        tiles: &mut TileLifecycleController,
        global: &mut MemorySliceStore,
    ) -> anyhow::Result<()> {
        let base = transfer.global_base as usize;
        match transfer.direction {
            DmaDirection::Fill => {
                for offset in 0..transfer.words {
                    let value = global.load(base + offset)?;
                    tiles.dma_fill(transfer.tile, offset, value)?;
                }
                tiles.dma_write_complete(transfer.tile);
            }
            DmaDirection::Drain => {
                for offset in 0..transfer.words {
                    let value = tiles.dma_drain(transfer.tile, offset)?;
                    global.store(base + offset, value)?;
                }
                tiles.dma_read_complete(transfer.tile);
            }
        }
        Ok(())
    }

    fn account_issue(&mut self, transfer: &DmaTransfer, bytes: u32) {
        match transfer.direction {
            DmaDirection::Fill => self.stats.fills += 1,
            DmaDirection::Drain => self.stats.drains += 1,
        }
        self.stats.bytes_issued = self.stats.bytes_issued.saturating_add(bytes as u64);
        if !self.enabled {
            self.stats.bytes_completed = self.stats.bytes_completed.saturating_add(bytes as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(direction: DmaDirection) -> DmaTransfer {
        DmaTransfer {
            core: 0,
            tile: 1,
            global_base: 0x40,
            words: 4,
            direction,
        }
    }

    #[test]
    fn transfer_waits_for_service_time() {
        let mut dma = DmaEngine::new(&DmaConfig {
            enabled: true,
            global_base: 0,
            queue: ServerConfig {
                base_latency: 2,
                bytes_per_cycle: 8,
                queue_capacity: 2,
            },
        });
        let ticket = dma.try_issue(0, transfer(DmaDirection::Fill)).unwrap();
        assert_eq!(6, ticket.ready_at());
        dma.tick(5);
        assert!(dma.pop_ready().is_none());
        dma.tick(6);
        assert_eq!(Some(transfer(DmaDirection::Fill)), dma.pop_ready());
        assert!(!dma.is_busy());
    }

    #[test]
    fn full_queue_is_rejected() {
        let mut dma = DmaEngine::new(&DmaConfig {
            queue: ServerConfig {
                base_latency: 1,
                bytes_per_cycle: 8,
                queue_capacity: 1,
            },
            ..DmaConfig::default()
        });
        dma.try_issue(0, transfer(DmaDirection::Fill)).unwrap();
        let err = dma.try_issue(0, transfer(DmaDirection::Drain)).unwrap_err();
        assert_eq!(DmaRejectReason::QueueFull, err.reason);
        assert_eq!(1, dma.stats.rejected);
    }

    #[test]
    fn disabled_engine_completes_immediately() {
        let mut dma = DmaEngine::new(&DmaConfig {
            enabled: false,
            ..DmaConfig::default()
        });
        let ticket = dma.try_issue(7, transfer(DmaDirection::Drain)).unwrap();
        assert_eq!(7, ticket.ready_at());
        assert!(dma.pop_ready().is_some());
    }

    #[test]
    fn tiles_are_laid_out_core_major() {
        let dma = DmaEngine::new(&DmaConfig::default());
        assert_eq!(0xE000, dma.global_address(0, 0, 4, 0x20));
        assert_eq!(0xE000 + 5 * 0x20, dma.global_address(1, 1, 4, 0x20));
    }

    #[test]
    fn zero_throughput_or_capacity_is_rejected() {
        let mut cfg = DmaConfig::default();
        cfg.validate().unwrap();
        cfg.queue.bytes_per_cycle = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("bytes_per_cycle"));
        cfg = DmaConfig::default();
        cfg.queue.queue_capacity = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("queue_capacity"));
    }

    #[test]
    fn reset_drops_queued_transfers() {
        let mut dma = DmaEngine::new(&DmaConfig::default());
        dma.try_issue(0, transfer(DmaDirection::Fill)).unwrap();
        assert!(dma.is_busy());
        dma.reset();
        assert!(!dma.is_busy());
        assert_eq!(0, dma.stats.fills);
        dma.tick(1_000);
        assert!(dma.pop_ready().is_none());
    }
}
