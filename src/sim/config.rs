use std::path::PathBuf;

use anyhow::ensure;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::mem::dma::DmaConfig;
use crate::mem::types::GridCoord;
use crate::traffic::config::TrafficConfig;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub timeout: u64,
    pub trace: Option<PathBuf>,
    pub results_json: Option<PathBuf>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 100_000,
            trace: None,
            results_json: None,
        }
    }
}

/// Per-core private memory and the address partition registers.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MemConfig {
    pub num_banks: usize,
    pub num_requesters: usize,
    pub threads_per_warp: usize,
    pub data_bits: u32,
    pub read_latency: u64,
    /// First mesh-slice address; everything below it is core-private.
    pub sram_base: u64,
    /// Last mesh-slice address (inclusive); everything above it is global.
    pub sram_limit: u64,
    pub global_size: u64,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            num_banks: 8,
            num_requesters: 8,
            threads_per_warp: 4,
            data_bits: 8,
            read_latency: 1,
            sram_base: 0x8000,
            sram_limit: 0xBFFF,
            global_size: 0x1_0000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MeshConfig {
    pub width: usize,
    pub height: usize,
    pub slice_words: u64,
}

impl Config for MeshConfig {}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            width: 4,
            height: 4,
            slice_words: 0x400,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TileConfig {
    pub num_tiles: usize,
    pub tile_words: u64,
    pub tile_base: u64,
}

impl Config for TileConfig {}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            num_tiles: 4,
            tile_words: 0x20,
            // top of the private region, clear of the low words threads use
            tile_base: 0x7000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Private,
    Mesh,
    Global,
}

/// The static hardware configuration every block is built against. Validated once,
/// then shared as `Arc<GridConfig>` and never mutated during a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridConfig {
    pub mem: MemConfig,
    pub mesh: MeshConfig,
    pub tile: TileConfig,
}

impl GridConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mem = &self.mem;
        ensure!(mem.num_banks > 0, "num_banks must be > 0");
        ensure!(mem.num_requesters > 0, "num_requesters must be > 0");
        ensure!(mem.threads_per_warp > 0, "threads_per_warp must be > 0");
        ensure!(
            (1..=64).contains(&mem.data_bits),
            "data_bits must be in 1..=64, got {}",
            mem.data_bits
        );
        ensure!(
            mem.sram_base <= mem.sram_limit,
            "sram_base {:#x} above sram_limit {:#x}",
            mem.sram_base,
            mem.sram_limit
        );
        ensure!(
            mem.global_size > mem.sram_limit,
            "global store of {:#x} words cannot hold addresses above {:#x}",
            mem.global_size,
            mem.sram_limit
        );

        let mesh = &self.mesh;
        ensure!(mesh.width > 0 && mesh.height > 0, "mesh must be at least 1x1");
        ensure!(mesh.slice_words > 0, "slice_words must be > 0");
        let interval = mem.sram_limit - mem.sram_base + 1;
        let covered = mesh.slice_words * (mesh.width * mesh.height) as u64;
        ensure!(
            interval == covered,
            "mesh interval of {:#x} words does not match {}x{} slices of {:#x}",
            interval,
            mesh.width,
            mesh.height,
            mesh.slice_words
        );

        let tile = &self.tile;
        ensure!(tile.tile_words > 0, "tile_words must be > 0");
        let tile_end = tile.tile_base + tile.num_tiles as u64 * tile.tile_words;
        ensure!(
            tile_end <= mem.sram_base,
            "tile window {:#x}..{:#x} leaves the private region below {:#x}",
            tile.tile_base,
            tile_end,
            mem.sram_base
        );
        Ok(())
    }

    pub fn num_cores(&self) -> usize {
        self.mesh.width * self.mesh.height
    }

    pub fn num_warps(&self) -> usize {
        self.mem.num_requesters.div_ceil(self.mem.threads_per_warp)
    }

    pub fn data_mask(&self) -> u64 {
        match self.mem.data_bits {
            64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    pub fn region(&self, addr: u64) -> Region {
        if addr < self.mem.sram_base {
            Region::Private
        } else if addr <= self.mem.sram_limit {
            Region::Mesh
        } else {
            Region::Global
        }
    }

    /// Owning slice and word offset inside it, for addresses in the mesh interval.
    pub fn address_to_slice(&self, addr: u64) -> Option<(GridCoord, usize)> {
        if self.region(addr) != Region::Mesh {
            return None;
        }
        let rel = addr - self.mem.sram_base;
        let slice = (rel / self.mesh.slice_words) as usize;
        let offset = (rel % self.mesh.slice_words) as usize;
        Some((GridCoord::from_linear(slice, self.mesh.width), offset))
    }

    pub fn core_coord(&self, core_id: usize) -> GridCoord {
        GridCoord::from_linear(core_id, self.mesh.width)
    }
}

/// Everything the binary reads from the TOML file.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub sim: SimConfig,
    pub grid: GridConfig,
    pub dma: DmaConfig,
    pub traffic: TrafficConfig,
}

impl RunConfig {
    pub fn from_table(table: &Table) -> Self {
        Self {
            sim: SimConfig::from_section(table.get("sim")),
            grid: GridConfig {
                mem: MemConfig::from_section(table.get("mem")),
                mesh: MeshConfig::from_section(table.get("mesh")),
                tile: TileConfig::from_section(table.get("tile")),
            },
            dma: DmaConfig::from_section(table.get("dma")),
            traffic: TrafficConfig::from_section(table.get("traffic")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_partition_matches_mesh() {
        let cfg = GridConfig::default();
        cfg.validate().unwrap();
        assert_eq!(Region::Private, cfg.region(0x7FFF));
        assert_eq!(Region::Mesh, cfg.region(0x8000));
        assert_eq!(Region::Mesh, cfg.region(0xBFFF));
        assert_eq!(Region::Global, cfg.region(0xC000));
    }

    #[test]
    fn slices_are_row_major() {
        let cfg = GridConfig::default();
        assert_eq!(Some((GridCoord::new(0, 0), 0x3FF)), cfg.address_to_slice(0x83FF));
        assert_eq!(Some((GridCoord::new(0, 1), 0)), cfg.address_to_slice(0x8400));
        assert_eq!(Some((GridCoord::new(1, 0), 5)), cfg.address_to_slice(0x9005));
        assert_eq!(None, cfg.address_to_slice(0xC000));
    }

    #[test]
    fn rejects_uncovered_interval() {
        let mut cfg = GridConfig::default();
        cfg.mesh.slice_words = 0x200;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_tile_window_outside_private_region() {
        let mut cfg = GridConfig::default();
        cfg.tile.tile_base = cfg.mem.sram_base - 0x40;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tile window"), "{err}");
    }

    #[test]
    fn sections_parse_from_toml() {
        let table: Table = toml::from_str(
            r#"
            [mem]
            num_banks = 4
            [mesh]
            width = 2
            height = 8
            "#,
        )
        .unwrap();
        let cfg = RunConfig::from_table(&table);
        assert_eq!(4, cfg.grid.mem.num_banks);
        assert_eq!(8, cfg.grid.mem.num_requesters);
        assert_eq!(2, cfg.grid.mesh.width);
        assert_eq!(GridCoord::new(1, 1), cfg.grid.core_coord(3));
    }
}
