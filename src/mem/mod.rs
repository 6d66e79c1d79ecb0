pub mod arbiter;
pub mod dma;
pub mod mesh;
pub mod router;
pub mod slice;
pub mod tile;
pub mod types;

pub use arbiter::{ArbiterStats, ArbitrationResult, BankArbiter, LaneStatus};
pub use dma::{DmaConfig, DmaDirection, DmaEngine, DmaReject, DmaRejectReason, DmaStats, DmaTransfer};
pub use mesh::{ExternalRequest, Hop, MeshFabric, MeshOutcome, MeshRequest, MeshStats};
pub use router::{reachability, AddressRouter, Reachability, Route};
pub use slice::MemorySliceStore;
pub use tile::{TileCommand, TileEvent, TileLifecycleController, TileState, TileStats, TileTransition};
pub use types::{Direction, GridCoord, ReadResponse, Request, RequesterId, TileId};
