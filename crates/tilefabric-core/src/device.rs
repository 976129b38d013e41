//! Device families and the tile layout they make legal.
//!
//! | Device | Columns | Rows | Layout |
//! |--------|---------|------|--------|
//! | NPU1   | 5       | 6    | row 0 shim, row 1 memory, rows 2-5 compute |
//! | NPU2   | 8       | 6    | row 0 shim, row 1 memory, rows 2-5 compute |
//!
//! The fabric model receives a device family from its caller and only uses it
//! to validate declared coordinates and to size tile-local memory.

use serde::{Deserialize, Serialize};

use crate::tile::{Coord, TileRole};

/// Data memory per compute tile: 64 KiB
pub const COMPUTE_TILE_MEMORY: usize = 64 * 1024;

/// Data memory per memory tile: 512 KiB
pub const MEM_TILE_MEMORY: usize = 512 * 1024;

/// Buffer descriptors available to each shim tile DMA
pub const SHIM_BD_COUNT: u8 = 16;

/// Target device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// Phoenix / Hawk Point
    Npu1,
    /// Strix
    Npu2,
}

impl DeviceFamily {
    pub const fn columns(self) -> u8 {
        match self {
            DeviceFamily::Npu1 => 5,
            DeviceFamily::Npu2 => 8,
        }
    }

    pub const fn rows(self) -> u8 {
        6
    }

    /// Role of the tile at `coord`, or `None` when it lies outside the array.
    pub fn role_at(self, coord: Coord) -> Option<TileRole> {
        if coord.col >= self.columns() || coord.row >= self.rows() {
            return None;
        }
        Some(match coord.row {
            0 => TileRole::Shim,
            1 => TileRole::Mem,
            _ => TileRole::Compute,
        })
    }

    /// Local data memory of a tile with the given role
    pub const fn memory_capacity(self, role: TileRole) -> usize {
        match role {
            TileRole::Shim => 0,
            TileRole::Mem => MEM_TILE_MEMORY,
            TileRole::Compute => COMPUTE_TILE_MEMORY,
        }
    }

    /// Parse the device names used by host tooling (`npu`, `npu1`, `npu2`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "npu" | "npu1" => Some(DeviceFamily::Npu1),
            "npu2" => Some(DeviceFamily::Npu2),
            _ => None,
        }
    }
}
