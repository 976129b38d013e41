//! Tiles: addressable shim, memory and compute units of the fabric

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a tile declared in a [`crate::Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId(pub(crate) usize);

impl TileId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Column/row position in the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub col: u8,
    pub row: u8,
}

impl Coord {
    pub const fn new(col: u8, row: u8) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

/// What a tile is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileRole {
    /// I/O tile bridging host memory and the array through DMA
    Shim,
    /// Intermediate memory tile
    Mem,
    /// Compute tile running a core program
    Compute,
}

impl fmt::Display for TileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TileRole::Shim => "shim",
            TileRole::Mem => "mem",
            TileRole::Compute => "compute",
        })
    }
}

/// An immutable tile declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub role: TileRole,
    pub coord: Coord,
    /// Local data memory in bytes
    pub memory_capacity: usize,
}

impl Tile {
    pub fn is_shim(&self) -> bool {
        self.role == TileRole::Shim
    }

    /// Label used in diagnostics and thread names, e.g. `compute(0,2)`
    pub fn label(&self) -> String {
        format!("{}{}", self.role, self.coord)
    }
}
