//! Tile-local buffers

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};
use crate::tile::TileId;
use crate::types::{Scalar, TensorType};

/// Handle to a buffer declared in a [`crate::Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Initial contents of a buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InitialValue {
    /// Every element holds the same value
    Splat(Scalar),
    /// Element-wise values in row-major order
    Values(Vec<Scalar>),
}

impl Default for InitialValue {
    fn default() -> Self {
        InitialValue::Splat(Scalar::Int(0))
    }
}

impl InitialValue {
    /// Expand into exactly `len` row-major scalars.
    pub fn expand(&self, len: usize) -> Vec<Scalar> {
        match self {
            InitialValue::Splat(value) => vec![*value; len],
            InitialValue::Values(values) => values.clone(),
        }
    }
}

/// A named memory region owned by exactly one tile
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub name: String,
    pub tile: TileId,
    pub ty: TensorType,
    pub initial: InitialValue,
}

impl Buffer {
    pub(crate) fn new(name: String, tile: TileId, ty: TensorType, initial: InitialValue) -> Result<Self> {
        if let InitialValue::Values(values) = &initial {
            if values.len() != ty.num_elements() {
                return Err(FabricError::declaration(format!(
                    "buffer '{name}': initializer has {} values for {ty}",
                    values.len()
                )));
            }
        }
        Ok(Self { name, tile, ty, initial })
    }

    pub fn len(&self) -> usize {
        self.ty.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
