//! Object FIFO channels and their acquire/release protocol.
//!
//! A channel is a ring of `depth` element slots between one producer tile and
//! one consumer tile. Each side walks the ring in order:
//!
//! ```text
//!            freed            written
//!              │                 │
//!   ┌────┬────┬▼───┬────┬────┬──▼─┬────┐
//!   │    │    │ C  │ C  │ F  │ P  │    │   C = held by consumer
//!   └────┴────┴────┴────┴────┴────┴────┘   F = filled, not yet acquired
//!                                           P = held by producer
//! ```
//!
//! [`FifoCursor`] is the pure protocol state: it never blocks. A `NotReady`
//! result is what an executor turns into a suspension of the acquiring tile.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};
use crate::tile::TileId;
use crate::types::TensorType;

/// Handle to a channel declared in a [`crate::Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Side of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Port {
    Produce,
    Consume,
}

impl Port {
    pub const fn opposite(self) -> Self {
        match self {
            Port::Produce => Port::Consume,
            Port::Consume => Port::Produce,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Port::Produce => "produce",
            Port::Consume => "consume",
        })
    }
}

/// Channel declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFifo {
    pub name: String,
    pub producer: TileId,
    pub consumer: TileId,
    pub depth: usize,
    pub element: TensorType,
}

impl ObjectFifo {
    /// Tile attached to `port`
    pub fn endpoint(&self, port: Port) -> TileId {
        match port {
            Port::Produce => self.producer,
            Port::Consume => self.consumer,
        }
    }
}

/// Whether an acquired element may be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Write,
    Read,
}

/// One acquired slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    /// Ring slot in `0..depth`
    pub slot: usize,
    /// Monotonic element sequence number (the i-th element through the channel)
    pub sequence: u64,
    pub access: Access,
}

/// Protocol state of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoCursor {
    name: String,
    depth: usize,
    /// Total elements released by the producer
    written: u64,
    /// Total elements released by the consumer
    freed: u64,
    producer_held: usize,
    consumer_held: usize,
}

impl FifoCursor {
    pub fn new(name: impl Into<String>, depth: usize) -> Result<Self> {
        let name = name.into();
        if depth == 0 {
            return Err(FabricError::declaration(format!("channel '{name}': depth must be at least 1")));
        }
        Ok(Self {
            name,
            depth,
            written: 0,
            freed: 0,
            producer_held: 0,
            consumer_held: 0,
        })
    }

    pub fn for_channel(fifo: &ObjectFifo) -> Result<Self> {
        Self::new(fifo.name.clone(), fifo.depth)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slots currently held, acquired but not released, on `port`
    pub fn held(&self, port: Port) -> usize {
        match port {
            Port::Produce => self.producer_held,
            Port::Consume => self.consumer_held,
        }
    }

    /// Elements released by the producer and not yet released by the consumer
    pub fn occupancy(&self) -> usize {
        (self.written - self.freed) as usize
    }

    /// Slots `port` could acquire right now on top of what it holds
    pub fn available(&self, port: Port) -> usize {
        match port {
            Port::Produce => self.depth - self.occupancy() - self.producer_held,
            Port::Consume => self.occupancy() - self.consumer_held,
        }
    }

    /// Total elements released on `port` so far
    pub fn released(&self, port: Port) -> u64 {
        match port {
            Port::Produce => self.written,
            Port::Consume => self.freed,
        }
    }

    /// Claim the next `count` slots on `port`.
    pub fn acquire(&mut self, port: Port, count: usize) -> Result<Vec<ElementHandle>> {
        if count == 0 {
            return Err(FabricError::declaration(format!(
                "channel '{}': acquire count must be at least 1",
                self.name
            )));
        }
        if count > self.depth {
            return Err(FabricError::CapacityExceeded {
                channel: self.name.clone(),
                requested: count,
                depth: self.depth,
            });
        }
        let held = self.held(port);
        if held > 0 {
            return Err(FabricError::ReleaseMismatch {
                channel: self.name.clone(),
                port,
                message: format!("acquire({count}) while {held} slot(s) are still held"),
            });
        }
        let available = self.available(port);
        if available < count {
            return Err(FabricError::NotReady {
                channel: self.name.clone(),
                port,
                requested: count,
                available,
            });
        }

        let (start, access) = match port {
            Port::Produce => (self.written, Access::Write),
            Port::Consume => (self.freed, Access::Read),
        };
        match port {
            Port::Produce => self.producer_held = count,
            Port::Consume => self.consumer_held = count,
        }
        Ok((start..start + count as u64)
            .map(|sequence| ElementHandle {
                slot: (sequence % self.depth as u64) as usize,
                sequence,
                access,
            })
            .collect())
    }

    /// Hand the oldest `count` held slots on `port` to the opposite side.
    pub fn release(&mut self, port: Port, count: usize) -> Result<()> {
        let held = self.held(port);
        if count > held {
            return Err(FabricError::ReleaseMismatch {
                channel: self.name.clone(),
                port,
                message: format!("release({count}) but only {held} slot(s) held"),
            });
        }
        match port {
            Port::Produce => {
                self.producer_held -= count;
                self.written += count as u64;
            }
            Port::Consume => {
                self.consumer_held -= count;
                self.freed += count as u64;
            }
        }
        debug_assert!(self.producer_held + self.consumer_held <= self.depth);
        Ok(())
    }

    /// Handles currently held on `port`, oldest first.
    pub fn held_handles(&self, port: Port) -> Vec<ElementHandle> {
        let (start, access) = match port {
            Port::Produce => (self.written, Access::Write),
            Port::Consume => (self.freed, Access::Read),
        };
        (start..start + self.held(port) as u64)
            .map(|sequence| ElementHandle {
                slot: (sequence % self.depth as u64) as usize,
                sequence,
                access,
            })
            .collect()
    }
}
