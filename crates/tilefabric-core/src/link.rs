//! Pass-through links between two channels sharing a tile

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// Handle to a link declared in a [`crate::Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub(crate) usize);

impl LinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// `upstream`'s consumer tile forwards every element, in order, into
/// `downstream`'s producer side without running a program step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub upstream: ChannelId,
    pub downstream: ChannelId,
}
