//! External kernel declarations.
//!
//! The fabric model never looks inside a kernel: it only knows the kernel's
//! name and argument types so calls can be checked. Implementations are bound
//! by the executor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DType, TensorType};

/// Handle to an external function declared in a [`crate::Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelId(pub(crate) usize);

impl KernelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Type of one kernel parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgType {
    /// Passed by reference: a buffer or an acquired channel element
    Tensor(TensorType),
    /// Passed by value
    Scalar(DType),
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Tensor(ty) => write!(f, "{ty}"),
            ArgType::Scalar(dtype) => write!(f, "{dtype}"),
        }
    }
}

/// `external_func(name, inputs=[...])`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFunction {
    pub name: String,
    pub inputs: Vec<ArgType>,
    /// Object file the tile binary links against, e.g. `odd_even.o`
    pub object_file: Option<String>,
}
