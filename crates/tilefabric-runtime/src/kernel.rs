//! Host implementations of externally declared kernels.
//!
//! A declared [`tilefabric_core::ExternalFunction`] only carries a name and
//! an argument signature. Before a run the caller registers an
//! implementation under the same name:
//!
//! ```rust
//! use tilefabric_runtime::{KernelArgs, KernelError, KernelRegistry};
//!
//! let mut kernels = KernelRegistry::<i32>::new();
//! kernels.register("vector_plus_one", |args: &mut KernelArgs<i32>| -> Result<(), KernelError> {
//!     let len = args.scalar(2)?.as_i64() as usize;
//!     let input = args.tensor(0)?[..len].to_vec();
//!     for (out, value) in args.tensor_mut(1)?.iter_mut().zip(input) {
//!         *out = value + 1;
//!     }
//!     Ok(())
//! });
//! assert!(kernels.contains("vector_plus_one"));
//! ```
//!
//! Arguments are copied in before the call and written back afterwards.
//! Write-back only reaches buffers and Produce-side elements.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tilefabric_core::Scalar;

use crate::element::Element;

/// Failure reported by a kernel implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("argument {0} is missing")]
    MissingArgument(usize),

    #[error("argument {0} is not a tensor")]
    NotTensor(usize),

    #[error("argument {0} is not a scalar")]
    NotScalar(usize),

    #[error("{0}")]
    Failed(String),
}

/// One argument as a kernel sees it
#[derive(Debug, Clone, PartialEq)]
pub enum KernelValue<T> {
    Tensor(Vec<T>),
    Scalar(Scalar),
}

/// The argument list of one call, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct KernelArgs<T> {
    values: Vec<KernelValue<T>>,
}

impl<T: Element> KernelArgs<T> {
    pub fn new(values: Vec<KernelValue<T>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn tensor(&self, index: usize) -> Result<&[T], KernelError> {
        match self.values.get(index) {
            Some(KernelValue::Tensor(data)) => Ok(data),
            Some(KernelValue::Scalar(_)) => Err(KernelError::NotTensor(index)),
            None => Err(KernelError::MissingArgument(index)),
        }
    }

    pub fn tensor_mut(&mut self, index: usize) -> Result<&mut [T], KernelError> {
        match self.values.get_mut(index) {
            Some(KernelValue::Tensor(data)) => Ok(data),
            Some(KernelValue::Scalar(_)) => Err(KernelError::NotTensor(index)),
            None => Err(KernelError::MissingArgument(index)),
        }
    }

    pub fn scalar(&self, index: usize) -> Result<Scalar, KernelError> {
        match self.values.get(index) {
            Some(KernelValue::Scalar(value)) => Ok(*value),
            Some(KernelValue::Tensor(_)) => Err(KernelError::NotScalar(index)),
            None => Err(KernelError::MissingArgument(index)),
        }
    }

    pub(crate) fn into_values(self) -> Vec<KernelValue<T>> {
        self.values
    }
}

/// A host implementation of an external kernel
pub trait Kernel<T: Element>: Send + Sync {
    fn invoke(&self, args: &mut KernelArgs<T>) -> Result<(), KernelError>;
}

impl<T, F> Kernel<T> for F
where
    T: Element,
    F: Fn(&mut KernelArgs<T>) -> Result<(), KernelError> + Send + Sync,
{
    fn invoke(&self, args: &mut KernelArgs<T>) -> Result<(), KernelError> {
        self(args)
    }
}

/// Kernel implementations by declared name
pub struct KernelRegistry<T: Element> {
    kernels: HashMap<String, Arc<dyn Kernel<T>>>,
}

impl<T: Element> KernelRegistry<T> {
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    /// Register `kernel` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, kernel: impl Kernel<T> + 'static) -> &mut Self {
        self.kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Kernel<T>>> {
        self.kernels.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl<T: Element> Default for KernelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> fmt::Debug for KernelRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.kernels.keys().collect();
        names.sort();
        f.debug_struct("KernelRegistry").field("kernels", &names).finish()
    }
}
