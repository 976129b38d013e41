//! Host-side tensors bound to the host arguments of a runtime sequence

use std::ops::Index;

use tilefabric_core::TensorType;

use crate::element::Element;
use crate::error::{Result, RuntimeError};

/// Flat row-major host memory for one host argument
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor<T> {
    data: Vec<T>,
}

impl<T: Element> HostTensor<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }

    /// Zero-filled tensor, typically an output
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![T::default(); len],
        }
    }

    pub fn from_fn(len: usize, f: impl FnMut(usize) -> T) -> Self {
        Self {
            data: (0..len).map(f).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Check this tensor can back a host argument of type `ty`.
    pub(crate) fn check_binding(&self, arg: usize, ty: &TensorType) -> Result<()> {
        if ty.dtype != T::DTYPE {
            return Err(RuntimeError::HostData(format!(
                "host argument {arg} is {ty} but the run uses {}",
                T::DTYPE
            )));
        }
        if self.data.len() != ty.num_elements() {
            return Err(RuntimeError::HostData(format!(
                "host argument {arg} is {ty} ({} elements) but {} were supplied",
                ty.num_elements(),
                self.data.len()
            )));
        }
        Ok(())
    }
}

impl<T> Index<usize> for HostTensor<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.data[index]
    }
}

impl<T: Element> From<Vec<T>> for HostTensor<T> {
    fn from(data: Vec<T>) -> Self {
        Self::new(data)
    }
}
