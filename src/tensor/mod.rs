//! Array types
//!
//! This module provides the `Tensor` type, an n-dimensional view over
//! runtime memory, together with its layout and reference-counted storage.

mod core;
mod layout;
mod storage;

pub use core::{HostArray, Tensor};
pub use layout::{Layout, Shape, Strides};
pub use storage::Storage;
