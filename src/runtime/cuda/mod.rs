//! CUDA runtime backend
//!
//! This module provides a CUDA implementation of the runtime traits.
//! It uses cudarc for direct GPU control. Every [`CudaClient`] is one
//! stream; [`CudaKernel`] launches compiled PTX entry points on it.
//!
//! # Feature Flag
//!
//! This module is only available when the `cuda` feature is enabled.

mod cache;
mod client;
mod device;
mod kernel;
mod runtime;

pub use client::CudaClient;
pub use device::CudaDevice;
pub use kernel::CudaKernel;
pub use runtime::{CudaRuntime, is_cuda_available};
