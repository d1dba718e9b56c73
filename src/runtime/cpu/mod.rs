//! CPU runtime implementation
//!
//! The CPU runtime uses standard heap allocation. It stores every host
//! array and also serves as a host-emulated accelerator: [`CpuKernel`]
//! honours launch geometry exactly like a device kernel, so the dispatch
//! layer can be exercised end to end without a GPU.

mod client;
mod device;
mod kernel;
mod runtime;

pub use client::CpuClient;
pub use device::CpuDevice;
pub use kernel::{CpuKernel, DEFAULT_MAX_THREADS, InnerView, InnerViewMut};
pub use runtime::CpuRuntime;
