//! # ufunc-dispatch
//!
//! **Elementwise and generalized ufunc dispatch onto host and accelerator runtimes.**
//!
//! ufunc-dispatch sits between an array-level call and a compiled kernel. Given a
//! table of kernels keyed by input dtypes, it picks the kernel, reconciles shapes
//! (broadcasting, or symbolic gufunc signatures), sizes the launch grid under a
//! hardware or configured thread limit, and moves data between host and device.
//!
//! ## Features
//!
//! - **Elementwise dispatch**: broadcasting on host inputs, 1-D launches on device inputs
//! - **Generalized dispatch**: `(i,j),(j,k)->(i,k)` style signatures with loop dimensions
//! - **Tree reduction**: device-side pairwise reduction for binary associative kernels
//! - **Launch planning**: thread ceilings with per-dispatcher caps and autotuning
//! - **Residency rule**: host and device arrays are never mixed in one call
//!
//! ## Quick Start
//!
//! ```rust
//! use ufunc_dispatch::prelude::*;
//!
//! # fn main() -> ufunc_dispatch::error::Result<()> {
//! let table = KernelTable::new(2).register(
//!     &[DType::F32, DType::F32],
//!     DType::F32,
//!     CpuKernel::binary(|a: f32, b: f32| a + b),
//! )?;
//! let add = UFuncDispatcher::<CpuRuntime>::new(table);
//!
//! let a = HostArray::host(&[1.0f32, 2.0, 3.0], &[3, 1]);
//! let b = HostArray::host(&[10.0f32, 20.0], &[1, 2]);
//! let c = add
//!     .call(&[Operand::host(a), Operand::host(b)], CallOptions::new())?
//!     .into_host()?;
//! assert_eq!(c.shape(), &[3, 2]);
//! assert_eq!(c.to_vec::<f32>(), vec![11.0, 21.0, 12.0, 22.0, 13.0, 23.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): run emulated kernel blocks in parallel on the host
//! - `f16`: Half-precision floats (F16, BF16)
//! - `cuda`: NVIDIA CUDA backend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dtype;
pub mod error;
pub mod runtime;
pub mod tensor;
pub mod ufunc;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dtype::{DType, Element};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::runtime::cpu::{CpuKernel, CpuRuntime};
    pub use crate::runtime::{Device, Runtime, RuntimeClient};
    pub use crate::tensor::{HostArray, Layout, Tensor};
    pub use crate::ufunc::{
        Array, CallOptions, GUFuncDispatcher, GeneralizedUFunc, Kernel, KernelTable, Operand,
        Scalar, Signature, SignatureEngine, UFuncDispatcher,
    };

    #[cfg(feature = "cuda")]
    pub use crate::runtime::cuda::{CudaKernel, CudaRuntime};
}
