//! Ufunc dispatch
//!
//! This module turns a call on arrays into a kernel launch:
//!
//! ```text
//! call(operands, options)
//! ├── transfer::classify      all-host or all-device, never mixed
//! ├── KernelTable::lookup     input dtypes -> (result dtype, kernel)
//! ├── geometry::thread_ceiling / plan
//! ├── DispatchStrategy        broadcasting (ufunc) or signature (gufunc)
//! ├── Kernel::launch
//! └── transfer::to_host       host calls only
//! ```
//!
//! [`UFuncDispatcher::reduce`] builds a device-side tree reduction on top
//! of the elementwise path, and [`GeneralizedUFunc`] dispatches gufuncs
//! whose shapes come from a [`ScheduleEngine`].

mod array;
mod dispatcher;
pub mod geometry;
mod gufunc;
mod kernel;
mod options;
mod reduce;
mod schedule;
pub mod shape;
mod signature;
mod strategy;
pub mod transfer;

pub use array::{Array, Operand, Residency, Scalar};
pub use dispatcher::{Dispatcher, GUFuncDispatcher, UFuncDispatcher};
pub use geometry::{DEFAULT_MAX_BLOCKSIZE, LaunchGeometry};
pub use gufunc::GeneralizedUFunc;
pub use kernel::{Autotune, Kernel, KernelArgs, KernelTable};
pub use options::{CallOptions, OptionValue};
pub use schedule::{Schedule, ScheduleEngine, SignatureEngine};
pub use signature::{Signature, Template};
pub use strategy::{DispatchStrategy, Elementwise, Generalized};
