//! Runtime backends for kernel execution
//!
//! This module defines the `Runtime` trait and provides implementations
//! for the host (`CpuRuntime`) and, behind the `cuda` feature, NVIDIA GPUs.
//!
//! # Architecture
//!
//! ```text
//! Runtime (backend identity, memory primitives)
//! ├── Device (identifies a specific GPU/CPU)
//! └── Client (a stream: orders launches and copies, can synchronize)
//! ```
//!
//! The default client of a device plays the role of the synchronous
//! "stream 0". Work issued on one client executes in issue order.

pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

mod sync;

pub use sync::AutoSynchronize;

use crate::error::Result;

/// Core trait for compute backends
///
/// `Runtime` abstracts over different compute devices (CPU, GPU, etc.).
/// It uses static dispatch via generics for zero-cost abstraction.
/// Memory is addressed through raw `u64` pointers owned by
/// [`Storage`](crate::tensor::Storage).
///
/// # Example
///
/// ```ignore
/// use ufunc_dispatch::runtime::{Runtime, cpu::CpuRuntime};
///
/// let device = CpuRuntime::default_device();
/// let client = CpuRuntime::default_client(&device);
/// let ptr = CpuRuntime::allocate(1024, &client)?;
/// // ... use memory ...
/// CpuRuntime::deallocate(ptr, 1024, &device);
/// ```
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Device identifier type
    type Device: Device;

    /// Client (stream) for ordering operations
    type Client: RuntimeClient<Self>;

    /// Human-readable name of this runtime
    fn name() -> &'static str;

    /// Allocate device memory, ordered on `client`
    ///
    /// Returns a device pointer (u64). Zero-byte requests return 0.
    fn allocate(size_bytes: usize, client: &Self::Client) -> Result<u64>;

    /// Deallocate device memory
    fn deallocate(ptr: u64, size_bytes: usize, device: &Self::Device);

    /// Copy data from host to device
    fn copy_to_device(src: &[u8], dst: u64, client: &Self::Client) -> Result<()>;

    /// Copy data from device to host
    ///
    /// Blocks until the copy and all prior work on `client` completes.
    fn copy_from_device(src: u64, dst: &mut [u8], client: &Self::Client) -> Result<()>;

    /// Copy strided data to a contiguous buffer
    ///
    /// # Parameters
    /// - `src_handle`: Source buffer pointer
    /// - `src_byte_offset`: Byte offset into source buffer
    /// - `dst_handle`: Destination buffer pointer
    /// - `shape`: Shape of the view
    /// - `strides`: Strides of the source view (in elements, not bytes)
    /// - `elem_size`: Size of each element in bytes
    fn copy_strided(
        src_handle: u64,
        src_byte_offset: usize,
        dst_handle: u64,
        shape: &[usize],
        strides: &[isize],
        elem_size: usize,
        client: &Self::Client,
    ) -> Result<()>;

    /// Get the default device
    fn default_device() -> Self::Device;

    /// Get the default client (stream 0) for a device
    fn default_client(device: &Self::Device) -> Self::Client;
}

/// Trait for device identification
pub trait Device: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Unique identifier for this device
    fn id(&self) -> usize;

    /// Check if two devices are the same
    fn is_same(&self, other: &Self) -> bool {
        self.id() == other.id()
    }

    /// Human-readable name
    fn name(&self) -> String {
        format!("Device({})", self.id())
    }
}

/// Trait for runtime clients (streams)
pub trait RuntimeClient<R: Runtime>: Clone + Send + Sync {
    /// Get the device this client operates on
    fn device(&self) -> &R::Device;

    /// Wait for all work issued on this client to complete
    fn synchronize(&self) -> Result<()>;
}
