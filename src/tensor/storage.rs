//! Storage: runtime memory with Arc-based sharing

use crate::dtype::{DType, Element};
use crate::error::Result;
use crate::runtime::{Runtime, RuntimeClient};
use std::sync::Arc;

/// Backing memory for arrays on one runtime
///
/// Storage wraps runtime memory with reference counting, so views created by
/// reshape, split or broadcast share one buffer. Memory is returned to the
/// runtime when the last reference is dropped.
pub struct Storage<R: Runtime> {
    inner: Arc<StorageInner<R>>,
}

struct StorageInner<R: Runtime> {
    /// Raw pointer (device address, or host pointer cast to u64)
    ptr: u64,
    /// Number of elements (not bytes)
    len: usize,
    dtype: DType,
    device: R::Device,
    /// If true, we own this memory and should deallocate on drop
    owned: bool,
}

impl<R: Runtime> Storage<R> {
    /// Allocate `len` uninitialized elements of `dtype` on the client's stream
    pub fn new(len: usize, dtype: DType, client: &R::Client) -> Result<Self> {
        let size_bytes = len * dtype.size_in_bytes();
        let ptr = R::allocate(size_bytes, client)?;
        Ok(Self::wrap(ptr, len, dtype, client.device().clone(), true))
    }

    /// Allocate storage and copy `data` into it
    pub fn from_slice<T: Element>(data: &[T], client: &R::Client) -> Result<Self> {
        Self::from_bytes(bytemuck::cast_slice(data), T::DTYPE, client)
    }

    /// Allocate storage and copy raw bytes of a known dtype into it
    pub fn from_bytes(data: &[u8], dtype: DType, client: &R::Client) -> Result<Self> {
        let len = data.len() / dtype.size_in_bytes();
        let ptr = R::allocate(data.len(), client)?;
        // Wrap before copying so a failed copy still frees the allocation.
        let storage = Self::wrap(ptr, len, dtype, client.device().clone(), true);
        R::copy_to_device(data, ptr, client)?;
        Ok(storage)
    }

    /// Wrap existing runtime memory without taking ownership
    ///
    /// # Safety
    /// - `ptr` must point to valid memory of at least `len` elements of `dtype`
    /// - The memory must remain valid for the lifetime of this Storage
    pub unsafe fn from_ptr(ptr: u64, len: usize, dtype: DType, device: &R::Device) -> Self {
        Self::wrap(ptr, len, dtype, device.clone(), false)
    }

    fn wrap(ptr: u64, len: usize, dtype: DType, device: R::Device, owned: bool) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                ptr,
                len,
                dtype,
                device,
                owned,
            }),
        }
    }

    /// Get the raw pointer
    #[inline]
    pub fn ptr(&self) -> u64 {
        self.inner.ptr
    }

    /// Get the number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Check if storage is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Get the element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Get the device
    #[inline]
    pub fn device(&self) -> &R::Device {
        &self.inner.device
    }

    /// Get size in bytes
    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.inner.len * self.inner.dtype.size_in_bytes()
    }

    /// Get the reference count
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles refer to the same allocation
    #[inline]
    pub fn same_allocation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<R: Runtime> Clone for Storage<R> {
    /// Clone increments the reference count (zero-copy)
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Runtime> Drop for StorageInner<R> {
    fn drop(&mut self) {
        if self.owned && self.ptr != 0 {
            R::deallocate(
                self.ptr,
                self.len * self.dtype.size_in_bytes(),
                &self.device,
            );
        }
    }
}

impl<R: Runtime> std::fmt::Debug for Storage<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("ptr", &format!("0x{:x}", self.inner.ptr))
            .field("len", &self.inner.len)
            .field("dtype", &self.inner.dtype)
            .field("owned", &self.inner.owned)
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

// Storage tests live with the CPU runtime (they need a concrete runtime).
