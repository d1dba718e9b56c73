//! Core Tensor type

use super::{Layout, Storage};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::cpu::CpuRuntime;
use crate::runtime::Runtime;
use std::fmt;

/// N-dimensional array stored on one runtime
///
/// `Tensor` consists of:
/// - **Storage**: Reference-counted runtime memory
/// - **Layout**: Shape, strides, and offset defining the view into storage
/// - **DType**: Element type (determined at runtime)
///
/// Reshape, split, broadcast and zero-stride promotion create new tensors
/// sharing the same storage. Host arrays are `Tensor<CpuRuntime>`, see
/// [`HostArray`].
pub struct Tensor<R: Runtime> {
    storage: Storage<R>,
    layout: Layout,
}

/// Array resident in host memory
pub type HostArray = Tensor<CpuRuntime>;

impl<R: Runtime> Tensor<R> {
    /// Create a tensor from storage and layout
    pub fn from_parts(storage: Storage<R>, layout: Layout) -> Self {
        Self { storage, layout }
    }

    /// Create a tensor from a slice of data
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not equal the product of the `shape` dimensions
    /// or allocation fails. For a fallible alternative, use [`Self::try_from_slice`].
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize], client: &R::Client) -> Self {
        Self::try_from_slice(data, shape, client).expect("Tensor::from_slice failed")
    }

    /// Create a tensor from a slice of data (fallible version)
    pub fn try_from_slice<T: Element>(
        data: &[T],
        shape: &[usize],
        client: &R::Client,
    ) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }

        let storage = Storage::from_slice(data, client)?;
        Ok(Self::from_parts(storage, Layout::contiguous(shape)))
    }

    /// Create an uninitialized tensor
    ///
    /// The contents are unspecified until a kernel or copy writes them.
    pub fn try_empty(shape: &[usize], dtype: DType, client: &R::Client) -> Result<Self> {
        let len: usize = shape.iter().product();
        let storage = Storage::new(len, dtype, client)?;
        Ok(Self::from_parts(storage, Layout::contiguous(shape)))
    }

    /// Create a zero-filled tensor
    pub fn try_zeros(shape: &[usize], dtype: DType, client: &R::Client) -> Result<Self> {
        let len: usize = shape.iter().product();
        if len == 0 {
            return Self::try_empty(shape, dtype, client);
        }
        // All supported dtypes encode zero as all-zero bytes.
        let bytes = vec![0u8; len * dtype.size_in_bytes()];
        let storage = Storage::from_bytes(&bytes, dtype, client)?;
        Ok(Self::from_parts(storage, Layout::contiguous(shape)))
    }

    // ===== Accessors =====

    /// Get the storage
    #[inline]
    pub fn storage(&self) -> &Storage<R> {
        &self.storage
    }

    /// Get the layout
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Get the strides
    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.elem_count()
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Device holding the storage
    #[inline]
    pub fn device(&self) -> &R::Device {
        self.storage.device()
    }

    /// Whether the view is row-major contiguous
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Whether this is a 0-D array
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.layout.is_scalar()
    }

    /// Whether both tensors view the same allocation
    #[inline]
    pub fn shares_storage(&self, other: &Self) -> bool {
        self.storage.same_allocation(&other.storage)
    }

    /// Raw address of the first element of this view
    #[inline]
    pub fn data_ptr(&self) -> u64 {
        self.storage.ptr() + (self.layout.offset() * self.dtype().size_in_bytes()) as u64
    }

    fn with_layout(&self, layout: Layout) -> Self {
        Self {
            storage: self.storage.clone(),
            layout,
        }
    }

    // ===== Views =====

    /// Reinterpret the shape without copying
    ///
    /// Fails with `NotContiguous` if the view is strided, or `ShapeMismatch`
    /// if the element count changes.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let new_count: usize = shape.iter().product();
        if new_count != self.numel() {
            return Err(Error::shape_mismatch(shape, self.shape()));
        }
        let layout = self.layout.reshape(shape).ok_or(Error::NotContiguous)?;
        Ok(self.with_layout(layout))
    }

    /// Split a 1-D array at `at` into two views over the same storage
    pub fn split(&self, at: usize) -> Result<(Self, Self)> {
        let (head, tail) = self.layout.split(at).ok_or_else(|| {
            Error::invalid_argument(
                "at",
                format!("cannot split shape {:?} at {}", self.shape(), at),
            )
        })?;
        Ok((self.with_layout(head), self.with_layout(tail)))
    }

    /// Broadcast view to `shape` (stride 0 along stretched dimensions)
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        let layout = self
            .layout
            .broadcast_to(shape)
            .ok_or_else(|| Error::broadcast(self.shape(), shape))?;
        Ok(self.with_layout(layout))
    }

    /// View a single-element array as a 1-element, zero-stride 1-D array
    pub fn as_zero_stride_1d(&self) -> Result<Self> {
        let layout = self
            .layout
            .as_zero_stride_1d()
            .ok_or_else(|| Error::shape_mismatch(&[1], self.shape()))?;
        Ok(self.with_layout(layout))
    }

    /// Contiguous version of this view, copying only when strided
    pub fn contiguous(&self, client: &R::Client) -> Result<Self> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }

        let dtype = self.dtype();
        let out = Self::try_empty(self.shape(), dtype, client)?;
        let elem_size = dtype.size_in_bytes();
        R::copy_strided(
            self.storage.ptr(),
            self.layout.offset() * elem_size,
            out.storage.ptr(),
            self.shape(),
            self.strides(),
            elem_size,
            client,
        )?;
        Ok(out)
    }

    /// Flatten to 1-D, copying only if the view cannot be flattened in place
    pub fn ravel(&self, client: &R::Client) -> Result<Self> {
        self.contiguous(client)?.reshape(&[self.numel()])
    }

    // ===== Transfers =====

    /// Copy this array into a host buffer of the same byte size
    ///
    /// Blocks until the copy (and prior work on the stream) completes.
    pub fn copy_to_host(&self, dest: &HostArray, client: &R::Client) -> Result<()> {
        if !self.is_contiguous() {
            return Err(Error::NotContiguous);
        }
        if !dest.is_contiguous() {
            return Err(Error::NotContiguous);
        }
        let nbytes = self.numel() * self.dtype().size_in_bytes();
        let dest_bytes = dest.numel() * dest.dtype().size_in_bytes();
        if dest_bytes < nbytes {
            return Err(Error::InsufficientCapacity {
                required: self.numel(),
                available: dest.numel(),
            });
        }
        if nbytes == 0 {
            return Ok(());
        }
        // SAFETY: `dest` is contiguous host memory holding at least `nbytes`
        // bytes from its data pointer, and its storage is kept alive by `dest`.
        let dst = unsafe { std::slice::from_raw_parts_mut(dest.data_ptr() as *mut u8, nbytes) };
        R::copy_from_device(self.data_ptr(), dst, client)
    }

    /// Copy this array into a freshly allocated host array
    pub fn to_host(&self, client: &R::Client) -> Result<HostArray> {
        let src = self.contiguous(client)?;
        let host_client = CpuRuntime::default_client(&CpuRuntime::default_device());
        let dest = HostArray::try_empty(self.shape(), self.dtype(), &host_client)?;
        src.copy_to_host(&dest, client)?;
        Ok(dest)
    }

    /// Copy the elements out as a `Vec<T>` in row-major order
    pub fn try_to_vec<T: Element>(&self, client: &R::Client) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype() {
            return Err(Error::DTypeMismatch {
                lhs: T::DTYPE,
                rhs: self.dtype(),
            });
        }
        let src = self.contiguous(client)?;
        let mut result = vec![T::zeroed(); src.numel()];
        if result.is_empty() {
            return Ok(result);
        }
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut result);
        R::copy_from_device(src.data_ptr(), bytes, client)?;
        Ok(result)
    }

    /// Copy the elements out as a `Vec<T>` using the device's default stream
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the dtype or the copy fails.
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        let client = R::default_client(self.device());
        self.try_to_vec(&client).expect("Tensor::to_vec failed")
    }

    /// Extract the only element of a single-element array
    pub fn item<T: Element>(&self, client: &R::Client) -> Result<T> {
        if self.numel() != 1 {
            return Err(Error::shape_mismatch(&[1], self.shape()));
        }
        Ok(self.try_to_vec::<T>(client)?[0])
    }
}

impl HostArray {
    /// Create a host array from a slice of data
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not match `shape`.
    pub fn host<T: Element>(data: &[T], shape: &[usize]) -> Self {
        let client = CpuRuntime::default_client(&CpuRuntime::default_device());
        Self::from_slice(data, shape, &client)
    }

    /// Stage this host array onto another runtime
    ///
    /// Strided views are compacted on the host first, so only contiguous
    /// bytes cross the host/device boundary.
    pub fn to_runtime<D: Runtime>(&self, client: &D::Client) -> Result<Tensor<D>> {
        let host_client = CpuRuntime::default_client(self.device());
        let src = self.contiguous(&host_client)?;
        let nbytes = src.numel() * src.dtype().size_in_bytes();
        let storage = if nbytes == 0 {
            Storage::new(0, src.dtype(), client)?
        } else {
            // SAFETY: `src` is contiguous host memory of `nbytes` bytes from
            // its data pointer and outlives this borrow.
            let bytes =
                unsafe { std::slice::from_raw_parts(src.data_ptr() as *const u8, nbytes) };
            Storage::from_bytes(bytes, src.dtype(), client)?
        };
        Ok(Tensor::from_parts(storage, Layout::contiguous(src.shape())))
    }
}

impl<R: Runtime> Clone for Tensor<R> {
    /// Clone creates a new tensor sharing the same storage (zero-copy)
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            layout: self.layout.clone(),
        }
    }
}

impl<R: Runtime> fmt::Debug for Tensor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("runtime", &R::name())
            .field("shape", &self.shape())
            .field("strides", &self.strides())
            .field("dtype", &self.dtype())
            .finish()
    }
}

impl<R: Runtime> fmt::Display for Tensor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({:?}, dtype={})", self.shape(), self.dtype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu::CpuClient;

    fn client() -> CpuClient {
        CpuRuntime::default_client(&CpuRuntime::default_device())
    }

    #[test]
    fn test_from_slice_shape_check() {
        let c = client();
        let err = HostArray::try_from_slice(&[1.0f32, 2.0, 3.0], &[2, 2], &c).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_zeros() {
        let c = client();
        let t = HostArray::try_zeros(&[2, 3], DType::I32, &c).unwrap();
        assert_eq!(t.to_vec::<i32>(), vec![0; 6]);
    }

    #[test]
    fn test_reshape_shares_storage() {
        let a = HostArray::host(&[1i64, 2, 3, 4, 5, 6], &[2, 3]);
        let b = a.reshape(&[6]).unwrap();
        assert!(a.shares_storage(&b));
        assert_eq!(b.to_vec::<i64>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(matches!(a.reshape(&[4]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_ravel_copies_broadcast_view() {
        let c = client();
        let a = HostArray::host(&[1.0f32, 2.0, 3.0], &[3, 1]);
        let b = a.broadcast_to(&[3, 2]).unwrap();
        assert!(b.reshape(&[6]).is_err());
        let flat = b.ravel(&c).unwrap();
        assert!(!flat.shares_storage(&a));
        assert_eq!(flat.to_vec::<f32>(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_split_views_share_storage() {
        let a = HostArray::host(&[1u32, 2, 3, 4, 5], &[5]);
        let (head, tail) = a.split(4).unwrap();
        assert!(head.shares_storage(&tail));
        assert_eq!(head.to_vec::<u32>(), vec![1, 2, 3, 4]);
        assert_eq!(tail.to_vec::<u32>(), vec![5]);
    }

    #[test]
    fn test_zero_stride_promotion_of_scalar() {
        let c = client();
        let s = HostArray::host(&[7i16], &[]);
        let v = s.as_zero_stride_1d().unwrap();
        assert_eq!(v.shape(), &[1]);
        assert_eq!(v.strides(), &[0]);
        assert_eq!(v.item::<i16>(&c).unwrap(), 7);
    }

    #[test]
    fn test_to_vec_dtype_check() {
        let c = client();
        let a = HostArray::host(&[1.0f64], &[1]);
        assert!(matches!(
            a.try_to_vec::<f32>(&c),
            Err(Error::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_copy_to_host_capacity() {
        let c = client();
        let src = HostArray::host(&[1.0f32, 2.0, 3.0], &[3]);
        let small = HostArray::try_empty(&[2], DType::F32, &c).unwrap();
        assert!(matches!(
            src.copy_to_host(&small, &c),
            Err(Error::InsufficientCapacity { .. })
        ));
        let dest = HostArray::try_empty(&[3], DType::F32, &c).unwrap();
        src.copy_to_host(&dest, &c).unwrap();
        assert_eq!(dest.to_vec::<f32>(), vec![1.0, 2.0, 3.0]);
    }
}
