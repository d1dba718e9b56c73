//! CPU runtime implementation

use super::client::CpuClient;
use super::device::CpuDevice;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use std::alloc::{Layout as AllocLayout, alloc_zeroed, dealloc};

const ALIGN: usize = 64;

/// CPU compute runtime
///
/// This is the default runtime that works on any platform. Memory is
/// allocated on the heap using the system allocator. It backs every host
/// array and doubles as an emulated accelerator for [`CpuKernel`](super::CpuKernel).
#[derive(Clone, Debug, Default)]
pub struct CpuRuntime;

impl Runtime for CpuRuntime {
    type Device = CpuDevice;
    type Client = CpuClient;

    fn name() -> &'static str {
        "cpu"
    }

    fn allocate(size_bytes: usize, client: &Self::Client) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }

        // Use aligned allocation for SIMD compatibility
        let layout = AllocLayout::from_size_align(size_bytes, ALIGN)
            .map_err(|_| Error::OutOfMemory { size: size_bytes })?;

        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::OutOfMemory { size: size_bytes });
        }

        client.record_allocation(size_bytes);
        Ok(ptr as u64)
    }

    fn deallocate(ptr: u64, size_bytes: usize, _device: &Self::Device) {
        if ptr == 0 || size_bytes == 0 {
            return;
        }

        let Ok(layout) = AllocLayout::from_size_align(size_bytes, ALIGN) else {
            log::warn!("cpu: invalid layout while freeing {} bytes", size_bytes);
            return;
        };

        unsafe {
            dealloc(ptr as *mut u8, layout);
        }
    }

    fn copy_to_device(src: &[u8], dst: u64, _client: &Self::Client) -> Result<()> {
        if src.is_empty() || dst == 0 {
            return Ok(());
        }

        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
        }
        Ok(())
    }

    fn copy_from_device(src: u64, dst: &mut [u8], _client: &Self::Client) -> Result<()> {
        if dst.is_empty() || src == 0 {
            return Ok(());
        }

        unsafe {
            // Use copy (not copy_nonoverlapping): host-to-host copies may alias
            std::ptr::copy(src as *const u8, dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn copy_strided(
        src_handle: u64,
        src_byte_offset: usize,
        dst_handle: u64,
        shape: &[usize],
        strides: &[isize],
        elem_size: usize,
        _client: &Self::Client,
    ) -> Result<()> {
        if src_handle == 0 || dst_handle == 0 {
            return Ok(());
        }

        let numel: usize = shape.iter().product();
        if numel == 0 {
            return Ok(());
        }

        let src_base = (src_handle as usize + src_byte_offset) as *const u8;
        let dst_base = dst_handle as *mut u8;

        // Iterate over all elements using indices
        let mut indices = vec![0usize; shape.len()];

        for dst_offset in 0..numel {
            let mut src_elem_offset: isize = 0;
            for (i, &idx) in indices.iter().enumerate() {
                src_elem_offset += (idx as isize) * strides[i];
            }

            unsafe {
                std::ptr::copy_nonoverlapping(
                    src_base.offset(src_elem_offset * elem_size as isize),
                    dst_base.add(dst_offset * elem_size),
                    elem_size,
                );
            }

            // Increment indices (row-major order)
            for dim in (0..shape.len()).rev() {
                indices[dim] += 1;
                if indices[dim] < shape[dim] {
                    break;
                }
                indices[dim] = 0;
            }
        }
        Ok(())
    }

    fn default_device() -> Self::Device {
        CpuDevice::new()
    }

    fn default_client(device: &Self::Device) -> Self::Client {
        CpuClient::new(device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeClient;

    #[test]
    fn test_allocation_is_counted_and_zeroed() {
        let client = CpuRuntime::default_client(&CpuRuntime::default_device());
        let ptr = CpuRuntime::allocate(16, &client).unwrap();
        let mut back = [1u8; 16];
        CpuRuntime::copy_from_device(ptr, &mut back, &client).unwrap();
        assert_eq!(back, [0u8; 16]);
        assert_eq!(client.allocations(), 1);
        assert_eq!(client.bytes_allocated(), 16);
        CpuRuntime::deallocate(ptr, 16, client.device());
    }

    #[test]
    fn test_zero_byte_allocation() {
        let client = CpuRuntime::default_client(&CpuRuntime::default_device());
        assert_eq!(CpuRuntime::allocate(0, &client).unwrap(), 0);
        assert_eq!(client.allocations(), 0);
    }

    #[test]
    fn test_copy_strided_transposes() {
        let client = CpuRuntime::default_client(&CpuRuntime::default_device());
        let src: [i32; 6] = [1, 2, 3, 4, 5, 6];
        let mut dst = [0i32; 6];
        // View of a 2x3 row-major buffer as its 3x2 transpose
        CpuRuntime::copy_strided(
            src.as_ptr() as u64,
            0,
            dst.as_mut_ptr() as u64,
            &[3, 2],
            &[1, 3],
            4,
            &client,
        )
        .unwrap();
        assert_eq!(dst, [1, 4, 2, 5, 3, 6]);
    }
}
