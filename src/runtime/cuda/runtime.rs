//! CUDA runtime implementation

use super::cache::{
    get_or_create_client, is_cuda_context_valid, log_cuda_memory_error, try_get_cached_stream,
};
use super::client::CudaClient;
use super::device::CudaDevice;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::runtime::cpu::CpuRuntime;
use crate::tensor::Layout;

/// CUDA Runtime adapter
///
/// Implements the generic Runtime trait for CUDA backend.
/// Uses cudarc for direct GPU control.
#[derive(Clone, Debug, Default)]
pub struct CudaRuntime;

impl Runtime for CudaRuntime {
    type Device = CudaDevice;
    type Client = CudaClient;

    fn name() -> &'static str {
        "cuda"
    }

    /// Allocate GPU memory, stream-ordered on `client`.
    ///
    /// Returns `Err(OutOfMemory)` if CUDA memory allocation fails.
    fn allocate(size_bytes: usize, client: &Self::Client) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }

        unsafe {
            let mut ptr: u64 = 0;
            let result = cudarc::driver::sys::cuMemAllocAsync(
                &mut ptr,
                size_bytes,
                client.stream.cu_stream(),
            );

            if result == cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Ok(ptr);
            }

            // First attempt failed - sync the stream to flush pending frees
            client.stream.synchronize()?;

            let result = cudarc::driver::sys::cuMemAllocAsync(
                &mut ptr,
                size_bytes,
                client.stream.cu_stream(),
            );

            if result == cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Ok(ptr);
            }
        }

        Err(Error::OutOfMemory { size: size_bytes })
    }

    fn deallocate(ptr: u64, _size_bytes: usize, device: &Self::Device) {
        if ptr == 0 {
            return;
        }

        unsafe {
            // Context is gone - memory will be reclaimed by driver on context destruction
            if !is_cuda_context_valid() {
                return;
            }

            let result = if let Some(stream) = try_get_cached_stream(device.index) {
                cudarc::driver::sys::cuMemFreeAsync(ptr, stream)
            } else {
                cudarc::driver::sys::cuMemFree_v2(ptr)
            };

            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS
                && result != cudarc::driver::sys::CUresult::CUDA_ERROR_ILLEGAL_ADDRESS
            {
                log_cuda_memory_error("cuMemFree", ptr, result);
            }
        }
    }

    /// Copy data from host to device.
    ///
    /// The source slice is only borrowed for this call, so the copy is
    /// completed before returning.
    fn copy_to_device(src: &[u8], dst: u64, client: &Self::Client) -> Result<()> {
        if src.is_empty() || dst == 0 {
            return Ok(());
        }

        unsafe {
            let result = cudarc::driver::sys::cuMemcpyHtoDAsync_v2(
                dst,
                src.as_ptr() as *const std::ffi::c_void,
                src.len(),
                client.stream.cu_stream(),
            );

            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Backend(format!(
                    "CUDA host-to-device copy failed: {} bytes ({:?})",
                    src.len(),
                    result
                )));
            }
        }

        client.stream.synchronize()?;
        Ok(())
    }

    fn copy_from_device(src: u64, dst: &mut [u8], client: &Self::Client) -> Result<()> {
        if dst.is_empty() || src == 0 {
            return Ok(());
        }

        unsafe {
            let result = cudarc::driver::sys::cuMemcpyDtoHAsync_v2(
                dst.as_mut_ptr() as *mut std::ffi::c_void,
                src,
                dst.len(),
                client.stream.cu_stream(),
            );

            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Backend(format!(
                    "CUDA device-to-host copy failed: {} bytes ({:?})",
                    dst.len(),
                    result
                )));
            }
        }

        client.stream.synchronize()?;
        Ok(())
    }

    /// Compact a strided view through a host staging buffer.
    ///
    /// Only non-negative strides are supported.
    fn copy_strided(
        src_handle: u64,
        src_byte_offset: usize,
        dst_handle: u64,
        shape: &[usize],
        strides: &[isize],
        elem_size: usize,
        client: &Self::Client,
    ) -> Result<()> {
        if src_handle == 0 || dst_handle == 0 {
            return Ok(());
        }

        let numel: usize = shape.iter().product();
        if numel == 0 {
            return Ok(());
        }

        if strides.iter().any(|&s| s < 0) {
            return Err(Error::Backend(
                "CUDA strided copy requires non-negative strides".to_string(),
            ));
        }
        let window_layout = Layout::new(shape.into(), strides.into(), 0);
        let extent = window_layout.storage_extent() * elem_size;

        let mut window = vec![0u8; extent];
        Self::copy_from_device(src_handle + src_byte_offset as u64, &mut window, client)?;

        let mut packed = vec![0u8; numel * elem_size];
        let host = CpuRuntime::default_client(&CpuRuntime::default_device());
        CpuRuntime::copy_strided(
            window.as_ptr() as u64,
            0,
            packed.as_mut_ptr() as u64,
            shape,
            strides,
            elem_size,
            &host,
        )?;

        Self::copy_to_device(&packed, dst_handle, client)
    }

    fn default_device() -> Self::Device {
        CudaDevice::new(0)
    }

    /// # Panics
    ///
    /// Panics if the CUDA context for `device` cannot be created.
    fn default_client(device: &Self::Device) -> Self::Client {
        get_or_create_client(device).unwrap_or_else(|e| {
            panic!("failed to create CUDA client for device {}: {}", device.index, e)
        })
    }
}

/// Check if CUDA is available on this system.
///
/// Returns `true` if at least one CUDA device can be initialized.
pub fn is_cuda_available() -> bool {
    std::panic::catch_unwind(|| CudaClient::new(CudaDevice::new(0)).is_ok()).unwrap_or(false)
}
