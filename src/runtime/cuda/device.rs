//! CUDA Device implementation

use crate::error::{Error, Result};
use crate::runtime::Device;

/// CUDA Device using cudarc
///
/// Represents a single GPU by ordinal. Contexts and streams live in
/// [`CudaClient`](super::CudaClient).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CudaDevice {
    /// Index of the GPU device (0, 1, 2, ...)
    pub(crate) index: usize,
}

impl CudaDevice {
    /// Create a new CUDA device
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    /// Device ordinal
    pub fn index(&self) -> usize {
        self.index
    }

    fn attribute(&self, attrib: cudarc::driver::sys::CUdevice_attribute) -> Result<i32> {
        let device = cudarc::driver::result::device::get(self.index as i32)?;
        let value = unsafe { cudarc::driver::result::device::get_attribute(device, attrib) }?;
        Ok(value)
    }

    /// Hardware limit on threads per block
    pub fn max_threads_per_block(&self) -> Result<u32> {
        let value = self.attribute(
            cudarc::driver::sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
        )?;
        u32::try_from(value).map_err(|_| {
            Error::Backend(format!(
                "device {} reported invalid MAX_THREADS_PER_BLOCK {}",
                self.index, value
            ))
        })
    }

    /// Get the compute capability of this CUDA device
    ///
    /// Returns (major, minor) version numbers (e.g., (8, 6) for sm_86 / RTX 3090)
    pub fn compute_capability(&self) -> Result<(u32, u32)> {
        let major = self.attribute(
            cudarc::driver::sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
        )?;
        let minor = self.attribute(
            cudarc::driver::sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
        )?;
        Ok((major as u32, minor as u32))
    }
}

impl Device for CudaDevice {
    fn id(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        format!("cuda:{}", self.index)
    }
}

impl Default for CudaDevice {
    fn default() -> Self {
        Self::new(0)
    }
}
