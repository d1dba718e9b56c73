//! Host/device staging and the residency rule

use super::array::{Operand, Residency};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::runtime::cpu::{CpuClient, CpuRuntime};
use crate::tensor::{HostArray, Tensor};

/// Decide the residency class of a call
///
/// Either every array argument is on the device or none is. Scalars do
/// not count toward either side; a call of only scalars runs on the host.
pub fn classify<R: Runtime>(operands: &[Operand<R>]) -> Result<Residency> {
    let mut host = false;
    let mut device = false;
    for op in operands {
        match op.residency() {
            Some(Residency::Host) => host = true,
            Some(Residency::Device) => device = true,
            None => {}
        }
    }
    match (host, device) {
        (true, true) => Err(Error::MixedResidency),
        (_, true) => Ok(Residency::Device),
        _ => Ok(Residency::Host),
    }
}

/// Stage a host array onto the device, in contiguous form
pub fn to_device<R: Runtime>(host: &HostArray, client: &R::Client) -> Result<Tensor<R>> {
    let staged = host.to_runtime::<R>(client)?;
    log::trace!(
        "staged {:?} {} to {}",
        host.shape(),
        host.dtype(),
        R::name()
    );
    Ok(staged)
}

/// Copy a device array back into `dest`, or into a new host array
///
/// Blocks until the copy and all prior work on `client` completes.
pub fn to_host<R: Runtime>(
    device: &Tensor<R>,
    dest: Option<&HostArray>,
    client: &R::Client,
) -> Result<HostArray> {
    match dest {
        Some(dest) => {
            device.copy_to_host(dest, client)?;
            Ok(dest.clone())
        }
        None => device.to_host(client),
    }
}

/// Host client used for host-side temporaries
pub(crate) fn host_client() -> CpuClient {
    CpuRuntime::default_client(&CpuRuntime::default_device())
}

/// Materialize an operand of a device-class call on the device
pub(crate) fn device_operand<R: Runtime>(op: &Operand<R>, client: &R::Client) -> Result<Tensor<R>> {
    match op {
        Operand::Array(a) => a.as_device().cloned().ok_or(Error::MixedResidency),
        Operand::Scalar(s) => s.to_tensor::<R>(client),
    }
}

/// Materialize an operand of a host-class call on the host
pub(crate) fn host_operand<R: Runtime>(op: &Operand<R>, client: &CpuClient) -> Result<HostArray> {
    match op {
        Operand::Array(a) => a.as_host().cloned().ok_or(Error::MixedResidency),
        Operand::Scalar(s) => s.to_tensor::<CpuRuntime>(client),
    }
}
