//! Common test utilities
#![allow(dead_code)]

use ufunc_dispatch::prelude::*;
use ufunc_dispatch::runtime::cpu::{CpuClient, CpuDevice};

/// Create a CPU client and device for testing
///
/// Each call returns a client with its own allocation and launch counters.
pub fn create_cpu_client() -> (CpuClient, CpuDevice) {
    let device = CpuDevice::new();
    let client = CpuRuntime::default_client(&device);
    (client, device)
}

/// Binary `a + b` over f32, f64 and i32
pub fn add_table() -> KernelTable<CpuRuntime> {
    KernelTable::new(2)
        .register(
            &[DType::F32, DType::F32],
            DType::F32,
            CpuKernel::binary(|a: f32, b: f32| a + b),
        )
        .unwrap()
        .register(
            &[DType::F64, DType::F64],
            DType::F64,
            CpuKernel::binary(|a: f64, b: f64| a + b),
        )
        .unwrap()
        .register(
            &[DType::I32, DType::I32],
            DType::I32,
            CpuKernel::binary(|a: i32, b: i32| a + b),
        )
        .unwrap()
}

/// Elementwise add dispatcher on the CPU runtime
pub fn add_ufunc() -> UFuncDispatcher<CpuRuntime> {
    UFuncDispatcher::new(add_table())
}

/// Assert two f64 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// Create a CUDA client and device, returning None if CUDA is unavailable
#[cfg(feature = "cuda")]
pub fn create_cuda_client() -> Option<(
    ufunc_dispatch::runtime::cuda::CudaClient,
    ufunc_dispatch::runtime::cuda::CudaDevice,
)> {
    use ufunc_dispatch::runtime::cuda::{CudaDevice, CudaRuntime, is_cuda_available};

    if !is_cuda_available() {
        return None;
    }
    let init = std::panic::catch_unwind(|| {
        let device = CudaDevice::new(0);
        let client = CudaRuntime::default_client(&device);
        (client, device)
    });
    init.ok()
}
