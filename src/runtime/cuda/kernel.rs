//! Compiled CUDA kernels
//!
//! # Argument ABI
//!
//! A launch passes, for every input and then the output, three values:
//! the data pointer (`u64`, already offset to the first element), the
//! leading-axis stride in elements (`i64`, 0 for broadcast scalars) and
//! the number of inner elements per loop index (`u64`, 1 for 1-D arrays).
//! The element count (`u64`) follows last. Kernels must return without
//! writing for thread indices at or beyond the count.

use std::sync::Arc;

use cudarc::driver::safe::{CudaFunction, LaunchConfig};
use cudarc::driver::PushKernelArg;
use cudarc::nvrtc::Ptx;

use super::{CudaClient, CudaRuntime};
use crate::error::Result;
use crate::tensor::Tensor;
use crate::ufunc::{Autotune, Kernel, KernelArgs, LaunchGeometry};

/// A kernel function loaded from PTX
pub struct CudaKernel {
    name: String,
    function: CudaFunction,
    max_threads: u32,
    autotune: Option<Arc<dyn Autotune>>,
}

impl std::fmt::Debug for CudaKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaKernel")
            .field("name", &self.name)
            .field("max_threads", &self.max_threads)
            .finish_non_exhaustive()
    }
}

impl CudaKernel {
    /// Load `name` from a PTX module into the client's context.
    ///
    /// The thread limit is the device's `MAX_THREADS_PER_BLOCK`.
    pub fn from_ptx(client: &CudaClient, ptx: Ptx, name: &str) -> Result<Self> {
        let module = client.context.load_module(ptx)?;
        let function = module.load_function(name)?;
        let max_threads = client.device.max_threads_per_block()?;
        log::debug!("loaded CUDA kernel '{}' (max threads {})", name, max_threads);
        Ok(Self {
            name: name.to_string(),
            function,
            max_threads,
            autotune: None,
        })
    }

    /// Lower the per-kernel thread limit (register pressure etc.)
    pub fn with_max_threads(mut self, max_threads: u32) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Attach an autotuner consulted when no block-size cap is set
    pub fn with_autotune(mut self, autotune: Arc<dyn Autotune>) -> Self {
        self.autotune = Some(autotune);
        self
    }

    /// Kernel entry point name
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn abi_triple(tensor: &Tensor<CudaRuntime>) -> (u64, i64, u64) {
    let leading = tensor.strides().first().copied().unwrap_or(0) as i64;
    let inner: usize = tensor.shape().iter().skip(1).product();
    (tensor.data_ptr(), leading, inner as u64)
}

impl Kernel<CudaRuntime> for CudaKernel {
    fn max_threads_per_block(&self) -> u32 {
        self.max_threads
    }

    fn autotuner(&self) -> Option<&dyn Autotune> {
        self.autotune.as_deref()
    }

    fn launch(
        &self,
        geometry: LaunchGeometry,
        client: &CudaClient,
        args: &KernelArgs<'_, CudaRuntime>,
    ) -> Result<()> {
        let triples: Vec<(u64, i64, u64)> = args
            .inputs
            .iter()
            .chain(std::iter::once(args.output))
            .map(abi_triple)
            .collect();
        let count = args.count as u64;

        let cfg = LaunchConfig {
            grid_dim: (geometry.blocks, 1, 1),
            block_dim: (geometry.threads_per_block, 1, 1),
            shared_mem_bytes: 0,
        };

        log::trace!(
            "launch {} blocks={} tpb={} count={}",
            self.name,
            geometry.blocks,
            geometry.threads_per_block,
            count
        );

        let mut builder = client.stream.launch_builder(&self.function);
        for (ptr, stride, inner) in &triples {
            builder.arg(ptr);
            builder.arg(stride);
            builder.arg(inner);
        }
        builder.arg(&count);

        // SAFETY: argument layout follows the module-level ABI; the caller
        // validated that every array covers `count` loop indices.
        unsafe { builder.launch(cfg) }?;
        Ok(())
    }
}
