//! Compiled-kernel abstraction and the dtype-keyed kernel table

use super::geometry::LaunchGeometry;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Arguments passed to every kernel launch
///
/// Elementwise kernels see 1-D inputs (stride 0 for broadcast operands)
/// and `count` elements. Generalized kernels see inputs and output with a
/// single leading loop axis of length `count`.
pub struct KernelArgs<'a, R: Runtime> {
    /// Input arrays, in signature order
    pub inputs: &'a [Tensor<R>],
    /// Output array
    pub output: &'a Tensor<R>,
    /// Number of elements (or loop iterations) to compute
    pub count: usize,
}

/// Autotuning oracle attached to a compiled kernel
pub trait Autotune: Send + Sync {
    /// Best threads-per-block for the kernel, or 0 if no configuration fits
    fn best(&self) -> u32;
}

/// A compiled, launchable kernel for one concrete dtype combination
///
/// Implementations wrap a backend function handle. The dispatch layer only
/// decides geometry and arguments; code generation happens elsewhere.
pub trait Kernel<R: Runtime>: Send + Sync {
    /// Hardware limit on threads per block for the kernel's device
    fn max_threads_per_block(&self) -> u32;

    /// Autotuning oracle, if the kernel was compiled with one
    fn autotuner(&self) -> Option<&dyn Autotune> {
        None
    }

    /// Launch on `client` with the given grid
    ///
    /// Launches are asynchronous with respect to the host; ordering is
    /// only guaranteed against other work on the same client.
    fn launch(
        &self,
        geometry: LaunchGeometry,
        client: &R::Client,
        args: &KernelArgs<'_, R>,
    ) -> Result<()>;
}

/// Mapping from input dtypes to (result dtype, kernel)
///
/// Built once and owned by a dispatcher. Every key has the same arity.
pub struct KernelTable<R: Runtime> {
    entries: HashMap<Vec<DType>, (DType, Arc<dyn Kernel<R>>)>,
    nin: usize,
}

impl<R: Runtime> KernelTable<R> {
    /// Create an empty table for kernels taking `nin` inputs
    pub fn new(nin: usize) -> Self {
        Self {
            entries: HashMap::new(),
            nin,
        }
    }

    /// Register a kernel for `inputs`, producing `output`
    pub fn register(
        mut self,
        inputs: &[DType],
        output: DType,
        kernel: impl Kernel<R> + 'static,
    ) -> Result<Self> {
        self.insert(inputs, output, Arc::new(kernel))?;
        Ok(self)
    }

    /// Register a shared kernel handle for `inputs`, producing `output`
    pub fn insert(
        &mut self,
        inputs: &[DType],
        output: DType,
        kernel: Arc<dyn Kernel<R>>,
    ) -> Result<()> {
        if inputs.len() != self.nin {
            return Err(Error::invalid_argument(
                "inputs",
                format!(
                    "kernel takes {} inputs, table arity is {}",
                    inputs.len(),
                    self.nin
                ),
            ));
        }
        self.entries.insert(inputs.to_vec(), (output, kernel));
        Ok(())
    }

    /// Number of inputs every kernel takes
    pub fn nin(&self) -> usize {
        self.nin
    }

    /// Number of registered dtype combinations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no kernels are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the kernel for a tuple of input dtypes
    pub fn lookup(&self, dtypes: &[DType]) -> Result<(DType, &Arc<dyn Kernel<R>>)> {
        self.entries
            .get(dtypes)
            .map(|(out, kernel)| (*out, kernel))
            .ok_or_else(|| Error::unsupported_dtypes(dtypes))
    }
}

impl<R: Runtime> fmt::Debug for KernelTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.iter().map(|(k, (o, _))| (k, o)).collect();
        keys.sort();
        f.debug_struct("KernelTable")
            .field("nin", &self.nin)
            .field("entries", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::cpu::{CpuKernel, CpuRuntime};

    fn add_table() -> KernelTable<CpuRuntime> {
        KernelTable::new(2)
            .register(
                &[DType::F32, DType::F32],
                DType::F32,
                CpuKernel::binary(|a: f32, b: f32| a + b),
            )
            .unwrap()
    }

    #[test]
    fn test_lookup_hit() {
        let table = add_table();
        let (out, _) = table.lookup(&[DType::F32, DType::F32]).unwrap();
        assert_eq!(out, DType::F32);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lookup_miss_names_dtypes() {
        let table = add_table();
        let err = table.lookup(&[DType::I32, DType::I32]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert!(err.to_string().contains("(i32, i32)"));
    }

    #[test]
    fn test_register_rejects_wrong_arity() {
        let err = KernelTable::<CpuRuntime>::new(2)
            .register(&[DType::F32], DType::F32, CpuKernel::unary(|a: f32| -a))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
