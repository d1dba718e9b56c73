//! Call orchestration shared by elementwise and generalized dispatch

use super::array::{Array, Operand, Residency};
use super::geometry::{DEFAULT_MAX_BLOCKSIZE, LaunchGeometry, plan, thread_ceiling};
use super::kernel::{Kernel, KernelArgs, KernelTable};
use super::options::CallOptions;
use super::signature::Signature;
use super::strategy::{DispatchStrategy, Elementwise, Generalized};
use super::transfer;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::runtime::cpu::CpuRuntime;
use crate::tensor::{HostArray, Tensor};
use std::sync::Arc;

/// Dispatches calls onto the kernels of one [`KernelTable`]
///
/// The shape policy `S` is fixed at construction: [`Elementwise`] for
/// plain ufuncs, [`Generalized`] for signature-driven gufuncs.
pub struct Dispatcher<R: Runtime, S: DispatchStrategy> {
    table: KernelTable<R>,
    strategy: S,
    device: R::Device,
    max_blocksize: Option<u32>,
}

/// Elementwise ufunc dispatcher
pub type UFuncDispatcher<R> = Dispatcher<R, Elementwise>;

/// Generalized ufunc dispatcher with a signature-solved output shape
pub type GUFuncDispatcher<R> = Dispatcher<R, Generalized>;

impl<R: Runtime> UFuncDispatcher<R> {
    /// Dispatcher for `table` on the runtime's default device
    pub fn new(table: KernelTable<R>) -> Self {
        Self::on_device(table, Elementwise, R::default_device())
    }
}

impl<R: Runtime> GUFuncDispatcher<R> {
    /// Dispatcher for `table` under `signature` on the default device
    ///
    /// The signature must have one output and as many inputs as the table.
    pub fn new(table: KernelTable<R>, signature: Signature) -> Result<Self> {
        if signature.nin() != table.nin() {
            return Err(Error::invalid_argument(
                "signature",
                format!(
                    "signature has {} inputs, kernels take {}",
                    signature.nin(),
                    table.nin()
                ),
            ));
        }
        if signature.nout() != 1 {
            return Err(Error::invalid_argument(
                "signature",
                "only a single output is supported",
            ));
        }
        Ok(Self::on_device(
            table,
            Generalized::new(signature),
            R::default_device(),
        ))
    }
}

impl<R: Runtime, S: DispatchStrategy> Dispatcher<R, S> {
    /// Dispatcher with an explicit strategy and target device
    pub fn on_device(table: KernelTable<R>, strategy: S, device: R::Device) -> Self {
        Self {
            table,
            strategy,
            device,
            max_blocksize: None,
        }
    }

    /// Cap threads per block for every call
    pub fn with_max_blocksize(mut self, max_blocksize: u32) -> Self {
        self.max_blocksize = Some(max_blocksize);
        self
    }

    /// Current thread-per-block cap
    pub fn max_blocksize(&self) -> u32 {
        self.max_blocksize.unwrap_or(DEFAULT_MAX_BLOCKSIZE)
    }

    /// Set the thread-per-block cap
    pub fn set_max_blocksize(&mut self, max_blocksize: u32) {
        self.max_blocksize = Some(max_blocksize);
    }

    /// Remove the thread-per-block cap
    pub fn clear_max_blocksize(&mut self) {
        self.max_blocksize = None;
    }

    /// The kernel table
    pub fn table(&self) -> &KernelTable<R> {
        &self.table
    }

    /// The shape policy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Target device
    pub fn device(&self) -> &R::Device {
        &self.device
    }

    /// Apply the ufunc to `operands`
    ///
    /// With any device array among the operands the call runs on the
    /// device and returns a device array; otherwise inputs are staged to
    /// the device and the result is copied back into a host array. Host
    /// and device arrays cannot be mixed. All validation happens before
    /// the first launch.
    pub fn call(&self, operands: &[Operand<R>], options: CallOptions<R>) -> Result<Array<R>> {
        let residency = transfer::classify(operands)?;
        if operands.len() != self.table.nin() {
            return Err(Error::invalid_argument(
                "args",
                format!(
                    "ufunc takes {} arguments, got {}",
                    self.table.nin(),
                    operands.len()
                ),
            ));
        }

        let dtypes: Vec<DType> = operands.iter().map(Operand::dtype).collect();
        let (result_dtype, kernel) = self.table.lookup(&dtypes)?;
        let ceiling = thread_ceiling(kernel.as_ref(), self.max_blocksize())?;
        let client = options
            .stream
            .unwrap_or_else(|| R::default_client(&self.device));

        log::debug!(
            "{} call: {:?} -> {} on {} ({:?}), ceiling {}",
            self.strategy.name(),
            dtypes,
            result_dtype,
            R::name(),
            residency,
            ceiling
        );

        let call = Call {
            kernel,
            result_dtype,
            ceiling,
            client: &client,
        };
        match residency {
            Residency::Device => self.call_device(operands, options.out, &call).map(Array::Device),
            Residency::Host => self.call_host(operands, options.out, &call).map(Array::Host),
        }
    }

    fn call_device(
        &self,
        operands: &[Operand<R>],
        out: Option<Array<R>>,
        call: &Call<'_, R>,
    ) -> Result<Tensor<R>> {
        let out = match out {
            Some(Array::Host(_)) => return Err(Error::OutputResidency { device: true }),
            Some(Array::Device(t)) => Some(t),
            None => None,
        };

        // 0-D arguments become 1-element, zero-stride 1-D views
        let args = operands
            .iter()
            .map(|op| {
                let t = transfer::device_operand(op, call.client)?;
                if t.ndim() == 0 {
                    t.as_zero_stride_1d()
                } else {
                    Ok(t)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        self.strategy.check_device_arguments(&args)?;

        let count = self.strategy.element_count(&args, Residency::Device)?;
        let geometry = plan(count, call.ceiling)?;
        let shape = self.strategy.output_shape(&args, Residency::Device)?;

        let out = match out {
            Some(t) => {
                self.strategy.check_output_shape(t.shape(), &shape)?;
                check_output(&t, call.result_dtype, shape.iter().product())?;
                t
            }
            None => self
                .strategy
                .allocate_output::<R>(&shape, call.result_dtype, call.client)?,
        };

        call.launch(geometry, &args, &out, count)?;
        Ok(out)
    }

    fn call_host(
        &self,
        operands: &[Operand<R>],
        out: Option<Array<R>>,
        call: &Call<'_, R>,
    ) -> Result<HostArray> {
        let host_client = transfer::host_client();
        let out = match out {
            Some(Array::Device(_)) => return Err(Error::OutputResidency { device: false }),
            Some(Array::Host(t)) => Some(t),
            None => None,
        };

        let inputs = operands
            .iter()
            .map(|op| transfer::host_operand(op, &host_client))
            .collect::<Result<Vec<_>>>()?;
        let prepared = self.strategy.prepare_inputs(inputs, &host_client)?;
        let count = self.strategy.element_count(&prepared, Residency::Host)?;
        let shape = self.strategy.output_shape(&prepared, Residency::Host)?;

        let out = match out {
            Some(t) => {
                self.strategy.check_output_shape(t.shape(), &shape)?;
                check_host_output(&t, &shape, call.result_dtype)?;
                t
            }
            None => {
                self.strategy
                    .allocate_output::<CpuRuntime>(&shape, call.result_dtype, &host_client)?
            }
        };

        let original_shape = out.shape().to_vec();
        let flat_out = self.strategy.adjust_dimension(vec![out], &host_client)?.remove(0);
        let staged = self.strategy.adjust_dimension(prepared, &host_client)?;
        let geometry = plan(count, call.ceiling)?;

        let device_ins = staged
            .iter()
            .map(|a| transfer::to_device::<R>(a, call.client))
            .collect::<Result<Vec<_>>>()?;
        let launch_shape = self.strategy.launch_shape(&shape);
        let device_out =
            self.strategy
                .allocate_output::<R>(&launch_shape, call.result_dtype, call.client)?;

        call.launch(geometry, &device_ins, &device_out, count)?;
        transfer::to_host(&device_out, Some(&flat_out), call.client)?;
        flat_out.reshape(&original_shape)
    }
}

/// Per-call state threaded through one dispatch
struct Call<'a, R: Runtime> {
    kernel: &'a Arc<dyn Kernel<R>>,
    result_dtype: DType,
    ceiling: u32,
    client: &'a R::Client,
}

impl<R: Runtime> Call<'_, R> {
    fn launch(
        &self,
        geometry: LaunchGeometry,
        inputs: &[Tensor<R>],
        output: &Tensor<R>,
        count: usize,
    ) -> Result<()> {
        if geometry.is_empty() {
            log::trace!("skipping launch over zero elements");
            return Ok(());
        }
        log::trace!(
            "launch: grid {} x block {} for {} elements",
            geometry.blocks,
            geometry.threads_per_block,
            count
        );
        let args = KernelArgs {
            inputs,
            output,
            count,
        };
        self.kernel.launch(geometry, self.client, &args)
    }
}

fn check_output<R: Runtime>(out: &Tensor<R>, dtype: DType, required: usize) -> Result<()> {
    if out.dtype() != dtype {
        return Err(Error::DTypeMismatch {
            lhs: dtype,
            rhs: out.dtype(),
        });
    }
    if out.numel() < required {
        return Err(Error::InsufficientCapacity {
            required,
            available: out.numel(),
        });
    }
    Ok(())
}

fn check_host_output(out: &HostArray, shape: &[usize], dtype: DType) -> Result<()> {
    if !out.is_contiguous() {
        return Err(Error::NotContiguous);
    }
    let leading = |s: &[usize]| s.first().copied().unwrap_or(1);
    if leading(out.shape()) < leading(shape) {
        return Err(Error::InsufficientCapacity {
            required: leading(shape),
            available: leading(out.shape()),
        });
    }
    check_output(out, dtype, shape.iter().product())
}

impl<R: Runtime, S: DispatchStrategy + std::fmt::Debug> std::fmt::Debug for Dispatcher<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("runtime", &R::name())
            .field("strategy", &self.strategy)
            .field("table", &self.table)
            .field("device", &self.device)
            .field("max_blocksize", &self.max_blocksize())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu::{CpuKernel, CpuRuntime};

    fn add() -> UFuncDispatcher<CpuRuntime> {
        let table = KernelTable::new(2)
            .register(
                &[DType::F32, DType::F32],
                DType::F32,
                CpuKernel::binary(|a: f32, b: f32| a + b),
            )
            .unwrap();
        UFuncDispatcher::new(table)
    }

    #[test]
    fn test_max_blocksize_accessors() {
        let mut d = add();
        assert_eq!(d.max_blocksize(), DEFAULT_MAX_BLOCKSIZE);
        d.set_max_blocksize(32);
        assert_eq!(d.max_blocksize(), 32);
        d.clear_max_blocksize();
        assert_eq!(d.max_blocksize(), DEFAULT_MAX_BLOCKSIZE);
        assert_eq!(add().with_max_blocksize(7).max_blocksize(), 7);
    }

    #[test]
    fn test_arity_checked() {
        let d = add();
        let err = d
            .call(&[Operand::scalar(1.0f32)], CallOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_scalars_only_run_on_host() {
        let d = add();
        let r = d
            .call(
                &[Operand::scalar(1.5f32), Operand::scalar(2.0f32)],
                CallOptions::new(),
            )
            .unwrap();
        let host = r.into_host().unwrap();
        assert!(host.is_scalar());
        assert_eq!(host.to_vec::<f32>(), vec![3.5]);
    }

    #[test]
    fn test_gufunc_signature_must_match_table() {
        let table = KernelTable::<CpuRuntime>::new(1);
        let sig = Signature::parse("(i),(i)->()").unwrap();
        assert!(GUFuncDispatcher::new(table, sig).is_err());

        let table = KernelTable::<CpuRuntime>::new(1);
        let sig = Signature::parse("(i)->(),()").unwrap();
        assert!(GUFuncDispatcher::new(table, sig).is_err());
    }
}
