//! Generalized ufuncs driven by an external schedule engine

use super::array::{Array, Operand, Residency};
use super::geometry::{DEFAULT_MAX_BLOCKSIZE, plan, thread_ceiling};
use super::kernel::{KernelArgs, KernelTable};
use super::options::CallOptions;
use super::schedule::{Schedule, ScheduleEngine};
use super::transfer;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::tensor::{Shape, Tensor};

/// Generalized ufunc whose shapes come from a [`ScheduleEngine`]
///
/// The kernel is written against one leading loop axis. Depending on the
/// schedule's loop dimensions, arguments are launched as they are, get a
/// unit loop axis prepended, or have their loop dimensions collapsed into
/// one axis of length `loopn`.
pub struct GeneralizedUFunc<R: Runtime, E: ScheduleEngine> {
    table: KernelTable<R>,
    engine: E,
    device: R::Device,
    max_blocksize: Option<u32>,
}

impl<R: Runtime, E: ScheduleEngine> GeneralizedUFunc<R, E> {
    /// Build from kernels and a single-output engine
    pub fn new(table: KernelTable<R>, engine: E) -> Result<Self> {
        if engine.nout() != 1 {
            return Err(Error::invalid_argument(
                "engine",
                "only a single output is supported",
            ));
        }
        if engine.nin() != table.nin() {
            return Err(Error::invalid_argument(
                "engine",
                format!(
                    "engine takes {} inputs, kernels take {}",
                    engine.nin(),
                    table.nin()
                ),
            ));
        }
        Ok(Self {
            table,
            engine,
            device: R::default_device(),
            max_blocksize: None,
        })
    }

    /// Target `device` instead of the default one
    pub fn with_device(mut self, device: R::Device) -> Self {
        self.device = device;
        self
    }

    /// Cap threads per block
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

    /// The schedule engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Apply the gufunc to `operands`
    ///
    /// Device inputs produce a device result (written into `out` when
    /// given). Host inputs are staged to the device and the result copied
    /// back into `out` or a new host array. A given `out` must have exactly
    /// the scheduled output shape.
    pub fn call(&self, operands: &[Operand<R>], options: CallOptions<R>) -> Result<Array<R>> {
        let residency = transfer::classify(operands)?;
        let dtypes: Vec<DType> = operands.iter().map(Operand::dtype).collect();
        let (result_dtype, kernel) = self.table.lookup(&dtypes)?;
        let ceiling = thread_ceiling(kernel.as_ref(), self.max_blocksize())?;
        let client = options
            .stream
            .unwrap_or_else(|| R::default_client(&self.device));
        let host_client = transfer::host_client();

        let (host_inputs, device_inputs) = match residency {
            Residency::Host => {
                let inputs = operands
                    .iter()
                    .map(|op| transfer::host_operand(op, &host_client)?.contiguous(&host_client))
                    .collect::<Result<Vec<_>>>()?;
                (inputs, Vec::new())
            }
            Residency::Device => {
                let inputs = operands
                    .iter()
                    .map(|op| transfer::device_operand(op, &client))
                    .collect::<Result<Vec<_>>>()?;
                (Vec::new(), inputs)
            }
        };

        let shapes: Vec<&[usize]> = match residency {
            Residency::Host => host_inputs.iter().map(|a| a.shape()).collect(),
            Residency::Device => device_inputs.iter().map(|a| a.shape()).collect(),
        };
        let schedule = self.engine.schedule(&shapes)?;
        if schedule.loopn == 0 {
            return Err(Error::invalid_argument("args", "zero looping dimension"));
        }

        let geometry = plan(schedule.loopn, ceiling)?;

        let output_shape = &schedule.output_shapes[0];
        if let Some(out) = &options.out {
            if out.shape() != output_shape.as_slice() {
                return Err(Error::shape_mismatch(output_shape, out.shape()));
            }
            if out.residency() != residency {
                return Err(Error::OutputResidency {
                    device: residency == Residency::Device,
                });
            }
            if out.dtype() != result_dtype {
                return Err(Error::DTypeMismatch {
                    lhs: result_dtype,
                    rhs: out.dtype(),
                });
            }
        }

        log::debug!(
            "gufunc call: {:?} -> {} loop {:?} ({} iterations), {:?}",
            dtypes,
            result_dtype,
            schedule.loopdims,
            schedule.loopn,
            geometry
        );

        let params = match residency {
            Residency::Host => host_inputs
                .iter()
                .map(|a| transfer::to_device::<R>(a, &client))
                .collect::<Result<Vec<_>>>()?,
            Residency::Device => device_inputs,
        };
        let retval = match (&options.out, residency) {
            (Some(Array::Device(t)), Residency::Device) => t.clone(),
            _ => Tensor::<R>::try_zeros(output_shape, result_dtype, &client)?,
        };

        let (params, launch_out) = loop_form(&schedule, params, &retval)?;
        let args = KernelArgs {
            inputs: &params,
            output: &launch_out,
            count: schedule.loopn,
        };
        kernel.launch(geometry, &client, &args)?;

        match residency {
            Residency::Host => {
                let dest = options.out.as_ref().and_then(Array::as_host);
                transfer::to_host(&retval, dest, &client).map(Array::Host)
            }
            Residency::Device => Ok(Array::Device(retval)),
        }
    }
}

/// Reshape arguments so the kernel sees exactly one leading loop axis
fn loop_form<R: Runtime>(
    schedule: &Schedule,
    params: Vec<Tensor<R>>,
    retval: &Tensor<R>,
) -> Result<(Vec<Tensor<R>>, Tensor<R>)> {
    let prefixed = |lead: usize, core: &[usize]| -> Shape {
        std::iter::once(lead).chain(core.iter().copied()).collect()
    };
    match schedule.loopdims.len() {
        0 => {
            let params = params
                .iter()
                .map(|p| p.reshape(&prefixed(1, p.shape())))
                .collect::<Result<Vec<_>>>()?;
            let out = retval.reshape(&prefixed(1, retval.shape()))?;
            Ok((params, out))
        }
        1 => Ok((params, retval.clone())),
        _ => {
            let n = schedule.loopn;
            let params = params
                .iter()
                .zip(&schedule.ishapes)
                .map(|(p, core)| p.reshape(&prefixed(n, core)))
                .collect::<Result<Vec<_>>>()?;
            let out = retval.reshape(&prefixed(n, &schedule.oshapes[0]))?;
            Ok((params, out))
        }
    }
}
