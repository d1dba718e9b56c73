//! Host-emulated kernels
//!
//! `CpuKernel` executes a launch the way an accelerator would: every
//! thread of every block computes at most one element (or one loop
//! iteration), and threads past the element count do nothing. Blocks run
//! in parallel on the rayon pool when the `rayon` feature is enabled.

use super::client::CpuClient;
use super::runtime::CpuRuntime;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::tensor::{Layout, Shape, Strides, Tensor};
use crate::ufunc::{Autotune, Kernel, KernelArgs, LaunchGeometry};
use smallvec::SmallVec;
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Threads-per-block limit reported when none is configured
pub const DEFAULT_MAX_THREADS: u32 = 1024;

/// Raw view of one kernel argument
#[derive(Clone, Debug)]
pub(crate) struct ArgView {
    ptr: u64,
    shape: Shape,
    strides: Strides,
}

impl ArgView {
    fn new(t: &Tensor<CpuRuntime>) -> Self {
        Self {
            ptr: t.data_ptr(),
            shape: t.shape().into(),
            strides: t.strides().into(),
        }
    }

    /// Address of element `i` along the leading axis
    #[inline]
    fn leading<T>(&self, i: usize) -> *mut T {
        let offset = i as isize * self.strides[0] * std::mem::size_of::<T>() as isize;
        (self.ptr as isize + offset) as *mut T
    }

    fn inner_len(&self) -> usize {
        self.shape[1..].iter().product()
    }
}

/// Arguments of one launch, shared by all threads
#[derive(Debug)]
pub(crate) struct LaunchView {
    inputs: SmallVec<[ArgView; 4]>,
    output: ArgView,
}

type Body = dyn Fn(usize, &LaunchView) + Send + Sync;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Form {
    Elementwise,
    Generalized,
}

/// Fixed autotuning answer
#[derive(Copy, Clone, Debug)]
struct FixedAutotune(u32);

impl Autotune for FixedAutotune {
    fn best(&self) -> u32 {
        self.0
    }
}

/// Contiguous slice of one loop iteration of a generalized argument
#[derive(Debug)]
pub struct InnerView<'a, T> {
    /// Elements in row-major order
    pub data: &'a [T],
    /// Shape without the loop axis
    pub shape: &'a [usize],
}

/// Mutable output slice of one loop iteration
#[derive(Debug)]
pub struct InnerViewMut<'a, T> {
    /// Elements in row-major order
    pub data: &'a mut [T],
    /// Shape without the loop axis
    pub shape: &'a [usize],
}

/// Kernel executed on the host with accelerator launch semantics
///
/// # Example
///
/// ```
/// use ufunc_dispatch::runtime::cpu::CpuKernel;
///
/// let add = CpuKernel::binary(|a: f32, b: f32| a + b).with_max_threads(256);
/// ```
#[derive(Clone)]
pub struct CpuKernel {
    body: Arc<Body>,
    form: Form,
    inputs: SmallVec<[DType; 4]>,
    output: DType,
    max_threads: u32,
    autotune: Option<FixedAutotune>,
}

impl CpuKernel {
    fn new(form: Form, inputs: &[DType], output: DType, body: Arc<Body>) -> Self {
        Self {
            body,
            form,
            inputs: inputs.into(),
            output,
            max_threads: DEFAULT_MAX_THREADS,
            autotune: None,
        }
    }

    /// Elementwise kernel of one input
    pub fn unary<A, O, F>(f: F) -> Self
    where
        A: Element,
        O: Element,
        F: Fn(A) -> O + Send + Sync + 'static,
    {
        let body = move |i: usize, v: &LaunchView| unsafe {
            let a = v.inputs[0].leading::<A>(i).read();
            v.output.leading::<O>(i).write(f(a));
        };
        Self::new(Form::Elementwise, &[A::DTYPE], O::DTYPE, Arc::new(body))
    }

    /// Elementwise kernel of two inputs
    pub fn binary<A, B, O, F>(f: F) -> Self
    where
        A: Element,
        B: Element,
        O: Element,
        F: Fn(A, B) -> O + Send + Sync + 'static,
    {
        let body = move |i: usize, v: &LaunchView| unsafe {
            let a = v.inputs[0].leading::<A>(i).read();
            let b = v.inputs[1].leading::<B>(i).read();
            v.output.leading::<O>(i).write(f(a, b));
        };
        Self::new(
            Form::Elementwise,
            &[A::DTYPE, B::DTYPE],
            O::DTYPE,
            Arc::new(body),
        )
    }

    /// Generalized kernel over `nin` inputs of one element type
    ///
    /// `f` is called once per loop iteration with the inner (non-loop)
    /// part of every input and of the output.
    pub fn generalized<T, O, F>(nin: usize, f: F) -> Self
    where
        T: Element,
        O: Element,
        F: Fn(&[InnerView<'_, T>], InnerViewMut<'_, O>) + Send + Sync + 'static,
    {
        let body = move |i: usize, v: &LaunchView| {
            let inputs: SmallVec<[InnerView<'_, T>; 4]> = v
                .inputs
                .iter()
                .map(|a| InnerView {
                    data: unsafe { inner_slice(a.leading::<T>(i), a.inner_len()) },
                    shape: &a.shape[1..],
                })
                .collect();
            let out = InnerViewMut {
                data: unsafe { inner_slice_mut(v.output.leading::<O>(i), v.output.inner_len()) },
                shape: &v.output.shape[1..],
            };
            f(&inputs, out);
        };
        let dtypes = vec![T::DTYPE; nin];
        Self::new(Form::Generalized, &dtypes, O::DTYPE, Arc::new(body))
    }

    /// Set the reported threads-per-block hardware limit
    pub fn with_max_threads(mut self, max_threads: u32) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Attach an autotuner that always answers `best`
    pub fn with_autotune(mut self, best: u32) -> Self {
        self.autotune = Some(FixedAutotune(best));
        self
    }

    fn validate(&self, geometry: LaunchGeometry, args: &KernelArgs<'_, CpuRuntime>) -> Result<()> {
        if geometry.threads_per_block > self.max_threads {
            return Err(Error::Backend(format!(
                "too many resources requested for launch: {} threads per block (limit {})",
                geometry.threads_per_block, self.max_threads
            )));
        }
        if !geometry.covers(args.count) {
            return Err(Error::Internal(format!(
                "grid {:?} does not cover {} elements",
                geometry, args.count
            )));
        }
        if args.inputs.len() != self.inputs.len() {
            return Err(Error::invalid_argument(
                "inputs",
                format!(
                    "kernel takes {} inputs, got {}",
                    self.inputs.len(),
                    args.inputs.len()
                ),
            ));
        }
        for (t, &dtype) in args.inputs.iter().zip(self.inputs.iter()) {
            if t.dtype() != dtype {
                return Err(Error::DTypeMismatch {
                    lhs: dtype,
                    rhs: t.dtype(),
                });
            }
        }
        if args.output.dtype() != self.output {
            return Err(Error::DTypeMismatch {
                lhs: self.output,
                rhs: args.output.dtype(),
            });
        }

        match self.form {
            Form::Elementwise => {
                for (i, t) in args.inputs.iter().enumerate() {
                    check_elementwise(t, i, args.count, true)?;
                }
                check_elementwise(args.output, args.inputs.len(), args.count, false)
            }
            Form::Generalized => {
                for t in args.inputs.iter().chain(std::iter::once(args.output)) {
                    check_generalized(t, args.count)?;
                }
                Ok(())
            }
        }
    }

    fn run(&self, geometry: LaunchGeometry, count: usize, view: &LaunchView) {
        let tpb = geometry.threads_per_block as usize;
        let block = |b: usize| {
            let start = b * tpb;
            let end = (start + tpb).min(count);
            for i in start..end {
                (self.body)(i, view);
            }
        };

        #[cfg(feature = "rayon")]
        (0..geometry.blocks as usize).into_par_iter().for_each(block);

        #[cfg(not(feature = "rayon"))]
        (0..geometry.blocks as usize).for_each(block);
    }
}

fn check_elementwise(t: &Tensor<CpuRuntime>, arg: usize, count: usize, input: bool) -> Result<()> {
    if t.ndim() != 1 {
        return Err(Error::NotOneDimensional {
            arg,
            ndim: t.ndim(),
        });
    }
    let broadcast = input && t.strides()[0] == 0 && t.shape()[0] > 0;
    if !broadcast && t.shape()[0] < count {
        return Err(Error::InsufficientCapacity {
            required: count,
            available: t.shape()[0],
        });
    }
    Ok(())
}

fn check_generalized(t: &Tensor<CpuRuntime>, count: usize) -> Result<()> {
    if t.ndim() == 0 {
        return Err(Error::invalid_argument(
            "args",
            "generalized kernel arguments need a loop dimension",
        ));
    }
    if t.shape()[0] < count {
        return Err(Error::InsufficientCapacity {
            required: count,
            available: t.shape()[0],
        });
    }
    let inner = Layout::new(t.shape()[1..].into(), t.strides()[1..].into(), 0);
    if !inner.is_contiguous() {
        return Err(Error::NotContiguous);
    }
    Ok(())
}

unsafe fn inner_slice<'a, T>(ptr: *mut T, len: usize) -> &'a [T] {
    if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

unsafe fn inner_slice_mut<'a, T>(ptr: *mut T, len: usize) -> &'a mut [T] {
    if len == 0 {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }
}

impl Kernel<CpuRuntime> for CpuKernel {
    fn max_threads_per_block(&self) -> u32 {
        self.max_threads
    }

    fn autotuner(&self) -> Option<&dyn Autotune> {
        self.autotune.as_ref().map(|a| a as &dyn Autotune)
    }

    fn launch(
        &self,
        geometry: LaunchGeometry,
        client: &CpuClient,
        args: &KernelArgs<'_, CpuRuntime>,
    ) -> Result<()> {
        self.validate(geometry, args)?;
        client.record_launch(geometry);
        log::trace!(
            "cpu launch: {} blocks x {} threads over {} elements",
            geometry.blocks,
            geometry.threads_per_block,
            args.count
        );

        let view = LaunchView {
            inputs: args.inputs.iter().map(ArgView::new).collect(),
            output: ArgView::new(args.output),
        };
        self.run(geometry, args.count, &view);
        Ok(())
    }
}

impl std::fmt::Debug for CpuKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuKernel")
            .field("form", &self.form)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("max_threads", &self.max_threads)
            .field("autotune", &self.autotune.map(|a| a.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::tensor::HostArray;
    use crate::ufunc::geometry::plan;

    fn client() -> CpuClient {
        CpuRuntime::default_client(&CpuRuntime::default_device())
    }

    #[test]
    fn test_binary_launch_with_broadcast_operand() {
        let c = client();
        let k = CpuKernel::binary(|a: i32, b: i32| a * b);
        let a = HostArray::host(&[1i32, 2, 3, 4, 5], &[5]);
        let b = HostArray::host(&[10i32], &[]).as_zero_stride_1d().unwrap();
        let out = HostArray::try_empty(&[5], DType::I32, &c).unwrap();
        let inputs = [a, b];
        let args = KernelArgs {
            inputs: &inputs,
            output: &out,
            count: 5,
        };
        k.launch(plan(5, 2).unwrap(), &c, &args).unwrap();
        assert_eq!(out.to_vec::<i32>(), vec![10, 20, 30, 40, 50]);
        assert_eq!(c.launches(), vec![plan(5, 2).unwrap()]);
    }

    #[test]
    fn test_launch_rejects_oversized_block() {
        let c = client();
        let k = CpuKernel::unary(|a: f64| a * 2.0).with_max_threads(4);
        let a = HostArray::host(&[1.0f64; 8], &[8]);
        let out = HostArray::try_empty(&[8], DType::F64, &c).unwrap();
        let args = KernelArgs {
            inputs: std::slice::from_ref(&a),
            output: &out,
            count: 8,
        };
        let err = k.launch(plan(8, 8).unwrap(), &c, &args).unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(c.launch_count(), 0);
    }

    #[test]
    fn test_launch_rejects_wrong_dtype() {
        let c = client();
        let k = CpuKernel::unary(|a: f32| a);
        let a = HostArray::host(&[1i64], &[1]);
        let out = HostArray::try_empty(&[1], DType::F32, &c).unwrap();
        let args = KernelArgs {
            inputs: std::slice::from_ref(&a),
            output: &out,
            count: 1,
        };
        assert!(matches!(
            k.launch(plan(1, 1).unwrap(), &c, &args),
            Err(Error::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_generalized_launch_per_loop_iteration() {
        let c = client();
        // Row sums: (n)->()
        let k = CpuKernel::generalized(1, |ins: &[InnerView<'_, f32>], out: InnerViewMut<'_, f32>| {
            out.data[0] = ins[0].data.iter().sum();
        });
        let a = HostArray::host(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let out = HostArray::try_zeros(&[2, 1], DType::F32, &c).unwrap();
        let args = KernelArgs {
            inputs: std::slice::from_ref(&a),
            output: &out,
            count: 2,
        };
        k.launch(plan(2, 1024).unwrap(), &c, &args).unwrap();
        assert_eq!(out.to_vec::<f32>(), vec![6.0, 15.0]);
    }
}
