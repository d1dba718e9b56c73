//! Shape policies distinguishing elementwise from generalized dispatch
//!
//! A [`Dispatcher`](super::Dispatcher) owns one strategy, chosen at
//! construction. The strategy answers every question whose answer differs
//! between plain ufuncs and signature-driven gufuncs; the call
//! orchestration itself lives in the dispatcher.

use super::array::Residency;
use super::shape::broadcast_shapes;
use super::signature::Signature;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::runtime::cpu::CpuClient;
use crate::tensor::{HostArray, Shape, Tensor};

/// Shape policy of a dispatcher
pub trait DispatchStrategy: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Validate device-resident arguments before launch
    fn check_device_arguments<R: Runtime>(&self, args: &[Tensor<R>]) -> Result<()>;

    /// Bring host arguments to the shapes the kernel expects
    fn prepare_inputs(&self, args: Vec<HostArray>, client: &CpuClient) -> Result<Vec<HostArray>>;

    /// Reshape host arrays into launch form, copying only when needed
    fn adjust_dimension(&self, arrays: Vec<HostArray>, client: &CpuClient)
    -> Result<Vec<HostArray>>;

    /// Launch-form shape of an array of shape `shape`
    fn launch_shape(&self, shape: &[usize]) -> Shape;

    /// Shape of the result for prepared (host) or checked (device) arguments
    fn output_shape<R: Runtime>(&self, args: &[Tensor<R>], residency: Residency) -> Result<Shape>;

    /// Number of elements (or loop iterations) the kernel computes
    fn element_count<R: Runtime>(&self, args: &[Tensor<R>], residency: Residency)
    -> Result<usize>;

    /// Validate the shape of a caller-supplied output against the result shape
    ///
    /// Capacity and dtype are checked by the dispatcher.
    fn check_output_shape(&self, _out: &[usize], _shape: &[usize]) -> Result<()> {
        Ok(())
    }

    /// Allocate a fresh output
    fn allocate_output<D: Runtime>(
        &self,
        shape: &[usize],
        dtype: DType,
        client: &D::Client,
    ) -> Result<Tensor<D>>;
}

/// Plain ufunc policy: broadcasting and 1-D launches
#[derive(Copy, Clone, Debug, Default)]
pub struct Elementwise;

impl DispatchStrategy for Elementwise {
    fn name(&self) -> &'static str {
        "ufunc"
    }

    fn check_device_arguments<R: Runtime>(&self, args: &[Tensor<R>]) -> Result<()> {
        for (i, a) in args.iter().enumerate() {
            if a.ndim() != 1 {
                return Err(Error::NotOneDimensional {
                    arg: i,
                    ndim: a.ndim(),
                });
            }
        }
        let mut common: Option<usize> = None;
        for (i, a) in args.iter().enumerate() {
            if a.strides()[0] == 0 {
                continue;
            }
            let len = a.shape()[0];
            match common {
                Some(expected) if expected != len => {
                    return Err(Error::LengthMismatch {
                        arg: i,
                        expected,
                        got: len,
                    });
                }
                Some(_) => {}
                None => common = Some(len),
            }
        }
        Ok(())
    }

    fn prepare_inputs(&self, args: Vec<HostArray>, _client: &CpuClient) -> Result<Vec<HostArray>> {
        let shapes: Vec<&[usize]> = args.iter().map(|a| a.shape()).collect();
        let target = broadcast_shapes(&shapes)?;
        args.iter().map(|a| a.broadcast_to(&target)).collect()
    }

    fn adjust_dimension(
        &self,
        arrays: Vec<HostArray>,
        client: &CpuClient,
    ) -> Result<Vec<HostArray>> {
        arrays
            .into_iter()
            .map(|a| if a.ndim() == 1 { Ok(a) } else { a.ravel(client) })
            .collect()
    }

    fn launch_shape(&self, shape: &[usize]) -> Shape {
        smallvec::smallvec![shape.iter().product()]
    }

    fn output_shape<R: Runtime>(&self, args: &[Tensor<R>], residency: Residency) -> Result<Shape> {
        match residency {
            Residency::Host => {
                let shapes: Vec<&[usize]> = args.iter().map(|a| a.shape()).collect();
                broadcast_shapes(&shapes)
            }
            Residency::Device => Ok(smallvec::smallvec![device_length(args)]),
        }
    }

    fn element_count<R: Runtime>(
        &self,
        args: &[Tensor<R>],
        residency: Residency,
    ) -> Result<usize> {
        match residency {
            Residency::Host => Ok(self.output_shape(args, residency)?.iter().product()),
            Residency::Device => Ok(device_length(args)),
        }
    }

    fn allocate_output<D: Runtime>(
        &self,
        shape: &[usize],
        dtype: DType,
        client: &D::Client,
    ) -> Result<Tensor<D>> {
        Tensor::try_empty(shape, dtype, client)
    }
}

/// Launch length of checked 1-D device arguments
///
/// The common length of the non-zero-stride arguments; when every argument
/// is zero-stride, the longest of them.
fn device_length<R: Runtime>(args: &[Tensor<R>]) -> usize {
    args.iter()
        .find(|a| a.strides()[0] != 0)
        .or_else(|| args.iter().max_by_key(|a| a.shape()[0]))
        .map(|a| a.shape()[0])
        .unwrap_or(1)
}

/// Gufunc policy: contiguous inputs, signature-solved output shape
///
/// The first axis of every argument is the loop axis; the kernel runs
/// once per loop index.
#[derive(Clone, Debug)]
pub struct Generalized {
    signature: Signature,
}

impl Generalized {
    /// Policy for `signature`
    pub fn new(signature: Signature) -> Self {
        Self { signature }
    }

    /// The signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

fn require_loop_dim(shape: &[usize]) -> Result<()> {
    if shape.is_empty() {
        return Err(Error::invalid_argument(
            "args",
            "generalized inputs need a leading loop dimension",
        ));
    }
    Ok(())
}

/// Every argument needs a loop axis covering the first argument's
fn require_loop_lengths(shapes: &[&[usize]]) -> Result<()> {
    shapes.iter().try_for_each(|s| require_loop_dim(s))?;
    let Some(first) = shapes.first() else {
        return Ok(());
    };
    let count = first[0];
    for (i, s) in shapes.iter().enumerate().skip(1) {
        if s[0] < count {
            return Err(Error::LengthMismatch {
                arg: i,
                expected: count,
                got: s[0],
            });
        }
    }
    Ok(())
}

impl DispatchStrategy for Generalized {
    fn name(&self) -> &'static str {
        "gufunc"
    }

    fn check_device_arguments<R: Runtime>(&self, args: &[Tensor<R>]) -> Result<()> {
        let shapes: Vec<&[usize]> = args.iter().map(|a| a.shape()).collect();
        require_loop_lengths(&shapes)
    }

    fn prepare_inputs(&self, args: Vec<HostArray>, client: &CpuClient) -> Result<Vec<HostArray>> {
        let shapes: Vec<&[usize]> = args.iter().map(|a| a.shape()).collect();
        require_loop_lengths(&shapes)?;
        args.iter().map(|a| a.contiguous(client)).collect()
    }

    fn check_output_shape(&self, out: &[usize], shape: &[usize]) -> Result<()> {
        if out != shape {
            return Err(Error::shape_mismatch(shape, out));
        }
        Ok(())
    }

    fn adjust_dimension(
        &self,
        arrays: Vec<HostArray>,
        _client: &CpuClient,
    ) -> Result<Vec<HostArray>> {
        Ok(arrays)
    }

    fn launch_shape(&self, shape: &[usize]) -> Shape {
        shape.into()
    }

    fn output_shape<R: Runtime>(&self, args: &[Tensor<R>], _residency: Residency) -> Result<Shape> {
        let shapes: Vec<&[usize]> = args.iter().map(|a| a.shape()).collect();
        self.signature.solve(&shapes)
    }

    fn element_count<R: Runtime>(
        &self,
        args: &[Tensor<R>],
        _residency: Residency,
    ) -> Result<usize> {
        Ok(args
            .first()
            .and_then(|a| a.shape().first().copied())
            .unwrap_or(0))
    }

    fn allocate_output<D: Runtime>(
        &self,
        shape: &[usize],
        dtype: DType,
        client: &D::Client,
    ) -> Result<Tensor<D>> {
        Tensor::try_zeros(shape, dtype, client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu::CpuRuntime;
    use crate::ufunc::transfer::host_client;

    #[test]
    fn test_elementwise_device_checks() {
        let a = HostArray::host(&[1.0f32, 2.0, 3.0], &[3]);
        let s = HostArray::host(&[1.0f32], &[]).as_zero_stride_1d().unwrap();
        let b = HostArray::host(&[1.0f32, 2.0], &[2]);
        let e = Elementwise;

        e.check_device_arguments(&[a.clone(), s.clone()]).unwrap();
        assert_eq!(e.element_count(&[s.clone(), a.clone()], Residency::Device).unwrap(), 3);
        assert_eq!(e.element_count(&[s.clone()], Residency::Device).unwrap(), 1);

        let stretched = HostArray::host(&[1.0f32], &[1]).broadcast_to(&[4]).unwrap();
        assert_eq!(
            e.element_count(&[s.clone(), stretched], Residency::Device).unwrap(),
            4
        );

        match e.check_device_arguments(&[a.clone(), s, b]).unwrap_err() {
            Error::LengthMismatch { arg, expected, got } => {
                assert_eq!((arg, expected, got), (2, 3, 2));
            }
            other => panic!("unexpected error: {other}"),
        }

        let m = HostArray::host(&[1.0f32; 4], &[2, 2]);
        assert!(matches!(
            e.check_device_arguments(&[a, m]),
            Err(Error::NotOneDimensional { arg: 1, ndim: 2 })
        ));
    }

    #[test]
    fn test_elementwise_host_preparation() {
        let client = host_client();
        let e = Elementwise;
        let a = HostArray::host(&[1i32, 2, 3], &[3, 1]);
        let b = HostArray::host(&[10i32, 20], &[1, 2]);
        let prepared = e.prepare_inputs(vec![a, b], &client).unwrap();
        assert_eq!(prepared[0].shape(), &[3, 2]);
        assert_eq!(
            e.output_shape(&prepared, Residency::Host).unwrap().as_slice(),
            &[3, 2]
        );
        assert_eq!(e.element_count(&prepared, Residency::Host).unwrap(), 6);

        let flat = e.adjust_dimension(prepared, &client).unwrap();
        assert_eq!(flat[0].to_vec::<i32>(), vec![1, 1, 2, 2, 3, 3]);
        assert_eq!(flat[1].to_vec::<i32>(), vec![10, 20, 10, 20, 10, 20]);
        assert_eq!(e.launch_shape(&[3, 2]).as_slice(), &[6]);
    }

    #[test]
    fn test_generalized_shapes_and_zeroed_output() {
        let client = host_client();
        let g = Generalized::new(Signature::parse("(n),(n)->()").unwrap());
        let a = HostArray::host(&[1.0f64; 6], &[2, 3]);
        let b = HostArray::host(&[2.0f64; 6], &[2, 3]);
        let prepared = g.prepare_inputs(vec![a, b], &client).unwrap();
        assert_eq!(
            g.output_shape(&prepared, Residency::Host).unwrap().as_slice(),
            &[2]
        );
        assert_eq!(g.element_count(&prepared, Residency::Host).unwrap(), 2);
        assert!(g.check_output_shape(&[2], &[2]).is_ok());
        assert!(g.check_output_shape(&[1, 2], &[2]).is_err());

        let out = g
            .allocate_output::<CpuRuntime>(&[2], DType::F64, &client)
            .unwrap();
        assert_eq!(out.to_vec::<f64>(), vec![0.0, 0.0]);

        let scalar = HostArray::host(&[1.0f64], &[]);
        assert!(g.prepare_inputs(vec![scalar], &client).is_err());
    }

    #[test]
    fn test_generalized_short_loop_axis_rejected() {
        let client = host_client();
        let g = Generalized::new(Signature::parse("(n),(n)->()").unwrap());
        let a = HostArray::host(&[1.0f64; 6], &[2, 3]);
        let b = HostArray::host(&[1.0f64; 3], &[1, 3]);
        assert!(matches!(
            g.check_device_arguments(&[a.clone(), b.clone()]),
            Err(Error::LengthMismatch {
                arg: 1,
                expected: 2,
                got: 1
            })
        ));
        assert!(g.prepare_inputs(vec![a, b], &client).is_err());
    }
}
