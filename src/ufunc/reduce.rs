//! Device-side tree reduction

use super::array::{Array, Operand, Scalar};
use super::dispatcher::UFuncDispatcher;
use super::options::CallOptions;
use super::transfer;
use crate::error::{Error, Result};
use crate::runtime::{AutoSynchronize, Runtime};
use crate::tensor::Tensor;

impl<R: Runtime> UFuncDispatcher<R> {
    /// Reduce a 1-D array with a binary, associative kernel
    ///
    /// The array is halved repeatedly on the device; each level applies the
    /// kernel to the two halves, writing into the left one. Odd lengths set
    /// the last element aside and fold it in after the even prefix is
    /// reduced. All views created along the way are retained in an
    /// [`AutoSynchronize`] scope until the final value has been copied
    /// out, so none is released while a launch may still use it.
    ///
    /// A device input is used as scratch space and is overwritten. Without
    /// a `stream`, a fresh client of the dispatcher's device is used.
    pub fn reduce(&self, arg: &Array<R>, stream: Option<&R::Client>) -> Result<Scalar> {
        if self.table().nin() != 2 {
            return Err(Error::invalid_argument(
                "ufunc",
                "reduction requires a binary ufunc",
            ));
        }
        if arg.ndim() != 1 {
            return Err(Error::NotOneDimensional {
                arg: 0,
                ndim: arg.ndim(),
            });
        }
        let dtype = arg.dtype();
        let (result_dtype, _) = self.table().lookup(&[dtype, dtype])?;
        if result_dtype != dtype {
            return Err(Error::DTypeMismatch {
                lhs: dtype,
                rhs: result_dtype,
            });
        }

        let n = arg.shape()[0];
        log::debug!("reduce over {} elements of {}", n, dtype);
        match n {
            0 => return Err(Error::EmptyReduction),
            1 => return first_element(arg),
            _ => {}
        }

        let owned;
        let client = match stream {
            Some(c) => c,
            None => {
                owned = R::default_client(self.device());
                &owned
            }
        };

        let mut scope = AutoSynchronize::<R>::new(client);
        let mem = match arg {
            Array::Device(t) => t.clone(),
            Array::Host(h) => transfer::to_device::<R>(h, client)?,
        };
        scope.retain(&mem);
        let out = self.reduce_range(&mem, &mut scope)?;
        let value = Scalar::from_tensor(&out, client)?;
        log::trace!("reduce retained {} views", scope.retained());
        scope.finish()?;
        Ok(value)
    }

    fn reduce_range(&self, mem: &Tensor<R>, scope: &mut AutoSynchronize<'_, R>) -> Result<Tensor<R>> {
        let n = mem.shape()[0];
        if n % 2 != 0 {
            let (fat, thin) = mem.split(n - 1)?;
            scope.retain(&fat);
            scope.retain(&thin);
            let out = self.reduce_range(&fat, scope)?;
            scope.retain(&out);
            self.combine(&out, &thin, &out, scope)?;
            Ok(out)
        } else {
            let half = n / 2;
            let (left, right) = mem.split(half)?;
            scope.retain(&left);
            scope.retain(&right);
            self.combine(&left, &right, &left, scope)?;
            if half > 1 {
                self.reduce_range(&left, scope)
            } else {
                Ok(left)
            }
        }
    }

    fn combine(
        &self,
        lhs: &Tensor<R>,
        rhs: &Tensor<R>,
        out: &Tensor<R>,
        scope: &AutoSynchronize<'_, R>,
    ) -> Result<()> {
        log::trace!("reduce step over {} elements", lhs.numel());
        let options = CallOptions::new()
            .with_stream(scope.client().clone())
            .with_out(Array::Device(out.clone()));
        self.call(
            &[Operand::device(lhs.clone()), Operand::device(rhs.clone())],
            options,
        )?;
        Ok(())
    }
}

fn first_element<R: Runtime>(arg: &Array<R>) -> Result<Scalar> {
    match arg {
        Array::Host(h) => {
            let client = transfer::host_client();
            Scalar::from_tensor(&h.split(1)?.0, &client)
        }
        Array::Device(t) => {
            let client = R::default_client(t.device());
            Scalar::from_tensor(&t.split(1)?.0, &client)
        }
    }
}
