//! Call operands: residency-tagged arrays and scalars

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::tensor::{HostArray, Layout, Storage, Tensor};
use std::fmt;

/// Where an array's memory lives
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Host memory
    Host,
    /// Accelerator memory
    Device,
}

/// An array in host or device memory
///
/// The tag, not the runtime type, decides residency: a `Device` array
/// over [`CpuRuntime`](crate::runtime::cpu::CpuRuntime) is an emulated
/// device buffer.
#[derive(Clone, Debug)]
pub enum Array<R: Runtime> {
    /// Host-resident array
    Host(HostArray),
    /// Device-resident array
    Device(Tensor<R>),
}

impl<R: Runtime> Array<R> {
    /// Residency of this array
    pub fn residency(&self) -> Residency {
        match self {
            Self::Host(_) => Residency::Host,
            Self::Device(_) => Residency::Device,
        }
    }

    /// Whether this is a device array
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device(_))
    }

    /// Shape of the array
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Host(t) => t.shape(),
            Self::Device(t) => t.shape(),
        }
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        match self {
            Self::Host(t) => t.dtype(),
            Self::Device(t) => t.dtype(),
        }
    }

    /// Borrow as a host array
    pub fn as_host(&self) -> Option<&HostArray> {
        match self {
            Self::Host(t) => Some(t),
            Self::Device(_) => None,
        }
    }

    /// Borrow as a device array
    pub fn as_device(&self) -> Option<&Tensor<R>> {
        match self {
            Self::Host(_) => None,
            Self::Device(t) => Some(t),
        }
    }

    /// Unwrap a host array
    pub fn into_host(self) -> Result<HostArray> {
        match self {
            Self::Host(t) => Ok(t),
            Self::Device(_) => Err(Error::OutputResidency { device: false }),
        }
    }

    /// Unwrap a device array
    pub fn into_device(self) -> Result<Tensor<R>> {
        match self {
            Self::Host(_) => Err(Error::OutputResidency { device: true }),
            Self::Device(t) => Ok(t),
        }
    }
}

/// A single dtype-tagged value
///
/// Used for non-array call arguments and as the result of a reduction.
#[derive(Copy, Clone, PartialEq)]
pub struct Scalar {
    dtype: DType,
    bytes: [u8; 8],
}

impl Scalar {
    /// Wrap a value
    pub fn new<T: Element>(value: T) -> Self {
        let mut bytes = [0u8; 8];
        let src = bytemuck::bytes_of(&value);
        bytes[..src.len()].copy_from_slice(src);
        Self {
            dtype: T::DTYPE,
            bytes,
        }
    }

    /// Build from raw little-endian storage bytes
    pub(crate) fn from_bytes(dtype: DType, raw: &[u8]) -> Result<Self> {
        let size = dtype.size_in_bytes();
        if raw.len() != size || size > 8 {
            return Err(Error::Internal(format!(
                "{} bytes cannot hold a {} scalar",
                raw.len(),
                dtype
            )));
        }
        let mut bytes = [0u8; 8];
        bytes[..size].copy_from_slice(raw);
        Ok(Self { dtype, bytes })
    }

    /// Read the single element of a one-element array
    pub fn from_tensor<R: Runtime>(t: &Tensor<R>, client: &R::Client) -> Result<Self> {
        if t.numel() != 1 {
            return Err(Error::shape_mismatch(&[1], t.shape()));
        }
        let size = t.dtype().size_in_bytes();
        let mut raw = [0u8; 8];
        R::copy_from_device(t.data_ptr(), &mut raw[..size], client)?;
        Self::from_bytes(t.dtype(), &raw[..size])
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Raw storage bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.dtype.size_in_bytes()]
    }

    /// Extract the value as `T`, which must match the dtype
    pub fn get<T: Element>(&self) -> Result<T> {
        if T::DTYPE != self.dtype {
            return Err(Error::DTypeMismatch {
                lhs: T::DTYPE,
                rhs: self.dtype,
            });
        }
        Ok(bytemuck::pod_read_unaligned(self.as_bytes()))
    }

    /// Value converted to f64
    pub fn to_f64(&self) -> f64 {
        macro_rules! read {
            ($t:ty) => {
                bytemuck::pod_read_unaligned::<$t>(self.as_bytes()).to_f64()
            };
        }
        match self.dtype {
            DType::F64 => read!(f64),
            DType::F32 => read!(f32),
            #[cfg(feature = "f16")]
            DType::F16 => read!(half::f16),
            #[cfg(feature = "f16")]
            DType::BF16 => read!(half::bf16),
            DType::I64 => read!(i64),
            DType::I32 => read!(i32),
            DType::I16 => read!(i16),
            DType::I8 => read!(i8),
            DType::U64 => read!(u64),
            DType::U32 => read!(u32),
            DType::U16 => read!(u16),
            DType::U8 => read!(u8),
            _ => {
                if self.bytes.iter().any(|&b| b != 0) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Materialize as a 0-D array on runtime `D`
    pub fn to_tensor<D: Runtime>(&self, client: &D::Client) -> Result<Tensor<D>> {
        let storage = Storage::from_bytes(self.as_bytes(), self.dtype, client)?;
        Ok(Tensor::from_parts(storage, Layout::scalar()))
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({}: {})", self.to_f64(), self.dtype)
    }
}

/// One positional argument of a ufunc call
#[derive(Clone, Debug)]
pub enum Operand<R: Runtime> {
    /// An array argument
    Array(Array<R>),
    /// A non-array argument, converted to a 0-D array on the call's side
    Scalar(Scalar),
}

impl<R: Runtime> Operand<R> {
    /// Host array argument
    pub fn host(t: HostArray) -> Self {
        Self::Array(Array::Host(t))
    }

    /// Device array argument
    pub fn device(t: Tensor<R>) -> Self {
        Self::Array(Array::Device(t))
    }

    /// Scalar argument
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::Scalar(Scalar::new(value))
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        match self {
            Self::Array(a) => a.dtype(),
            Self::Scalar(s) => s.dtype(),
        }
    }

    /// Residency, or `None` for scalars
    pub fn residency(&self) -> Option<Residency> {
        match self {
            Self::Array(a) => Some(a.residency()),
            Self::Scalar(_) => None,
        }
    }

    /// Shape (empty for scalars)
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Array(a) => a.shape(),
            Self::Scalar(_) => &[],
        }
    }
}

impl<R: Runtime> From<Array<R>> for Operand<R> {
    fn from(a: Array<R>) -> Self {
        Self::Array(a)
    }
}

impl<R: Runtime> From<Scalar> for Operand<R> {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu::CpuRuntime;

    #[test]
    fn test_scalar_roundtrip_and_dtype_check() {
        let s = Scalar::new(-7i16);
        assert_eq!(s.dtype(), DType::I16);
        assert_eq!(s.get::<i16>().unwrap(), -7);
        assert_eq!(s.to_f64(), -7.0);
        assert!(s.get::<i32>().is_err());
    }

    #[test]
    fn test_scalar_to_tensor_is_zero_dim() {
        let client = CpuRuntime::default_client(&CpuRuntime::default_device());
        let t = Scalar::new(2.5f64).to_tensor::<CpuRuntime>(&client).unwrap();
        assert!(t.is_scalar());
        assert_eq!(t.item::<f64>(&client).unwrap(), 2.5);
        let back = Scalar::from_tensor(&t, &client).unwrap();
        assert_eq!(back, Scalar::new(2.5f64));
    }

    #[test]
    fn test_operand_residency() {
        let h: Operand<CpuRuntime> = Operand::host(HostArray::host(&[1u8], &[1]));
        let d: Operand<CpuRuntime> = Operand::device(HostArray::host(&[1u8], &[1]));
        let s: Operand<CpuRuntime> = Operand::scalar(1u8);
        assert_eq!(h.residency(), Some(Residency::Host));
        assert_eq!(d.residency(), Some(Residency::Device));
        assert_eq!(s.residency(), None);
        assert_eq!(s.shape(), &[] as &[usize]);
    }
}
