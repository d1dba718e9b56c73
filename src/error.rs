//! Error types for ufunc dispatch

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using the crate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of dispatch failures
///
/// Every [`Error`] maps to exactly one kind. Callers that only care about
/// the class of failure (e.g. "was this a residency problem?") should
/// match on [`Error::kind`] instead of individual variants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No kernel registered for the argument dtypes
    UnsupportedType,
    /// Broadcasting, length or signature-symbol conflict
    ShapeMismatch,
    /// Caller-supplied output buffer is too small
    Capacity,
    /// Residency mismatch, wrong output class, or unknown option
    TypeClass,
    /// No feasible launch configuration for the kernel
    ResourceExhausted,
    /// Operation is undefined for the given input (e.g. empty reduction)
    DegenerateInput,
    /// Failure reported by the runtime backend
    Backend,
}

/// Errors that can occur while dispatching a ufunc
#[derive(Error, Debug)]
pub enum Error {
    /// No kernel is registered for this tuple of input dtypes
    #[error("Input dtypes not supported by ufunc: {}", format_dtypes(.dtypes))]
    UnsupportedDTypes {
        /// Per-argument dtypes of the failed lookup
        dtypes: Vec<DType>,
    },

    /// Shape mismatch in an operation
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Shapes cannot be broadcast together
    #[error("Cannot broadcast shapes {lhs:?} and {rhs:?}")]
    BroadcastError {
        /// Left-hand side shape
        lhs: Vec<usize>,
        /// Right-hand side shape
        rhs: Vec<usize>,
    },

    /// A device argument is not one-dimensional
    #[error("arg {arg} is not a 1D array (ndim = {ndim})")]
    NotOneDimensional {
        /// Argument position
        arg: usize,
        /// Its number of dimensions
        ndim: usize,
    },

    /// A device argument has a different length than the others
    #[error("arg {arg} should have length {expected}, got {got}")]
    LengthMismatch {
        /// Argument position
        arg: usize,
        /// Common length of the preceding arguments
        expected: usize,
        /// Length of this argument
        got: usize,
    },

    /// A signature symbol was bound to two different sizes
    #[error("dimension {symbol} mismatch: {got} != {expected}")]
    DimensionMismatch {
        /// The signature symbol
        symbol: String,
        /// Value bound first
        expected: usize,
        /// Conflicting value
        got: usize,
    },

    /// Caller-supplied output buffer is too small
    #[error("Insufficient storage for output array: need {required}, have {available}")]
    InsufficientCapacity {
        /// Required leading length
        required: usize,
        /// Leading length of the supplied buffer
        available: usize,
    },

    /// Host and device arrays were mixed in one call
    #[error("if device array is used, all arguments must be device array")]
    MixedResidency,

    /// The `out` array lives on the wrong side for this call
    #[error("output array must {}be a device array", negation(.device))]
    OutputResidency {
        /// Whether the call expected a device output
        device: bool,
    },

    /// Unrecognized keyword option
    #[error("Unknown keyword option '{name}'")]
    UnknownOption {
        /// The rejected option name
        name: String,
    },

    /// Autotuning found no usable thread count
    #[error("Insufficient resources to run kernel at any thread-per-block")]
    InsufficientResources,

    /// Reduction over an array with no elements
    #[error("Reduction on an empty array")]
    EmptyReduction,

    /// DType mismatch between operands
    #[error("DType mismatch: {lhs:?} vs {rhs:?}")]
    DTypeMismatch {
        /// Left-hand side dtype
        lhs: DType,
        /// Right-hand side dtype
        rhs: DType,
    },

    /// Out of memory
    #[error("Out of memory: failed to allocate {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Array is not contiguous when contiguous memory is required
    #[error("Operation requires contiguous array")]
    NotContiguous,

    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),

    /// CUDA-specific error
    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn negation(device: &bool) -> &'static str {
    if *device { "" } else { "not " }
}

fn format_dtypes(dtypes: &[DType]) -> String {
    let names: Vec<&str> = dtypes.iter().map(|d| d.short_name()).collect();
    format!("({})", names.join(", "))
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create a broadcast error
    pub fn broadcast(lhs: &[usize], rhs: &[usize]) -> Self {
        Self::BroadcastError {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }

    /// Create an unsupported dtype-tuple error
    pub fn unsupported_dtypes(dtypes: &[DType]) -> Self {
        Self::UnsupportedDTypes {
            dtypes: dtypes.to_vec(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedDTypes { .. } | Self::DTypeMismatch { .. } => ErrorKind::UnsupportedType,
            Self::ShapeMismatch { .. }
            | Self::BroadcastError { .. }
            | Self::NotOneDimensional { .. }
            | Self::LengthMismatch { .. }
            | Self::DimensionMismatch { .. }
            | Self::InvalidArgument { .. }
            | Self::NotContiguous => ErrorKind::ShapeMismatch,
            Self::InsufficientCapacity { .. } => ErrorKind::Capacity,
            Self::MixedResidency | Self::OutputResidency { .. } | Self::UnknownOption { .. } => {
                ErrorKind::TypeClass
            }
            Self::InsufficientResources | Self::OutOfMemory { .. } => ErrorKind::ResourceExhausted,
            Self::EmptyReduction => ErrorKind::DegenerateInput,
            Self::Backend(_) | Self::Internal(_) => ErrorKind::Backend,
            #[cfg(feature = "cuda")]
            Self::Cuda(_) => ErrorKind::Backend,
        }
    }
}
