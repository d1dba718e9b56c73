//! Per-call options

use super::array::Array;
use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// Value passed for a named option
pub enum OptionValue<R: Runtime> {
    /// A stream (client) to issue work on
    Stream(R::Client),
    /// A pre-allocated output array
    Out(Array<R>),
}

/// Options accepted by every dispatcher call
///
/// Only `stream` and `out` exist. Without a stream, work is issued on the
/// default client of the dispatcher's device.
pub struct CallOptions<R: Runtime> {
    /// Stream to issue work on
    pub stream: Option<R::Client>,
    /// Pre-allocated output; residency must match the call
    pub out: Option<Array<R>>,
}

impl<R: Runtime> Default for CallOptions<R> {
    fn default() -> Self {
        Self {
            stream: None,
            out: None,
        }
    }
}

impl<R: Runtime> CallOptions<R> {
    /// No stream, no output
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue work on `stream`
    pub fn with_stream(mut self, stream: R::Client) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Write the result into `out`
    pub fn with_out(mut self, out: Array<R>) -> Self {
        self.out = Some(out);
        self
    }

    /// Build from name/value pairs, rejecting unknown names
    ///
    /// Recognized names are `"stream"` and `"out"`. A name given twice, or
    /// a value of the wrong kind for its name, is an invalid argument.
    pub fn from_kwargs<'a, I>(kwargs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, OptionValue<R>)>,
    {
        let mut options = Self::default();
        for (name, value) in kwargs {
            match (name, value) {
                ("stream", OptionValue::Stream(s)) => {
                    if options.stream.replace(s).is_some() {
                        return Err(duplicate(name));
                    }
                }
                ("out", OptionValue::Out(a)) => {
                    if options.out.replace(a).is_some() {
                        return Err(duplicate(name));
                    }
                }
                ("stream", _) => {
                    return Err(Error::invalid_argument("stream", "expected a stream"));
                }
                ("out", _) => {
                    return Err(Error::invalid_argument("out", "expected an array"));
                }
                (other, _) => {
                    return Err(Error::UnknownOption {
                        name: other.to_string(),
                    });
                }
            }
        }
        Ok(options)
    }
}

fn duplicate(name: &str) -> Error {
    Error::invalid_argument("kwargs", format!("option '{}' given more than once", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::cpu::CpuRuntime;
    use crate::tensor::HostArray;

    fn client() -> crate::runtime::cpu::CpuClient {
        CpuRuntime::default_client(&CpuRuntime::default_device())
    }

    #[test]
    fn test_from_kwargs_accepts_known_names() {
        let out = Array::Host(HostArray::host(&[0.0f32; 2], &[2]));
        let opts = CallOptions::<CpuRuntime>::from_kwargs([
            ("stream", OptionValue::Stream(client())),
            ("out", OptionValue::Out(out)),
        ])
        .unwrap();
        assert!(opts.stream.is_some());
        assert!(opts.out.is_some());
    }

    #[test]
    fn test_from_kwargs_rejects_unknown_name() {
        let err = CallOptions::<CpuRuntime>::from_kwargs([("axis", OptionValue::Stream(client()))])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::TypeClass);
        assert!(err.to_string().contains("axis"));
    }

    #[test]
    fn test_from_kwargs_rejects_duplicates() {
        let err = CallOptions::<CpuRuntime>::from_kwargs([
            ("stream", OptionValue::Stream(client())),
            ("stream", OptionValue::Stream(client())),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
