//! Ordinary broadcasting

use crate::error::{Error, Result};
use crate::tensor::Shape;

/// Broadcast any number of shapes to their common shape
///
/// Shapes are right-aligned; a dimension of size 1 stretches to match,
/// any other disagreement is an error. No shapes gives the 0-D shape.
///
/// # Example
/// ```
/// use ufunc_dispatch::ufunc::shape::broadcast_shapes;
/// let s = broadcast_shapes(&[&[3, 1], &[1, 4]]).unwrap();
/// assert_eq!(s.as_slice(), &[3, 4]);
/// ```
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Shape> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result: Shape = smallvec::smallvec![1; ndim];

    for shape in shapes {
        let pad = ndim - shape.len();
        for (i, &dim) in shape.iter().enumerate() {
            let slot = &mut result[pad + i];
            if *slot == dim || dim == 1 {
                continue;
            }
            if *slot == 1 {
                *slot = dim;
            } else {
                let current = result.to_vec();
                return Err(Error::broadcast(&current, shape));
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_basic() {
        assert_eq!(broadcast_shapes(&[&[2, 3], &[3]]).unwrap().as_slice(), &[2, 3]);
        assert_eq!(broadcast_shapes(&[&[5], &[]]).unwrap().as_slice(), &[5]);
        assert_eq!(
            broadcast_shapes(&[&[4, 1, 3], &[2, 1], &[1]]).unwrap().as_slice(),
            &[4, 2, 3]
        );
    }

    #[test]
    fn test_broadcast_zero_length() {
        assert_eq!(broadcast_shapes(&[&[0], &[1]]).unwrap().as_slice(), &[0]);
        assert!(broadcast_shapes(&[&[0], &[2]]).is_err());
    }

    #[test]
    fn test_broadcast_incompatible() {
        let err = broadcast_shapes(&[&[2, 3], &[4, 3]]).unwrap_err();
        assert!(matches!(err, Error::BroadcastError { .. }));
    }

    #[test]
    fn test_broadcast_nothing() {
        assert!(broadcast_shapes(&[]).unwrap().is_empty());
    }
}
