//! Shape schedules for generalized ufuncs

use super::signature::Signature;
use crate::error::{Error, Result};
use crate::tensor::Shape;

/// Resolved shapes for one generalized call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Full shape of every output
    pub output_shapes: Vec<Shape>,
    /// Number of independent kernel iterations (product of `loopdims`)
    pub loopn: usize,
    /// Loop (outer) dimensions shared by all arguments
    pub loopdims: Shape,
    /// Core shape of every input
    pub ishapes: Vec<Shape>,
    /// Core shape of every output
    pub oshapes: Vec<Shape>,
}

/// Computes a [`Schedule`] from input shapes
pub trait ScheduleEngine: Send + Sync {
    /// Number of inputs
    fn nin(&self) -> usize;

    /// Number of outputs
    fn nout(&self) -> usize;

    /// Resolve output shapes and the loop structure for `input_shapes`
    fn schedule(&self, input_shapes: &[&[usize]]) -> Result<Schedule>;
}

/// Schedule engine driven by a [`Signature`]
///
/// The trailing dimensions of each input are its core dimensions, one per
/// template symbol; everything before them is loop shape, which must be
/// identical across inputs.
#[derive(Clone, Debug)]
pub struct SignatureEngine {
    signature: Signature,
}

impl SignatureEngine {
    /// Engine for `signature`
    pub fn new(signature: Signature) -> Self {
        Self { signature }
    }

    /// The signature driving this engine
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl ScheduleEngine for SignatureEngine {
    fn nin(&self) -> usize {
        self.signature.nin()
    }

    fn nout(&self) -> usize {
        self.signature.nout()
    }

    fn schedule(&self, input_shapes: &[&[usize]]) -> Result<Schedule> {
        if input_shapes.len() != self.nin() {
            return Err(Error::invalid_argument(
                "args",
                format!("expected {} inputs, got {}", self.nin(), input_shapes.len()),
            ));
        }

        let mut outer: Option<&[usize]> = None;
        let mut ishapes = Vec::with_capacity(input_shapes.len());
        for (shape, template) in input_shapes.iter().zip(self.signature.inputs()) {
            let nd = template.len();
            if shape.len() < nd {
                return Err(Error::ShapeMismatch {
                    expected: vec![0; nd],
                    got: shape.to_vec(),
                });
            }
            let (this_outer, core) = shape.split_at(shape.len() - nd);
            match outer {
                Some(o) if o != this_outer => return Err(Error::shape_mismatch(o, this_outer)),
                Some(_) => {}
                None => outer = Some(this_outer),
            }
            ishapes.push(Shape::from_slice(core));
        }

        let cores: Vec<&[usize]> = ishapes.iter().map(|s| s.as_slice()).collect();
        let bound = self.signature.bind(&cores)?;

        let loopdims = Shape::from_slice(outer.unwrap_or(&[]));
        let loopn: usize = loopdims.iter().product();
        let oshapes = (0..self.nout())
            .map(|i| self.signature.output_core(i, &bound))
            .collect::<Result<Vec<_>>>()?;
        let output_shapes = oshapes
            .iter()
            .map(|core| loopdims.iter().chain(core.iter()).copied().collect())
            .collect();

        Ok(Schedule {
            output_shapes,
            loopn,
            loopdims,
            ishapes,
            oshapes,
        })
    }
}
