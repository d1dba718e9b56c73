//! Generalized-ufunc signatures and symbolic shape solving

use crate::error::{Error, Result};
use crate::tensor::Shape;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Dimension symbols of one argument, e.g. `(i,j)`
pub type Template = Vec<String>;

/// Parsed gufunc signature such as `(i,j),(j,k)->(i,k)`
///
/// Each argument is described by the symbols of its core (non-loop)
/// dimensions. Symbols repeated across arguments must bind to the same
/// size in every call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    inputs: Vec<Template>,
    outputs: Vec<Template>,
}

impl Signature {
    /// Build from already-split templates
    pub fn new(inputs: Vec<Template>, outputs: Vec<Template>) -> Self {
        Self { inputs, outputs }
    }

    /// Parse numpy-style signature text
    ///
    /// # Example
    /// ```
    /// use ufunc_dispatch::ufunc::Signature;
    /// let sig = Signature::parse("(i,j),(j,k)->(i,k)").unwrap();
    /// assert_eq!(sig.nin(), 2);
    /// assert_eq!(sig.nout(), 1);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let (lhs, rhs) = compact
            .split_once("->")
            .ok_or_else(|| invalid(text, "missing '->'"))?;
        let inputs = parse_templates(lhs).ok_or_else(|| invalid(text, "bad input list"))?;
        let outputs = parse_templates(rhs).ok_or_else(|| invalid(text, "bad output list"))?;
        if inputs.is_empty() || outputs.is_empty() {
            return Err(invalid(text, "needs at least one input and one output"));
        }
        Ok(Self { inputs, outputs })
    }

    /// Number of inputs
    pub fn nin(&self) -> usize {
        self.inputs.len()
    }

    /// Number of outputs
    pub fn nout(&self) -> usize {
        self.outputs.len()
    }

    /// Input templates
    pub fn inputs(&self) -> &[Template] {
        &self.inputs
    }

    /// Output templates
    pub fn outputs(&self) -> &[Template] {
        &self.outputs
    }

    /// Bind every input symbol to a size given the inputs' core shapes
    ///
    /// Each core shape is matched position by position against its
    /// template. A symbol seen twice with different sizes is a
    /// dimension-mismatch error naming the symbol.
    pub fn bind(&self, core_shapes: &[&[usize]]) -> Result<HashMap<String, usize>> {
        if core_shapes.len() != self.inputs.len() {
            return Err(Error::invalid_argument(
                "args",
                format!(
                    "signature has {} inputs, got {}",
                    self.inputs.len(),
                    core_shapes.len()
                ),
            ));
        }
        let mut bound = HashMap::new();
        for (shape, symbols) in core_shapes.iter().zip(&self.inputs) {
            for (sym, &val) in symbols.iter().zip(shape.iter()) {
                match bound.get(sym) {
                    Some(&prev) if prev != val => {
                        return Err(Error::DimensionMismatch {
                            symbol: sym.clone(),
                            expected: prev,
                            got: val,
                        });
                    }
                    Some(_) => {}
                    None => {
                        bound.insert(sym.clone(), val);
                    }
                }
            }
        }
        Ok(bound)
    }

    /// Core shape of output `index` under `bound`
    pub fn output_core(&self, index: usize, bound: &HashMap<String, usize>) -> Result<Shape> {
        let template = self
            .outputs
            .get(index)
            .ok_or_else(|| Error::invalid_argument("index", "no such output"))?;
        template
            .iter()
            .map(|sym| {
                bound.get(sym).copied().ok_or_else(|| {
                    Error::invalid_argument(
                        "signature",
                        format!("output symbol '{}' does not appear in any input", sym),
                    )
                })
            })
            .collect()
    }

    /// Output shape for inputs whose first axis is the loop axis
    ///
    /// The loop axis of each input is ignored for symbol matching; the
    /// result is the first input's loop length followed by the first
    /// output's resolved symbols.
    pub fn solve(&self, shapes: &[&[usize]]) -> Result<Shape> {
        let loop_len = match shapes.first() {
            Some(first) if !first.is_empty() => first[0],
            _ => {
                return Err(Error::invalid_argument(
                    "args",
                    "generalized inputs need a leading loop dimension",
                ));
            }
        };
        let cores: Vec<&[usize]> = shapes
            .iter()
            .map(|s| if s.is_empty() { *s } else { &s[1..] })
            .collect();
        let bound = self.bind(&cores)?;
        let mut shape: Shape = smallvec::smallvec![loop_len];
        shape.extend(self.output_core(0, &bound)?);
        Ok(shape)
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ts: &[Template]| {
            ts.iter()
                .map(|t| format!("({})", t.join(",")))
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(f, "{}->{}", join(&self.inputs), join(&self.outputs))
    }
}

fn invalid(text: &str, why: &str) -> Error {
    Error::invalid_argument("signature", format!("{:?}: {}", text, why))
}

/// Parse `(a,b),(c),()` into templates
fn parse_templates(s: &str) -> Option<Vec<Template>> {
    let mut out = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let body = rest.strip_prefix('(')?;
        let close = body.find(')')?;
        let inner = &body[..close];
        let template: Template = if inner.is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(str::to_string).collect()
        };
        if template
            .iter()
            .any(|sym| sym.is_empty() || !sym.chars().all(|c| c.is_alphanumeric() || c == '_'))
        {
            return None;
        }
        out.push(template);
        rest = &body[close + 1..];
        if !rest.is_empty() {
            rest = rest.strip_prefix(',').filter(|tail| !tail.is_empty())?;
        }
    }
    Some(out)
}
