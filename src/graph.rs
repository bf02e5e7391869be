//! Graph nodes and their vector-Jacobian products.
//!
//! Every differentiable operation is a variant of the closed [`Op`] enum.
//! A variant carries whatever the backward rule needs beyond the parents'
//! values and the output value: reduced axes, the exponent, the permutation,
//! argmax positions, label indices. Shapes before broadcasting are read back
//! from the parents themselves.
//!
//! [`Op::vjp`] maps the gradient of the output to one gradient per parent,
//! already reduced to that parent's shape. `None` means the parent receives
//! no gradient from this op (loss targets, labels).

use crate::buffer::Buffer;
use crate::buffer::shape::broadcast_shapes;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// A recorded operation: what ran, and on which inputs.
pub(crate) struct GraphNode {
    pub(crate) op: Op,
    pub(crate) parents: Vec<Tensor>,
}

/// Operation tag plus saved context.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow { exponent: f64 },
    Exp,
    Log,
    MatMul,
    Sum { axes: Vec<usize>, keepdims: bool },
    Max { axis: usize, argmax: Vec<usize> },
    Reshape,
    Permute { perm: Vec<usize> },
    Stack { axis: usize },
    Narrow { axis: usize, start: usize },
    Select { axis: usize, index: usize },
    Tanh,
    Sigmoid,
    Relu,
    MseLoss,
    CrossEntropy { probs: Buffer, labels: Vec<usize> },
}

impl Op {
    /// Name used in logs and `Debug` output.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Add => "AddBackward",
            Self::Sub => "SubBackward",
            Self::Mul => "MulBackward",
            Self::Div => "DivBackward",
            Self::Neg => "NegBackward",
            Self::Pow { .. } => "PowBackward",
            Self::Exp => "ExpBackward",
            Self::Log => "LogBackward",
            Self::MatMul => "MatMulBackward",
            Self::Sum { .. } => "SumBackward",
            Self::Max { .. } => "MaxBackward",
            Self::Reshape => "ReshapeBackward",
            Self::Permute { .. } => "PermuteBackward",
            Self::Stack { .. } => "StackBackward",
            Self::Narrow { .. } => "NarrowBackward",
            Self::Select { .. } => "SelectBackward",
            Self::Tanh => "TanhBackward",
            Self::Sigmoid => "SigmoidBackward",
            Self::Relu => "ReluBackward",
            Self::MseLoss => "MseLossBackward",
            Self::CrossEntropy { .. } => "CrossEntropyBackward",
        }
    }

    /// Vector-Jacobian product of this op.
    ///
    /// `output` is the forward value of the node, `grad` the gradient of the
    /// loss with respect to it (same shape).
    pub(crate) fn vjp(
        &self,
        parents: &[Tensor],
        output: &Buffer,
        grad: &Buffer,
    ) -> Result<Vec<Option<Buffer>>> {
        let x = move || parent_value(parents, 0);
        let y = move || parent_value(parents, 1);

        let grads = match self {
            Self::Add => vec![
                Some(grad.sum_to_shape(x()?.shape())?),
                Some(grad.sum_to_shape(y()?.shape())?),
            ],
            Self::Sub => vec![
                Some(grad.sum_to_shape(x()?.shape())?),
                Some(grad.neg().sum_to_shape(y()?.shape())?),
            ],
            Self::Mul => {
                let (a, b) = (x()?, y()?);
                vec![
                    Some(grad.mul(b)?.sum_to_shape(a.shape())?),
                    Some(grad.mul(a)?.sum_to_shape(b.shape())?),
                ]
            }
            Self::Div => {
                let (a, b) = (x()?, y()?);
                let da = grad.div(b)?;
                // -g * a / b^2
                let db = grad
                    .mul(a)?
                    .zip_map(b, "div", |num, den| -num / (den * den))?;
                vec![
                    Some(da.sum_to_shape(a.shape())?),
                    Some(db.sum_to_shape(b.shape())?),
                ]
            }
            Self::Neg => vec![Some(grad.neg())],
            Self::Pow { exponent } => {
                let n = *exponent;
                #[allow(clippy::float_cmp)]
                let constant = n == 0.0;
                if constant {
                    // x^(n - 1) may be infinite at 0
                    vec![Some(Buffer::zeros(x()?.shape()))]
                } else {
                    let local = x()?.map(move |v| n * v.powf(n - 1.0));
                    vec![Some(grad.mul(&local)?)]
                }
            }
            Self::Exp => vec![Some(grad.mul(output)?)],
            Self::Log => vec![Some(grad.div(x()?)?)],
            Self::MatMul => {
                let (da, db) = matmul_vjp(x()?, y()?, grad)?;
                vec![Some(da), Some(db)]
            }
            Self::Sum { axes, keepdims } => {
                let source = x()?.shape();
                vec![Some(expand_reduced(grad, source, axes, *keepdims)?)]
            }
            Self::Max { axis, argmax } => {
                vec![Some(grad.scatter_axis(x()?.shape(), *axis, argmax))]
            }
            Self::Reshape => vec![Some(grad.reshape(x()?.shape())?)],
            Self::Permute { perm } => {
                let mut inverse = vec![0; perm.len()];
                for (i, &p) in perm.iter().enumerate() {
                    inverse[p] = i;
                }
                vec![Some(grad.permute(&inverse)?.into_contiguous())]
            }
            Self::Stack { axis } => parents
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let slice = grad.narrow(*axis, i, 1)?;
                    slice.reshape(p.shape()).map(Some)
                })
                .collect::<Result<Vec<_>>>()?,
            Self::Narrow { axis, start } => {
                vec![Some(grad.embed(x()?.shape(), *axis, *start))]
            }
            Self::Select { axis, index } => {
                let source = x()?.shape();
                let mut narrowed = source.to_vec();
                narrowed[*axis] = 1;
                let g = grad.reshape(&narrowed)?;
                vec![Some(g.embed(source, *axis, *index))]
            }
            Self::Tanh => {
                let local = output.map(|t| 1.0 - t * t);
                vec![Some(grad.mul(&local)?)]
            }
            Self::Sigmoid => {
                let local = output.map(|s| s * (1.0 - s));
                vec![Some(grad.mul(&local)?)]
            }
            Self::Relu => {
                let mask = x()?.map(|v| if v > 0.0 { 1.0 } else { 0.0 });
                vec![Some(grad.mul(&mask)?)]
            }
            Self::MseLoss => {
                let (pred, target) = (x()?, y()?);
                let n = pred.len() as f64;
                let diff = pred.sub(target)?.scale(2.0 / n);
                vec![Some(diff.mul(grad)?), None]
            }
            Self::CrossEntropy { probs, labels } => {
                let classes = probs.shape()[1];
                let n = labels.len() as f64;
                let mut d = probs.to_vec();
                for (row, &label) in labels.iter().enumerate() {
                    d[row * classes + label] -= 1.0;
                }
                let d = Buffer::new(d, x()?.shape())?.scale(1.0 / n);
                vec![Some(d.mul(grad)?), None]
            }
        };
        Ok(grads)
    }
}

fn parent_value(parents: &[Tensor], i: usize) -> Result<&Buffer> {
    parents
        .get(i)
        .map(Tensor::buffer)
        .ok_or_else(|| Error::GraphMisuse(format!("graph node is missing parent {i}")))
}

/// Broadcasts the gradient of a sum back over the reduced axes.
fn expand_reduced(
    grad: &Buffer,
    source: &[usize],
    axes: &[usize],
    keepdims: bool,
) -> Result<Buffer> {
    let kept: Vec<usize> = source
        .iter()
        .enumerate()
        .map(|(d, &size)| if axes.contains(&d) { 1 } else { size })
        .collect();
    let g = if keepdims { grad.clone() } else { grad.reshape(&kept)? };
    Ok(g.broadcast_to(source)?.into_contiguous())
}

/// `grad @ y^T` for the left operand and `x^T @ grad` for the right one,
/// in promoted (matrix) form, then reduced over broadcast batch dimensions.
fn matmul_vjp(a: &Buffer, b: &Buffer, grad: &Buffer) -> Result<(Buffer, Buffer)> {
    let pa = a.promote_matrix(true)?;
    let pb = b.promote_matrix(false)?;
    let (ar, br) = (pa.ndim(), pb.ndim());

    // gradient in the promoted output shape: batch + [m, n]
    let mut out_shape = broadcast_shapes("matmul", &pa.shape()[..ar - 2], &pb.shape()[..br - 2])?;
    out_shape.push(pa.shape()[ar - 2]);
    out_shape.push(pb.shape()[br - 1]);
    let g = grad.reshape(&out_shape)?;

    let da = g.matmul(&pb.transpose_last2()?)?;
    let db = pa.transpose_last2()?.matmul(&g)?;

    let da = da.sum_to_shape(pa.shape())?.reshape(a.shape())?;
    let db = db.sum_to_shape(pb.shape())?.reshape(b.shape())?;
    Ok((da, db))
}
