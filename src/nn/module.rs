//! Trainable building blocks.
//!
//! A [`Module`] is anything with a `forward` pass and a list of parameters.
//! Parameters are leaf tensors with `requires_grad = true`; composites report
//! their children's parameters in declaration order, so the order is stable
//! across calls and can be zipped with optimizer state kept elsewhere.
//!
//! Modules add no bookkeeping of their own: the graph is whatever the tensor
//! operations inside `forward` record.

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use rand::Rng;

/// Common interface of every layer.
pub trait Module {
    /// Runs the layer on `input`.
    ///
    /// # Errors
    /// Whatever the underlying tensor operations report, usually
    /// [`Error::Shape`].
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Trainable tensors, recursively, in declaration order.
    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }

    /// Clears the accumulated gradient of every parameter.
    fn zero_grad(&self) {
        for p in self.parameters() {
            p.zero_grad();
        }
    }

    /// Total number of trainable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(Tensor::numel).sum()
    }
}

impl<M: Module + ?Sized> Module for Box<M> {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        (**self).forward(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        (**self).parameters()
    }
}

/// Fully connected layer `y = x @ W + b`.
///
/// `W` has shape `(in_features, out_features)` and `b` has shape
/// `(out_features,)`; `x` may be a single sample `(in_features,)` or a batch
/// `(..., in_features)`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    /// Creates a layer initialised uniformly in `[-1/sqrt(in), 1/sqrt(in))`
    /// from the thread-local generator.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_rng(in_features, out_features, &mut rand::rng())
    }

    /// Same as [`Linear::new`] with an explicit generator, for reproducible
    /// initialisation.
    pub fn with_rng<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let bound = if in_features == 0 {
            0.0
        } else {
            1.0 / (in_features as f64).sqrt()
        };
        let weight = Tensor::rand_uniform(&[in_features, out_features], -bound, bound, rng);
        let bias = Tensor::rand_uniform(&[out_features], -bound, bound, rng);
        Self {
            weight: Tensor::from_buffer(weight.buffer().clone(), true),
            bias: Tensor::from_buffer(bias.buffer().clone(), true),
        }
    }

    /// Builds a layer around existing values, copied into fresh
    /// gradient-requiring leaves.
    ///
    /// # Errors
    /// [`Error::Shape`] unless `weight` is `(in, out)` and `bias` is `(out,)`.
    pub fn from_tensors(weight: &Tensor, bias: &Tensor) -> Result<Self> {
        let [_, out_features] = *weight.shape() else {
            return Err(Error::shape("linear", weight.shape(), bias.shape(), 0));
        };
        if bias.shape() != [out_features] {
            return Err(Error::shape("linear", weight.shape(), bias.shape(), 0));
        }
        Ok(Self {
            weight: Tensor::from_buffer(weight.buffer().clone(), true),
            bias: Tensor::from_buffer(bias.buffer().clone(), true),
        })
    }

    /// Weight matrix `(in_features, out_features)`.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Bias vector `(out_features,)`.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Output width.
    pub fn out_features(&self) -> usize {
        self.weight.shape()[1]
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if input.shape().last() != Some(&self.in_features()) {
            return Err(Error::shape(
                "linear",
                input.shape(),
                self.weight.shape(),
                input.ndim().saturating_sub(1),
            ));
        }
        input.matmul(&self.weight)?.add(&self.bias)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

/// Runs boxed modules one after another.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer (builder style).
    #[must_use]
    pub fn push<M: Module + 'static>(mut self, layer: M) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` without layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(input.clone(), |x, layer| layer.forward(&x))
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}

/// `tanh` as a layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Module for Tanh {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.tanh())
    }
}

/// `sigmoid` as a layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.sigmoid())
    }
}

/// `relu` as a layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Module for Relu {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.relu())
    }
}
