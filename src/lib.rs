//! # `briny_grad`
//!
//! A small tensor library with reverse-mode automatic differentiation,
//! built on CPU kernels parallelised with Rayon.
//!
//! ## Features
//!
//! - **Buffers**: strided n-dimensional `f64` storage with NumPy-style
//!   broadcasting, zero-copy reshape/permute/narrow views and batched matmul
//! - **Tensors**: cheap shared handles that record the operations applied to
//!   them while gradient mode is on
//! - **Autograd**: `backward()` walks the recorded graph in reverse
//!   topological order and accumulates gradients into every tensor that
//!   requires them
//! - **Modules**: `Linear`, `Sequential` and activation layers behind a
//!   common [`Module`] trait
//!
//! ## Example
//!
//! ```rust
//! use briny_grad::tensor;
//!
//! let x = tensor!([[1.0, 2.0], [3.0, 4.0]]; requires_grad);
//! let y = tensor!([[5.0, 6.0], [7.0, 8.0]]; requires_grad);
//! let z = x.matmul(&y).unwrap().sum_all();
//! z.backward().unwrap();
//!
//! // d(sum(x @ y))/dx = ones @ y^T
//! assert_eq!(x.grad().unwrap().to_vec(), vec![11.0, 15.0, 11.0, 15.0]);
//! ```
//!
//! Graphs are single threaded: tensors are `Rc` handles and are neither
//! `Send` nor `Sync`. Kernels may still fan out over Rayon's pool, see
//! [`config::set_parallel_threshold`].

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]
#![deny(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

pub mod approx;
mod autograd;
pub mod backprop;
pub mod buffer;
pub mod config;
pub mod error;
pub mod gradcheck;
mod graph;
pub mod nn;
pub mod tensor;

pub use backprop::stack;
pub use buffer::Buffer;
pub use error::{Error, Result};
pub use nn::functional::{cross_entropy, mse_loss, relu, sigmoid, softmax, tanh};
pub use nn::{Linear, Module, Sequential};
pub use tensor::{NestedData, Tensor};
