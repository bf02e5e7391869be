//! Neural-network layer: activations and losses as free functions, plus the
//! [`Module`] trait with a few ready-made layers.

pub mod functional;
pub mod module;

pub use module::{Linear, Module, Relu, Sequential, Sigmoid, Tanh};
