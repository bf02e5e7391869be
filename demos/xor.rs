//! Accumulates the XOR loss of a 2-2-1 tanh network over two passes of the
//! dataset and prints the resulting gradients.
//!
//! Run with `RUST_LOG=briny_grad=debug` to see the backward pass logs.

use briny_grad::nn::{Module, Tanh};
use briny_grad::{Linear, Sequential, Tensor, mse_loss, tensor};
use tracing_subscriber::EnvFilter;

fn main() -> briny_grad::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let inputs = tensor!([[0, 0], [1, 0], [0, 1], [1, 1]]);
    let targets = tensor!([[0], [1], [1], [0]]);

    let model = Sequential::new()
        .push(Linear::new(2, 2))
        .push(Tanh)
        .push(Linear::new(2, 1))
        .push(Tanh);
    println!("model has {} parameters", model.num_parameters());

    let mut loss = Tensor::from_vec(vec![0.0]);
    for epoch in 0..2 {
        for (x, y) in inputs.rows()?.iter().zip(targets.rows()?) {
            let pred = model.forward(x)?;
            let step = mse_loss(&pred, &y)?;
            println!(
                "epoch {epoch}: x={:?} pred={:.4} loss={:.4}",
                x.data(),
                pred.item()?,
                step.item()?
            );
            loss += &step;
        }
    }

    loss.backward()?;
    println!("\ntotal loss = {:.6}", loss.item()?);
    for (i, p) in model.parameters().iter().enumerate() {
        let grad = p.grad().map(|g| g.to_vec()).unwrap_or_default();
        println!("param {i} {:?}: grad = {grad:?}", p.shape());
    }
    Ok(())
}
