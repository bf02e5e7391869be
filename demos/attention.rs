//! Causal self-attention on random inputs: forward, backward and a
//! finite-difference check of the gradients.

use briny_grad::gradcheck::{GradCheckConfig, check_gradients};
use briny_grad::{Result, Tensor, softmax};
use rand::{SeedableRng, rngs::StdRng};
use tracing_subscriber::EnvFilter;

const SEQ_LEN: usize = 20;

fn causal_mask() -> Result<Tensor> {
    let data = (0..SEQ_LEN * SEQ_LEN)
        .map(|n| if n % SEQ_LEN > n / SEQ_LEN { f64::NEG_INFINITY } else { 0.0 })
        .collect();
    Tensor::new(data, [1, 1, SEQ_LEN, SEQ_LEN], false)
}

fn attention(k: &Tensor, q: &Tensor, v: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (t, c) = (k.shape()[2], k.shape()[3]);
    #[allow(clippy::cast_precision_loss)]
    let scale = (c as f64).powf(-0.5);
    let wei = &q.matmul(&k.transpose(-1, -2)?)? * scale;
    let wei = mask.narrow(2, 0, t)?.narrow(3, 0, t)?.add(&wei)?;
    softmax(&wei, -1)?.matmul(v)
}

fn leaf(shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
    let t = Tensor::rand_uniform(shape, 0.0, 1.0, rng);
    t.requires_grad_(true)?;
    Ok(t)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut rng = StdRng::seed_from_u64(69420);
    let shape = [3, 5, 7, 9];
    let (k, q, v) = (
        leaf(&shape, &mut rng)?,
        leaf(&shape, &mut rng)?,
        leaf(&shape, &mut rng)?,
    );
    let mask = causal_mask()?;

    let out = attention(&k, &q, &v, &mask)?;
    out.sum_all().backward()?;
    println!("output shape {:?}", out.shape());
    for (name, t) in [("k", &k), ("q", &q), ("v", &v)] {
        let g = t.grad().map(|g| g.to_vec()).unwrap_or_default();
        let norm = g.iter().map(|x| x * x).sum::<f64>().sqrt();
        println!("|d{name}| = {norm:.6} (finite: {})", g.iter().all(|x| x.is_finite()));
    }

    let f = |x: &[Tensor]| attention(&x[0], &x[1], &x[2], &mask);
    let small = [1, 2, 4, 3];
    let inputs = (0..3)
        .map(|_| leaf(&small, &mut rng))
        .collect::<Result<Vec<_>>>()?;
    let report = check_gradients(f, &inputs, &GradCheckConfig::default())?;
    println!(
        "gradcheck: {} elements, {} failures, max |diff| = {:e}",
        report.num_elements, report.num_failures, report.max_abs_diff
    );
    Ok(())
}
