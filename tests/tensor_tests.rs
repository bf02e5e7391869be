use briny_grad::config::{self, Execution};
use briny_grad::{Buffer, Error, Tensor, assert_allclose, stack, tensor};
use rand::{SeedableRng, rngs::StdRng};

fn rand_leaf(rng: &mut StdRng, shape: &[usize]) -> Tensor {
    let t = Tensor::rand_uniform(shape, -1.0, 1.0, rng);
    t.requires_grad_(true).unwrap();
    t
}

#[test]
fn test_tensor_creation() {
    let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2], false).unwrap();
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.data(), vec![1.0, 2.0, 3.0, 4.0]);
    assert!(t.is_leaf());
    assert!(!t.requires_grad());
    assert!(t.grad().is_none());
}

#[test]
fn test_tensor_shape_mismatch_is_error() {
    let result = Tensor::new(vec![1.0, 2.0, 3.0], [2, 2], false);
    assert!(matches!(result, Err(Error::Shape { .. })));
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.data(), vec![1.0, 2.0, 3.0, 4.0]);

    let labels = tensor!([[0], [1], [1], [0]]);
    assert_eq!(labels.shape(), &[4, 1]);
    assert_eq!(labels.data(), vec![0.0, 1.0, 1.0, 0.0]);

    let w = tensor!(vec![0.5, 0.25]; requires_grad);
    assert!(w.requires_grad());
}

#[test]
fn test_item_needs_one_element() {
    assert_eq!(tensor!([7.0]).item().unwrap(), 7.0);
    assert!(tensor!([1.0, 2.0]).item().is_err());
}

#[test]
fn test_broadcast_commutativity() {
    let mut rng = StdRng::seed_from_u64(7);
    let a = rand_leaf(&mut rng, &[3, 1]);
    let b = rand_leaf(&mut rng, &[1, 4]);

    let ab = &a + &b;
    ab.sum_all().backward().unwrap();
    let (ga, gb) = (a.grad().unwrap(), b.grad().unwrap());
    a.zero_grad();
    b.zero_grad();

    let ba = &b + &a;
    ba.sum_all().backward().unwrap();

    assert_eq!(ab.shape(), &[3, 4]);
    assert_eq!(ab.data(), ba.data());
    assert_eq!(ga, a.grad().unwrap());
    assert_eq!(gb, b.grad().unwrap());
    assert_eq!(ga.to_vec(), vec![4.0; 3]);
    assert_eq!(gb.to_vec(), vec![3.0; 4]);
}

#[test]
fn test_broadcast_scalar_operand() {
    let x = tensor!([[1.0, 2.0], [3.0, 4.0]]; requires_grad);
    let s = tensor!(3.0; requires_grad);

    let y = &x * &s;
    y.sum_all().backward().unwrap();

    assert_eq!(y.data(), vec![3.0, 6.0, 9.0, 12.0]);
    assert_eq!(x.grad().unwrap().to_vec(), vec![3.0; 4]);
    assert_eq!(s.grad().unwrap().shape(), &[] as &[usize]);
    assert_eq!(s.grad().unwrap().to_vec(), vec![10.0]);
}

#[test]
fn test_broadcast_incompatible() {
    let x = Tensor::zeros(&[2, 3]);
    let y = Tensor::zeros(&[4]);
    assert!(matches!(x.add(&y), Err(Error::Shape { op: "add", .. })));
}

#[test]
#[should_panic(expected = "incompatible shapes")]
fn test_operator_panics_on_mismatch() {
    let _ = &Tensor::zeros(&[2]) + &Tensor::zeros(&[3]);
}

#[test]
fn test_scalar_operands() {
    let x = tensor!([1.0, 2.0]; requires_grad);
    let y = &(&(2.0 - &x) * 3.0) / 2.0;
    assert_eq!(y.data(), vec![1.5, 0.0]);

    y.sum_all().backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec(), vec![-1.5, -1.5]);

    let n = -&x;
    assert_eq!(n.data(), vec![-1.0, -2.0]);
}

#[test]
fn test_axis_out_of_range() {
    let x = Tensor::zeros(&[2, 3]);
    assert!(matches!(x.sum(Some(2), false), Err(Error::Axis { axis: 2, ndim: 2, .. })));
    assert!(matches!(x.max(-3, false), Err(Error::Axis { .. })));
    assert!(matches!(x.transpose(0, 5), Err(Error::Axis { .. })));
}

#[test]
fn test_reshape_count_mismatch() {
    let x = Tensor::zeros(&[2, 3]);
    assert!(matches!(x.reshape(&[4, 2]), Err(Error::Shape { .. })));
    assert!(x.reshape(&[-1, -1]).is_err());
}

#[test]
fn test_permute_routes_gradient() {
    let mut rng = StdRng::seed_from_u64(11);
    let x = rand_leaf(&mut rng, &[2, 3, 4]);
    let w = Tensor::rand_uniform(&[4, 2, 3], -1.0, 1.0, &mut rng);

    let p = x.permute(&[2, 0, 1]).unwrap();
    assert_eq!(p.shape(), &[4, 2, 3]);
    (&p * &w).sum_all().backward().unwrap();

    let (xd, pd, wd, g) = (x.data(), p.data(), w.data(), x.grad().unwrap().to_vec());
    for i in 0..2 {
        for j in 0..3 {
            for k in 0..4 {
                let src = (i * 3 + j) * 4 + k;
                let dst = (k * 2 + i) * 3 + j;
                assert_eq!(pd[dst], xd[src]);
                assert_eq!(g[src], wd[dst]);
            }
        }
    }
}

#[test]
fn test_transpose_negative_axes() {
    let x = Tensor::new((0..24).map(f64::from).collect(), [2, 3, 4], false).unwrap();
    let t = x.transpose(-1, -2).unwrap();
    assert_eq!(t.shape(), &[2, 4, 3]);
    assert_eq!(t.buffer().get(&[1, 3, 2]), x.buffer().get(&[1, 2, 3]));
}

#[test]
fn test_narrow_and_select() {
    let x = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]; requires_grad);

    let n = x.narrow(1, 1, 2).unwrap();
    assert_eq!(n.data(), vec![2.0, 3.0, 5.0, 6.0]);
    let s = x.select(0, 1).unwrap();
    assert_eq!(s.shape(), &[3]);
    assert_eq!(s.data(), vec![4.0, 5.0, 6.0]);

    (&n.sum_all() + &(&s * 10.0).sum_all()).backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec(), vec![0.0, 1.0, 1.0, 10.0, 11.0, 11.0]);

    assert!(matches!(x.narrow(1, 2, 2), Err(Error::Shape { .. })));
}

#[test]
fn test_rows_iterate_leading_dimension() {
    let x = tensor!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]; requires_grad);
    let rows = x.rows().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].data(), vec![5.0, 6.0]);

    let mut total = Tensor::scalar(0.0);
    for (i, row) in rows.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let weight = (i + 1) as f64;
        total += &(row * weight).sum_all();
    }
    total.backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
}

#[test]
fn test_stack_axes_and_errors() {
    let x = tensor!([1.0, 2.0]);
    let y = tensor!([3.0, 4.0]);
    let s = stack(&[x.clone(), y.clone()], -1).unwrap();
    assert_eq!(s.shape(), &[2, 2]);
    assert_eq!(s.data(), vec![1.0, 3.0, 2.0, 4.0]);

    assert!(matches!(stack(&[x.clone(), tensor!([1.0])], 0), Err(Error::Shape { .. })));
    assert!(matches!(stack(&[], 0), Err(Error::Shape { .. })));
    assert!(matches!(stack(&[x, y], 2), Err(Error::Axis { .. })));
}

#[test]
fn test_batched_matmul_broadcast() {
    let mut rng = StdRng::seed_from_u64(13);
    let a = rand_leaf(&mut rng, &[2, 3, 4]);
    let b = rand_leaf(&mut rng, &[4, 5]);

    let c = a.matmul(&b).unwrap();
    assert_eq!(c.shape(), &[2, 3, 5]);
    c.sum_all().backward().unwrap();

    let (ad, bd) = (a.data(), b.data());
    let gb = b.grad().unwrap().to_vec();
    let ga = a.grad().unwrap().to_vec();
    for k in 0..4 {
        let col_sum: f64 = (0..6).map(|r| ad[r * 4 + k]).sum();
        let row_sum: f64 = (0..5).map(|j| bd[k * 5 + j]).sum();
        for j in 0..5 {
            assert!((gb[k * 5 + j] - col_sum).abs() < 1e-12);
        }
        for r in 0..6 {
            assert!((ga[r * 4 + k] - row_sum).abs() < 1e-12);
        }
    }
}

#[test]
fn test_matmul_vector_promotion() {
    let v = tensor!([1.0, 2.0, 3.0]; requires_grad);
    let m = tensor!([[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]; requires_grad);

    let vm = v.matmul(&m).unwrap();
    assert_eq!(vm.shape(), &[2]);
    assert_eq!(vm.data(), vec![4.0, 5.0]);

    let dot = v.matmul(&v).unwrap();
    assert_eq!(dot.ndim(), 0);
    assert_eq!(dot.item().unwrap(), 14.0);

    vm.sum_all().backward().unwrap();
    assert_eq!(v.grad().unwrap().to_vec(), vec![1.0, 1.0, 2.0]);
    assert_eq!(m.grad().unwrap().to_vec(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

    assert!(matches!(m.matmul(&m), Err(Error::Shape { op: "matmul", .. })));
}

#[test]
fn test_exp_log() {
    let x = tensor!([0.5, 1.0, 2.0]; requires_grad);
    let y = x.log().exp();
    assert_allclose!(y.data(), [0.5, 1.0, 2.0]);
    y.sum_all().backward().unwrap();
    assert_allclose!(x.grad().unwrap().to_vec(), [1.0, 1.0, 1.0]);

    assert_eq!(tensor!([f64::NEG_INFINITY]).exp().data(), vec![0.0]);
}

#[test]
fn test_parallel_kernels_agree() {
    let mut rng = StdRng::seed_from_u64(17);
    let a = Tensor::rand_uniform(&[16, 32], -1.0, 1.0, &mut rng);
    let b = Tensor::rand_uniform(&[32, 8], -1.0, 1.0, &mut rng);
    let run = || {
        let product = a.matmul(&b).unwrap().tanh().data();
        let column_sums = (&a * &a).sum(Some(0), false).unwrap().data();
        (product, column_sums)
    };

    config::set_execution(Execution::Sequential);
    let sequential = run();
    config::set_execution(Execution::Parallel);
    let parallel = run();
    config::set_execution(Execution::Auto);

    assert_eq!(sequential, parallel);
}

#[test]
fn test_buffer_views_share_storage() {
    let b = Buffer::new((0..6).map(f64::from).collect(), [2, 3]).unwrap();
    let t = b.transpose(0, 1).unwrap();
    assert!(!t.is_contiguous());
    assert_eq!(t.into_contiguous().to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    assert_eq!(b.narrow(1, 1, 1).unwrap().to_vec(), vec![1.0, 4.0]);
}
