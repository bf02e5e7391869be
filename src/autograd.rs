//! Reverse-mode traversal.
//!
//! # Backward pass
//!
//! 1. Validate the root and its seed (ones by default, leaves need one).
//! 2. Depth-first search from the root, parents before children, with a
//!    `Visiting`/`Done` state per tensor. Meeting a `Visiting` tensor again
//!    means a cycle and aborts the pass.
//! 3. Give every reachable tensor a dense handle in a per-call arena, in
//!    post-order. Processing handles in reverse guarantees that each node's
//!    gradient is complete before its rule runs.
//! 4. Run each node's vector-Jacobian product and add (`+=`) the results into
//!    the parents' arena slots.
//! 5. Commit: add every arena gradient into the owning tensor's persistent
//!    gradient.
//!
//! Nothing persistent is touched before step 5, so a failing rule leaves
//! every gradient exactly as it was. Gradients from earlier passes are never
//! cleared here; that is the caller's job (`zero_grad`).

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::collections::HashMap;
use tracing::{debug, instrument, trace_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Visiting,
    Done,
}

/// Runs a full backward pass from `root`.
#[instrument(level = "debug", skip_all, fields(shape = ?root.shape()))]
pub(crate) fn backward(root: &Tensor, seed: Option<&Buffer>) -> Result<()> {
    if !root.requires_grad() {
        return Err(Error::GraphMisuse(
            "tensor does not require grad and has no recorded operation".into(),
        ));
    }
    if root.is_leaf() && seed.is_none() {
        return Err(Error::GraphMisuse(
            "backward() on a leaf needs an explicit seed gradient".into(),
        ));
    }
    let seed = match seed {
        Some(seed) if seed.shape() != root.shape() => {
            return Err(Error::GraphMisuse(format!(
                "seed gradient of shape {:?} does not match output shape {:?}",
                seed.shape(),
                root.shape()
            )));
        }
        Some(seed) => seed.clone(),
        None => Buffer::ones(root.shape()),
    };

    let order = topological_order(root)?;
    let handles: HashMap<u64, usize> = order
        .iter()
        .enumerate()
        .map(|(handle, tensor)| (tensor.id(), handle))
        .collect();

    let mut grads: Vec<Option<Buffer>> = vec![None; order.len()];
    grads[order.len() - 1] = Some(seed);

    for (handle, tensor) in order.iter().enumerate().rev() {
        let Some(node) = tensor.node() else { continue };
        let Some(grad) = grads[handle].clone() else { continue };

        let _span = trace_span!("vjp", op = node.op.name()).entered();
        let parent_grads = node.op.vjp(&node.parents, tensor.buffer(), &grad)?;

        for (parent, parent_grad) in node.parents.iter().zip(parent_grads) {
            let Some(parent_grad) = parent_grad else { continue };
            let Some(&slot) = handles.get(&parent.id()) else { continue };
            match grads[slot].as_mut() {
                Some(existing) => existing.add_assign(&parent_grad)?,
                None => grads[slot] = Some(parent_grad),
            }
        }
    }

    for (tensor, grad) in order.iter().zip(&grads) {
        let Some(grad) = grad else { continue };
        if tensor.is_leaf() && grad.to_vec().iter().any(|g| !g.is_finite()) {
            warn!(shape = ?tensor.shape(), "non-finite gradient reached a leaf tensor");
        }
    }

    // every rule succeeded, publish
    for (tensor, grad) in order.iter().zip(grads) {
        if let Some(grad) = grad {
            tensor.accumulate_grad(&grad)?;
        }
    }

    debug!(nodes = order.len(), "backward pass complete");
    Ok(())
}

/// Post-order of the gradient-requiring subgraph under `root`; the root is last.
fn topological_order(root: &Tensor) -> Result<Vec<Tensor>> {
    let mut state: HashMap<u64, Visit> = HashMap::new();
    let mut order = Vec::new();
    let mut stack: Vec<(Tensor, usize)> = vec![(root.clone(), 0)];
    state.insert(root.id(), Visit::Visiting);

    while let Some(top) = stack.last_mut() {
        let next = top.0.parents().get(top.1).cloned();
        top.1 += 1;

        match next {
            Some(parent) => {
                if !parent.requires_grad() {
                    continue;
                }
                match state.get(&parent.id()) {
                    Some(Visit::Visiting) => {
                        return Err(Error::GraphMisuse(format!(
                            "cycle detected through tensor {}",
                            parent.id()
                        )));
                    }
                    Some(Visit::Done) => {}
                    None => {
                        state.insert(parent.id(), Visit::Visiting);
                        stack.push((parent, 0));
                    }
                }
            }
            None => {
                if let Some((tensor, _)) = stack.pop() {
                    state.insert(tensor.id(), Visit::Done);
                    order.push(tensor);
                }
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn diamond_is_visited_once_and_root_is_last() {
        let x = tensor!([1.0, 2.0]; requires_grad);
        let a = &x * 2.0;
        let b = &x * 3.0;
        let y = (&a + &b).sum_all();
        let order = topological_order(&y).unwrap();
        assert_eq!(order.last().unwrap().id(), y.id());
        let x_count = order.iter().filter(|t| t.id() == x.id()).count();
        assert_eq!(x_count, 1);
        // parents precede children
        let pos = |t: &Tensor| order.iter().position(|o| o.id() == t.id()).unwrap();
        assert!(pos(&x) < pos(&a) && pos(&x) < pos(&b));
        assert!(pos(&a) < pos(&y) && pos(&b) < pos(&y));
    }

    #[test]
    fn constants_are_not_visited() {
        let x = tensor!([1.0, 2.0]; requires_grad);
        let c = tensor!([5.0, 5.0]);
        let y = (&x * &c).sum_all();
        let order = topological_order(&y).unwrap();
        assert!(order.iter().all(|t| t.id() != c.id()));
    }
}
