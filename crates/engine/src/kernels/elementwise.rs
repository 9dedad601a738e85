//! Element-wise binary operators over contiguous buffers (spec §4.A).
//!
//! No allocation; the caller supplies the output buffer. Deterministic
//! modulo floating-point nondeterminism; safe to call concurrently on
//! disjoint outputs.

use crate::graph::{BinaryOp, BroadcastInfo};

fn apply(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    }
}

/// Same-shape fast path: `out[i] = op(a[i], b[i])`.
pub fn binary_contiguous(op: BinaryOp, a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    for i in 0..out.len() {
        out[i] = apply(op, a[i], b[i]);
    }
}

/// Broadcast path: walks `out`'s logical index space, mapping each
/// operand's logical index to its physical offset via its stride array
/// (0-stride over broadcast axes).
pub fn binary_broadcast(op: BinaryOp, a: &[f32], b: &[f32], out: &mut [f32], info: &BroadcastInfo) {
    let shape = &info.output_shape;
    let total: usize = shape.iter().product();
    debug_assert_eq!(out.len(), total);
    let rank = shape.len();
    let mut idx = vec![0usize; rank];
    for flat in 0..total {
        let mut a_off = 0usize;
        let mut b_off = 0usize;
        for d in 0..rank {
            a_off += idx[d] * info.lhs_strides[d];
            b_off += idx[d] * info.rhs_strides[d];
        }
        out[flat] = apply(op, a[a_off], b[b_off]);
        for d in (0..rank).rev() {
            idx[d] += 1;
            if idx[d] < shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}
