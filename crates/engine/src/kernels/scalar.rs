//! Scalar-in-tensor operators (spec §4.A).

use crate::graph::ScalarOp;

pub fn scalar_op(op: ScalarOp, input: &[f32], value: f32, out: &mut [f32]) {
    debug_assert_eq!(input.len(), out.len());
    for (dst, &x) in out.iter_mut().zip(input) {
        *dst = match op {
            ScalarOp::Add => x + value,
            ScalarOp::Sub => x - value,
            ScalarOp::Mul => x * value,
            ScalarOp::Div => x / value,
            ScalarOp::Exp => x.exp(),
            ScalarOp::Sqrt => x.sqrt(),
            ScalarOp::Cos => x.cos(),
            ScalarOp::Sin => x.sin(),
        };
    }
}
