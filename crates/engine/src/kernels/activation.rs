//! Activation functions (spec §4.A).

/// `x · σ(x)`.
pub fn silu(input: &[f32], out: &mut [f32]) {
    debug_assert_eq!(input.len(), out.len());
    for (dst, &x) in out.iter_mut().zip(input) {
        *dst = x * (1.0 / (1.0 + (-x).exp()));
    }
}

/// tanh approximation, acceptable per spec.
pub fn gelu(input: &[f32], out: &mut [f32]) {
    debug_assert_eq!(input.len(), out.len());
    const C: f32 = 0.797_884_6; // sqrt(2/pi)
    for (dst, &x) in out.iter_mut().zip(input) {
        let inner = C * (x + 0.044715 * x * x * x);
        *dst = 0.5 * x * (1.0 + inner.tanh());
    }
}
