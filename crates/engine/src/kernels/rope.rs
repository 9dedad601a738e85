//! Rotary positional embedding (spec §4.A).
//!
//! Operates over `[batch, seq, heads, head_dim]`. For each adjacent
//! feature pair `(x_{2i}, x_{2i+1})` with angle `θ_i = pos · base^{-2i/head_dim}`:
//! `(x_{2i}·cos − x_{2i+1}·sin, x_{2i}·sin + x_{2i+1}·cos)`, where
//! `pos = position_offset + seq_index`.

pub fn rope_inplace(
    data: &mut [f32],
    batch: usize,
    seq: usize,
    heads: usize,
    head_dim: usize,
    theta: f32,
    position_offset: usize,
) {
    debug_assert_eq!(data.len(), batch * seq * heads * head_dim);
    let half = head_dim / 2;
    for b in 0..batch {
        for s in 0..seq {
            let pos = (position_offset + s) as f32;
            for h in 0..heads {
                let base = ((b * seq + s) * heads + h) * head_dim;
                for i in 0..half {
                    let angle = pos * theta.powf(-2.0 * i as f32 / head_dim as f32);
                    let (sin, cos) = angle.sin_cos();
                    let x0 = data[base + 2 * i];
                    let x1 = data[base + 2 * i + 1];
                    data[base + 2 * i] = x0 * cos - x1 * sin;
                    data[base + 2 * i + 1] = x0 * sin + x1 * cos;
                }
            }
        }
    }
}
