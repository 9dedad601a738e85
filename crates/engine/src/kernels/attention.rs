//! Scaled dot-product attention with grouped-query support (spec §4.A).
//!
//! Layout: `query[seq_q, q_heads, head_dim]`, `key`/`value`
//! `[seq_kv, kv_heads, head_dim]`, contiguous row-major. Each q-head
//! attends to `kv_head = q_head / (q_heads / kv_heads)`.
//!
//! `position_offset` anchors the causal mask so that a prefill of
//! length `L` admits query positions `[position_offset, position_offset+L)`
//! against key positions `[0, position_offset+L)`.

pub fn attention(
    query: &[f32],
    key: &[f32],
    value: &[f32],
    out: &mut [f32],
    seq_q: usize,
    seq_kv: usize,
    q_heads: usize,
    kv_heads: usize,
    head_dim: usize,
    scale: f32,
    causal: bool,
    window_size: usize,
    position_offset: usize,
) {
    debug_assert_eq!(query.len(), seq_q * q_heads * head_dim);
    debug_assert_eq!(key.len(), seq_kv * kv_heads * head_dim);
    debug_assert_eq!(value.len(), seq_kv * kv_heads * head_dim);
    debug_assert_eq!(out.len(), seq_q * q_heads * head_dim);

    let group = q_heads / kv_heads;
    let mut scores = vec![0.0f32; seq_kv];

    for qh in 0..q_heads {
        let kvh = qh / group;
        for qi in 0..seq_q {
            let q_pos = position_offset + qi;
            let q_base = (qi * q_heads + qh) * head_dim;

            let lower_bound = if window_size > 0 {
                q_pos.saturating_sub(window_size - 1)
            } else {
                0
            };

            let mut max_score = f32::NEG_INFINITY;
            for ki in 0..seq_kv {
                let admitted = (!causal || ki <= q_pos) && ki >= lower_bound && ki < seq_kv;
                if !admitted {
                    scores[ki] = f32::NEG_INFINITY;
                    continue;
                }
                let k_base = (ki * kv_heads + kvh) * head_dim;
                let mut dot = 0.0f32;
                for d in 0..head_dim {
                    dot += query[q_base + d] * key[k_base + d];
                }
                let s = dot * scale;
                scores[ki] = s;
                if s > max_score {
                    max_score = s;
                }
            }

            let mut sum = 0.0f32;
            for s in scores.iter_mut() {
                *s = if s.is_finite() {
                    let e = (*s - max_score).exp();
                    sum += e;
                    e
                } else {
                    0.0
                };
            }

            let out_base = (qi * q_heads + qh) * head_dim;
            for d in 0..head_dim {
                out[out_base + d] = 0.0;
            }
            for ki in 0..seq_kv {
                let w = scores[ki] / sum;
                if w == 0.0 {
                    continue;
                }
                let v_base = (ki * kv_heads + kvh) * head_dim;
                for d in 0..head_dim {
                    out[out_base + d] += w * value[v_base + d];
                }
            }
        }
    }
}
