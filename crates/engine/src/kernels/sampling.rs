//! Temperature / top-k / nucleus sampling (spec §4.A).
//!
//! `temperature = 0` degenerates to argmax. `top_k = 0` disables top-k.
//! `top_p >= 1` disables nucleus filtering.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn sample(logits: &[f32], temperature: f32, top_p: f32, top_k: usize, seed: u64) -> u32 {
    if temperature == 0.0 {
        return argmax(logits);
    }

    let scaled: Vec<f32> = logits.iter().map(|&x| x / temperature).collect();

    let mut order: Vec<usize> = (0..scaled.len()).collect();
    order.sort_unstable_by(|&a, &b| scaled[b].partial_cmp(&scaled[a]).unwrap());

    let k = if top_k == 0 { order.len() } else { top_k.min(order.len()) };
    order.truncate(k);

    let max = order.iter().map(|&i| scaled[i]).fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = order.iter().map(|&i| (scaled[i] - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }

    if top_p < 1.0 {
        let mut cum = 0.0f32;
        let mut cutoff = probs.len();
        for (i, &p) in probs.iter().enumerate() {
            cum += p;
            if cum >= top_p {
                cutoff = i + 1;
                break;
            }
        }
        order.truncate(cutoff);
        probs.truncate(cutoff);
        let renorm: f32 = probs.iter().sum();
        for p in probs.iter_mut() {
            *p /= renorm;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let draw: f32 = rng.gen();
    let mut cum = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cum += p;
        if draw <= cum {
            return order[i] as u32;
        }
    }
    *order.last().unwrap() as u32
}

fn argmax(logits: &[f32]) -> u32 {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    best_idx as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_is_deterministic_at_zero_temperature() {
        let logits = [0.1, 0.2, 0.9, 0.05];
        assert_eq!(sample(&logits, 0.0, 1.0, 0, 0), 2);
        assert_eq!(sample(&logits, 0.0, 1.0, 0, 42), 2);
    }

    #[test]
    fn top_k_one_is_equivalent_to_argmax() {
        let logits = [1.0, 5.0, 2.0, 0.0];
        assert_eq!(sample(&logits, 1.0, 1.0, 1, 7), 1);
    }
}
