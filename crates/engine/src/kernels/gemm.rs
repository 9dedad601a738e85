//! Dense matrix multiply, `C[M×N] = A[M×K] · Bᵀ[N×K]` (spec §4.A).
//!
//! Parallelizes over output rows via the process-wide thread pool when
//! the problem is large enough to be worth the fork/join cost; small
//! problems fall back to a single-threaded loop (spec §5, dimension-aware
//! dispatch).

use rayon::prelude::*;

use crate::threadpool;

const PARALLEL_THRESHOLD: usize = 64 * 64;

/// F32×F32→F32 and F16-widened-to-F32 paths share this core: both
/// operands and output already dequantized to `f32`.
pub fn gemm_f32(a: &[f32], b_t: &[f32], out: &mut [f32], m: usize, n: usize, k: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b_t.len(), n * k);
    debug_assert_eq!(out.len(), m * n);

    let compute_row = |i: usize, row: &mut [f32]| {
        let a_row = &a[i * k..(i + 1) * k];
        for (j, dst) in row.iter_mut().enumerate() {
            let b_row = &b_t[j * k..(j + 1) * k];
            let mut sum = 0.0f32;
            for t in 0..k {
                sum += a_row[t] * b_row[t];
            }
            *dst = sum;
        }
    };

    if m * n >= PARALLEL_THRESHOLD {
        threadpool::pool().install(|| {
            out.par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, row)| compute_row(i, row));
        });
    } else {
        for (i, row) in out.chunks_mut(n).enumerate() {
            compute_row(i, row);
        }
    }
}

/// Quantized I8 path: accumulates in `i32`, then scales and saturates:
/// `round((sum · a_s · b_s) / c_s)` clamped to `[-128, 127]`.
pub fn gemm_i8(
    a: &[i8],
    b_t: &[i8],
    out: &mut [i8],
    m: usize,
    n: usize,
    k: usize,
    a_scale: f32,
    b_scale: f32,
    c_scale: f32,
) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b_t.len(), n * k);
    debug_assert_eq!(out.len(), m * n);

    let compute_row = |i: usize, row: &mut [i8]| {
        let a_row = &a[i * k..(i + 1) * k];
        for (j, dst) in row.iter_mut().enumerate() {
            let b_row = &b_t[j * k..(j + 1) * k];
            let mut sum: i32 = 0;
            for t in 0..k {
                sum += a_row[t] as i32 * b_row[t] as i32;
            }
            let scaled = (sum as f32 * a_scale * b_scale) / c_scale;
            *dst = scaled.round().clamp(-128.0, 127.0) as i8;
        }
    };

    if m * n >= PARALLEL_THRESHOLD {
        threadpool::pool().install(|| {
            out.par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, row)| compute_row(i, row));
        });
    } else {
        for (i, row) in out.chunks_mut(n).enumerate() {
            compute_row(i, row);
        }
    }
}

/// Symmetric per-call quantization of an activation row-major matrix:
/// `scale = max(|x|) / 127`, `q = round(x / scale)`. Returns `(q,
/// scale)`; an all-zero input gets `scale = 1.0` to avoid division by
/// zero.
pub fn quantize_symmetric(values: &[f32]) -> (Vec<i8>, f32) {
    let max_abs = values.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
    let scale = if max_abs == 0.0 { 1.0 } else { max_abs / 127.0 };
    let q = values
        .iter()
        .map(|&v| (v / scale).round().clamp(-128.0, 127.0) as i8)
        .collect();
    (q, scale)
}

/// I8→I32 unscaled-accumulator path, for hybrid F16×I8 callers that
/// dequantize downstream themselves.
pub fn gemm_i8_to_i32(a: &[i8], b_t: &[i8], out: &mut [i32], m: usize, n: usize, k: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b_t.len(), n * k);
    debug_assert_eq!(out.len(), m * n);
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b_t[j * k..(j + 1) * k];
            let mut sum: i32 = 0;
            for t in 0..k {
                sum += a_row[t] as i32 * b_row[t] as i32;
            }
            out[i * n + j] = sum;
        }
    }
}
