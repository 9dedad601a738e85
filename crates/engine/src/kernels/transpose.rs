//! Arbitrary permutation over n-dim shapes (spec §4.A).

/// `out[perm(idx)] = input[idx]` expressed the other way round: for
/// every output logical index, find the source index by inverting the
/// permutation.
pub fn transpose(input: &[f32], out: &mut [f32], in_shape: &[usize], permutation: &[usize]) {
    let rank = in_shape.len();
    debug_assert_eq!(permutation.len(), rank);
    let out_shape: Vec<usize> = permutation.iter().map(|&ax| in_shape[ax]).collect();

    let in_strides = row_major_strides(in_shape);
    let out_total: usize = out_shape.iter().product();
    debug_assert_eq!(out.len(), out_total);

    let mut out_idx = vec![0usize; rank];
    for flat in 0..out_total {
        let mut in_off = 0usize;
        for (out_axis, &src_axis) in permutation.iter().enumerate() {
            in_off += out_idx[out_axis] * in_strides[src_axis];
        }
        out[flat] = input[in_off];

        for d in (0..rank).rev() {
            out_idx[d] += 1;
            if out_idx[d] < out_shape[d] {
                break;
            }
            out_idx[d] = 0;
        }
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}
