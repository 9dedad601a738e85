//! Topological execution and per-operator precision dispatch (spec §4.B).

use crate::buffer::{Buffer, OwnedData};
use crate::error::{EngineError, Result};
use crate::kernels;
use crate::precision::Precision;

use super::node::{ActivationKind, OpKind};
use super::{Graph, Profile, ProfileEntry};

impl Graph {
    /// Allocates owned buffers for every non-INPUT node, then executes
    /// nodes in insertion order. `profile`, when `Some`, records
    /// per-node elapsed time and output shape.
    pub fn execute(&mut self, mut profile: Option<&mut Profile>) -> Result<()> {
        for idx in 0..self.nodes.len() {
            if matches!(self.nodes[idx].op, OpKind::Input) {
                continue;
            }
            let desc = self.nodes[idx].output_desc.clone();
            self.nodes[idx].output =
                Buffer::Owned(OwnedData::zeroed(desc.precision, desc.total_elements()));
        }

        for idx in 0..self.nodes.len() {
            if matches!(self.nodes[idx].op, OpKind::Input) {
                continue;
            }
            let start = std::time::Instant::now();
            self.execute_node(idx)?;
            if let Some(sink) = profile.as_deref_mut() {
                let node = &self.nodes[idx];
                sink.entries.push(ProfileEntry {
                    node_id: node.id,
                    op_name: node.op.name(),
                    elapsed: start.elapsed(),
                    output_shape: node.output_desc.shape.clone(),
                });
            } else {
                let node = &self.nodes[idx];
                tracing::trace!(
                    node = node.id.0,
                    op = node.op.name(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "executed node"
                );
            }
        }
        Ok(())
    }

    fn execute_node(&mut self, idx: usize) -> Result<()> {
        let op = self.nodes[idx].op.clone();
        let inputs = self.nodes[idx].inputs.clone();
        let out_precision = self.nodes[idx].output_desc.precision;

        match op {
            OpKind::Input => unreachable!(),
            OpKind::ElementwiseBinary { op, broadcast } => {
                let lhs_prec = self.nodes[inputs[0].0].output.precision().unwrap();
                let rhs_prec = self.nodes[inputs[1].0].output.precision().unwrap();
                if lhs_prec != rhs_prec {
                    return Err(EngineError::UnsupportedPrecisionCombo {
                        op: "ElementwiseBinary",
                        precisions: vec![lhs_prec, rhs_prec],
                    });
                }
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let b = self.nodes[inputs[1].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; self.nodes[idx].output_desc.total_elements()];
                match &broadcast {
                    Some(info) => kernels::elementwise::binary_broadcast(op, &a, &b, &mut result, info),
                    None => kernels::elementwise::binary_contiguous(op, &a, &b, &mut result),
                }
                self.write_output(idx, &result);
            }
            OpKind::ScalarOp { op, value } => {
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; a.len()];
                kernels::scalar::scalar_op(op, &a, value, &mut result);
                self.write_output(idx, &result);
            }
            OpKind::Activation { kind } => {
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; a.len()];
                match kind {
                    ActivationKind::SiLU => kernels::activation::silu(&a, &mut result),
                    ActivationKind::GELU => kernels::activation::gelu(&a, &mut result),
                }
                self.write_output(idx, &result);
            }
            OpKind::Matmul {
                pretransposed_rhs: _,
                scales,
            } => {
                let lhs_desc = self.nodes[inputs[0].0].output_desc.clone();
                let rhs_desc = self.nodes[inputs[1].0].output_desc.clone();
                let (m, k) = (lhs_desc.shape[0], lhs_desc.shape[1]);
                let n = rhs_desc.shape[0];

                match (lhs_desc.precision, rhs_desc.precision, scales) {
                    (Precision::I8, Precision::I8, Some(s)) => {
                        let a = self.nodes[inputs[0].0].output.view();
                        let b = self.nodes[inputs[1].0].output.view();
                        let (a_i8, b_i8) = match (a, b) {
                            (
                                crate::buffer::TypedSlice::I8(a),
                                crate::buffer::TypedSlice::I8(b),
                            ) => (a.to_vec(), b.to_vec()),
                            _ => unreachable!(),
                        };
                        let mut result = vec![0i8; m * n];
                        kernels::gemm::gemm_i8(
                            &a_i8, &b_i8, &mut result, m, n, k,
                            s.a_scale, s.b_scale, s.c_scale,
                        );
                        let floats: Vec<f32> = result.iter().map(|&x| x as f32).collect();
                        self.write_output(idx, &floats);
                    }
                    (Precision::I8, Precision::I8, None) if out_precision == Precision::I8 => {
                        return Err(EngineError::UnsupportedPrecisionCombo {
                            op: "Matmul",
                            precisions: vec![Precision::I8, Precision::I8],
                        });
                    }
                    (lp, rp, _)
                        if (lp == Precision::F32 || lp == Precision::F16)
                            && (rp == Precision::F32 || rp == Precision::F16) =>
                    {
                        // Same precision or a F32/F16 mix: both widen
                        // losslessly (or near enough) to f32.
                        let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                        let b = self.nodes[inputs[1].0].output.view().to_f32_vec(None);
                        let mut result = vec![0.0f32; m * n];
                        kernels::gemm::gemm_f32(&a, &b, &mut result, m, n, k);
                        self.write_output(idx, &result);
                    }
                    (lp, Precision::I8, None) if lp != Precision::I8 => {
                        // Hybrid path: a F32/F16 activation against an I8
                        // weight. The activation is quantized per call;
                        // the weight keeps its stored dequantization
                        // scale from the `.scale` sidecar file.
                        let a_f32 = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                        let (a_i8, a_scale) = kernels::gemm::quantize_symmetric(&a_f32);
                        let b_i8 = match self.nodes[inputs[1].0].output.view() {
                            crate::buffer::TypedSlice::I8(b) => b.to_vec(),
                            _ => unreachable!(),
                        };
                        let b_scale = rhs_desc.scale.unwrap_or(1.0);
                        let mut acc = vec![0i32; m * n];
                        kernels::gemm::gemm_i8_to_i32(&a_i8, &b_i8, &mut acc, m, n, k);
                        let result: Vec<f32> = acc
                            .iter()
                            .map(|&s| s as f32 * a_scale * b_scale)
                            .collect();
                        self.write_output(idx, &result);
                    }
                    (lp, rp, _) => {
                        return Err(EngineError::UnsupportedPrecisionCombo {
                            op: "Matmul",
                            precisions: vec![lp, rp],
                        });
                    }
                }
            }
            OpKind::Transpose { permutation } => {
                let in_desc = self.nodes[inputs[0].0].output_desc.clone();
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; a.len()];
                kernels::transpose::transpose(&a, &mut result, &in_desc.shape, &permutation);
                self.write_output(idx, &result);
            }
            OpKind::Reduce { op, axis } => {
                let in_desc = self.nodes[inputs[0].0].output_desc.clone();
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let out_len = self.nodes[idx].output_desc.total_elements();
                let mut result = vec![0.0f32; out_len];
                match axis {
                    None => kernels::reduce::reduce_all(op, &a, &mut result),
                    Some(ax) => {
                        let rank = in_desc.shape.len() as isize;
                        let norm = if ax < 0 { rank + ax } else { ax } as usize;
                        kernels::reduce::reduce_axis(op, &a, &in_desc.shape, norm, &mut result);
                    }
                }
                self.write_output(idx, &result);
            }
            OpKind::RmsNorm { eps } => {
                let in_desc = self.nodes[inputs[0].0].output_desc.clone();
                let dim = *in_desc.shape.last().unwrap();
                let x = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let w = self.nodes[inputs[1].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; x.len()];
                kernels::rmsnorm::rms_norm_rows(&x, &w, eps, dim, &mut result);
                self.write_output(idx, &result);
            }
            OpKind::Rope {
                theta,
                position_offset,
            } => {
                let in_desc = self.nodes[inputs[0].0].output_desc.clone();
                let (batch, seq, heads, head_dim) = (
                    in_desc.shape[0],
                    in_desc.shape[1],
                    in_desc.shape[2],
                    in_desc.shape[3],
                );
                let mut data = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                kernels::rope::rope_inplace(&mut data, batch, seq, heads, head_dim, theta, position_offset);
                self.write_output(idx, &data);
            }
            OpKind::Softmax => {
                let in_desc = self.nodes[inputs[0].0].output_desc.clone();
                let dim = *in_desc.shape.last().unwrap();
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; a.len()];
                kernels::softmax::softmax_rows(&a, dim, &mut result);
                self.write_output(idx, &result);
            }
            OpKind::Attention {
                scale,
                causal,
                window_size,
                position_offset,
            } => {
                let q_desc = self.nodes[inputs[0].0].output_desc.clone();
                let k_desc = self.nodes[inputs[1].0].output_desc.clone();
                let (seq_q, q_heads, head_dim) = (q_desc.shape[0], q_desc.shape[1], q_desc.shape[2]);
                let (seq_kv, kv_heads) = (k_desc.shape[0], k_desc.shape[1]);
                let q = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let k = self.nodes[inputs[1].0].output.view().to_f32_vec(None);
                let v = self.nodes[inputs[2].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; q.len()];
                kernels::attention::attention(
                    &q, &k, &v, &mut result, seq_q, seq_kv, q_heads, kv_heads, head_dim,
                    scale, causal, window_size, position_offset,
                );
                self.write_output(idx, &result);
            }
            OpKind::Sample {
                temperature,
                top_p,
                top_k,
                seed,
            } => {
                let logits = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                let token_id = kernels::sampling::sample(&logits, temperature, top_p, top_k, seed);
                self.write_output(idx, &[token_id as f32]);
            }
            OpKind::Reshape { .. } => {
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(None);
                self.write_output(idx, &a);
            }
            OpKind::Concat { axis } => {
                let descs: Vec<_> = inputs
                    .iter()
                    .map(|&id| self.nodes[id.0].output_desc.clone())
                    .collect();
                let vecs: Vec<Vec<f32>> = inputs
                    .iter()
                    .map(|&id| self.nodes[id.0].output.view().to_f32_vec(None))
                    .collect();
                let out_shape = self.nodes[idx].output_desc.shape.clone();
                let outer: usize = out_shape[..axis].iter().product();
                let inner: usize = out_shape[axis + 1..].iter().product();
                let mut result = vec![0.0f32; out_shape.iter().product()];
                let out_axis_len = out_shape[axis];
                for o in 0..outer {
                    let mut axis_cursor = 0usize;
                    for (desc, vec_data) in descs.iter().zip(vecs.iter()) {
                        let axis_len = desc.shape[axis];
                        for a in 0..axis_len {
                            for i in 0..inner {
                                let src = (o * axis_len + a) * inner + i;
                                let dst = (o * out_axis_len + axis_cursor + a) * inner + i;
                                result[dst] = vec_data[src];
                            }
                        }
                        axis_cursor += axis_len;
                    }
                }
                self.write_output(idx, &result);
            }
            OpKind::Embedding => {
                let table_desc = self.nodes[inputs[0].0].output_desc.clone();
                let hidden = table_desc.shape[1];
                let table_scale = table_desc.scale;
                let table = self.nodes[inputs[0].0]
                    .output
                    .view()
                    .to_f32_vec(table_scale);
                let indices = self.nodes[inputs[1].0].output.view().to_f32_vec(None);
                let mut result = vec![0.0f32; indices.len() * hidden];
                for (row, &idx_f) in indices.iter().enumerate() {
                    let token = idx_f.round() as usize;
                    if token >= table_desc.shape[0] {
                        return Err(EngineError::IndexOutOfRange {
                            index: token,
                            bound: table_desc.shape[0],
                        });
                    }
                    result[row * hidden..(row + 1) * hidden]
                        .copy_from_slice(&table[token * hidden..(token + 1) * hidden]);
                }
                self.write_output(idx, &result);
            }
            OpKind::PrecisionCast { target: _ } => {
                let scale = self.nodes[inputs[0].0].output_desc.scale;
                let a = self.nodes[inputs[0].0].output.view().to_f32_vec(scale);
                self.write_output(idx, &a);
            }
        }

        Ok(())
    }

    fn write_output(&mut self, idx: usize, values: &[f32]) {
        let scale = self.nodes[idx].output_desc.scale.or(if self.nodes[idx].output_desc.precision
            == Precision::I8
        {
            Some(kernels::rmsnorm::I8_REQUANT_SCALE)
        } else {
            None
        });
        self.nodes[idx].output.view_mut().write_from_f32(values, scale);
    }
}
