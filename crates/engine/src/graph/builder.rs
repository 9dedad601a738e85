//! Builder methods: shape/precision inference at build time, never
//! executing a kernel (spec §4.B's construction contract).

use crate::buffer::BufferDesc;
use crate::error::{EngineError, Result};
use crate::precision::Precision;

use super::node::{
    ActivationKind, BinaryOp, BroadcastInfo, GemmScales, NodeId, OpKind, ReduceOp, ScalarOp,
};
use super::Graph;

/// Computes the broadcast output shape of two shapes, numpy-style:
/// right-aligned, each axis must match or be 1.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![1usize; rank];
    for i in 0..rank {
        let da = *a.iter().rev().nth(i).unwrap_or(&1);
        let db = *b.iter().rev().nth(i).unwrap_or(&1);
        if da != db && da != 1 && db != 1 {
            return Err(EngineError::ShapeMismatch {
                expected: a.to_vec(),
                got: b.to_vec(),
            });
        }
        out[rank - 1 - i] = da.max(db);
    }
    Ok(out)
}

fn broadcast_strides(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let rank = out_shape.len();
    let mut strides = vec![0usize; rank];
    let mut acc = 1usize;
    let offset = rank - shape.len();
    for i in (0..shape.len()).rev() {
        let extent = shape[i];
        strides[offset + i] = if extent == 1 { 0 } else { acc };
        acc *= extent;
    }
    strides
}

impl Graph {
    /// Element-wise binary op. Output precision = lhs precision
    /// (callers pre-cast); output shape = broadcast of operand shapes.
    pub fn build_elementwise_binary(
        &mut self,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<NodeId> {
        let lhs_shape = self.desc(lhs).shape.clone();
        let rhs_shape = self.desc(rhs).shape.clone();
        let precision = self.desc(lhs).precision;
        let out_shape = broadcast_shape(&lhs_shape, &rhs_shape)?;
        let broadcast = if lhs_shape != out_shape || rhs_shape != out_shape {
            Some(BroadcastInfo {
                lhs_strides: broadcast_strides(&lhs_shape, &out_shape),
                rhs_strides: broadcast_strides(&rhs_shape, &out_shape),
                output_shape: out_shape.clone(),
            })
        } else {
            None
        };
        let desc = BufferDesc::new(out_shape, precision);
        Ok(self.push(
            OpKind::ElementwiseBinary { op, broadcast },
            vec![lhs, rhs],
            desc,
        ))
    }

    pub fn build_scalar_op(&mut self, op: ScalarOp, input: NodeId, value: f32) -> Result<NodeId> {
        let desc = self.desc(input).clone();
        Ok(self.push(OpKind::ScalarOp { op, value }, vec![input], desc))
    }

    pub fn build_activation(&mut self, kind: ActivationKind, input: NodeId) -> Result<NodeId> {
        let desc = self.desc(input).clone();
        Ok(self.push(OpKind::Activation { kind }, vec![input], desc))
    }

    /// `C[M×N] = A[M×K] · Bᵀ[N×K]`, both operands 2-D. Fails eagerly on
    /// rank or contracted-dimension mismatch.
    pub fn build_matmul(
        &mut self,
        lhs: NodeId,
        rhs: NodeId,
        scales: Option<GemmScales>,
        output_precision: Precision,
    ) -> Result<NodeId> {
        let a = self.desc(lhs).shape.clone();
        let b = self.desc(rhs).shape.clone();
        if a.len() != 2 {
            return Err(EngineError::RankMismatch {
                expected: 2,
                got: a.len(),
            });
        }
        if b.len() != 2 {
            return Err(EngineError::RankMismatch {
                expected: 2,
                got: b.len(),
            });
        }
        let (m, k) = (a[0], a[1]);
        let (n, k2) = (b[0], b[1]);
        if k != k2 {
            return Err(EngineError::ShapeMismatch {
                expected: vec![m, k],
                got: vec![n, k2],
            });
        }
        let desc = BufferDesc::new(vec![m, n], output_precision);
        Ok(self.push(
            OpKind::Matmul {
                pretransposed_rhs: true,
                scales,
            },
            vec![lhs, rhs],
            desc,
        ))
    }

    pub fn build_transpose(&mut self, input: NodeId, permutation: Vec<usize>) -> Result<NodeId> {
        let shape = self.desc(input).shape.clone();
        if permutation.len() != shape.len() {
            return Err(EngineError::RankMismatch {
                expected: shape.len(),
                got: permutation.len(),
            });
        }
        let out_shape: Vec<usize> = permutation.iter().map(|&ax| shape[ax]).collect();
        let precision = self.desc(input).precision;
        let desc = BufferDesc::new(out_shape, precision);
        Ok(self.push(OpKind::Transpose { permutation }, vec![input], desc))
    }

    /// `axis = -1` collapses to `[1]`; otherwise the named axis is
    /// removed (and the result is `[1]` if that empties the shape).
    pub fn build_reduce(&mut self, op: ReduceOp, input: NodeId, axis: Option<isize>) -> Result<NodeId> {
        let shape = self.desc(input).shape.clone();
        let precision = self.desc(input).precision;
        let out_shape = match axis {
            None => vec![1],
            Some(ax) => {
                let rank = shape.len() as isize;
                let norm = if ax < 0 { rank + ax } else { ax };
                if norm < 0 || norm >= rank {
                    return Err(EngineError::IndexOutOfRange {
                        index: ax as usize,
                        bound: shape.len(),
                    });
                }
                let mut s: Vec<usize> = shape
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != norm as usize)
                    .map(|(_, &v)| v)
                    .collect();
                if s.is_empty() {
                    s.push(1);
                }
                s
            }
        };
        let desc = BufferDesc::new(out_shape, precision);
        Ok(self.push(OpKind::Reduce { op, axis }, vec![input], desc))
    }

    pub fn build_rms_norm(&mut self, input: NodeId, weight: NodeId, eps: f32) -> Result<NodeId> {
        let desc = self.desc(input).clone();
        Ok(self.push(OpKind::RmsNorm { eps }, vec![input, weight], desc))
    }

    pub fn build_rope(&mut self, input: NodeId, theta: f32, position_offset: usize) -> Result<NodeId> {
        let desc = self.desc(input).clone();
        Ok(self.push(
            OpKind::Rope {
                theta,
                position_offset,
            },
            vec![input],
            desc,
        ))
    }

    pub fn build_softmax(&mut self, input: NodeId) -> Result<NodeId> {
        let desc = self.desc(input).clone();
        Ok(self.push(OpKind::Softmax, vec![input], desc))
    }

    pub fn build_attention(
        &mut self,
        query: NodeId,
        key: NodeId,
        value: NodeId,
        scale: f32,
        causal: bool,
        window_size: usize,
        position_offset: usize,
    ) -> Result<NodeId> {
        let desc = self.desc(query).clone();
        Ok(self.push(
            OpKind::Attention {
                scale,
                causal,
                window_size,
                position_offset,
            },
            vec![query, key, value],
            desc,
        ))
    }

    /// Output shape `[1]`, F32 precision (spec §9: a distinct sampled-id
    /// precision is reserved for a future revision; F32 storage of the
    /// token id as a float is the contract today, see §4.B).
    pub fn build_sample(
        &mut self,
        logits: NodeId,
        temperature: f32,
        top_p: f32,
        top_k: usize,
        seed: u64,
    ) -> Result<NodeId> {
        let desc = BufferDesc::new(vec![1], Precision::F32);
        Ok(self.push(
            OpKind::Sample {
                temperature,
                top_p,
                top_k,
                seed,
            },
            vec![logits],
            desc,
        ))
    }

    pub fn build_reshape(&mut self, input: NodeId, target: Vec<usize>) -> Result<NodeId> {
        let in_desc = self.desc(input).clone();
        let in_total: usize = in_desc.shape.iter().product();
        let out_total: usize = target.iter().product();
        if in_total != out_total {
            return Err(EngineError::ShapeMismatch {
                expected: in_desc.shape.clone(),
                got: target,
            });
        }
        let desc = BufferDesc::new(target.clone(), in_desc.precision);
        Ok(self.push(OpKind::Reshape { target }, vec![input], desc))
    }

    pub fn build_concat(&mut self, inputs: Vec<NodeId>, axis: usize) -> Result<NodeId> {
        let first = self.desc(inputs[0]).clone();
        let mut out_shape = first.shape.clone();
        let mut concat_extent = 0usize;
        for &id in &inputs {
            let d = self.desc(id);
            if d.shape.len() != first.shape.len() {
                return Err(EngineError::RankMismatch {
                    expected: first.shape.len(),
                    got: d.shape.len(),
                });
            }
            for (i, (&a, &b)) in first.shape.iter().zip(d.shape.iter()).enumerate() {
                if i != axis && a != b {
                    return Err(EngineError::ShapeMismatch {
                        expected: first.shape.clone(),
                        got: d.shape.clone(),
                    });
                }
            }
            concat_extent += d.shape[axis];
        }
        out_shape[axis] = concat_extent;
        let desc = BufferDesc::new(out_shape, first.precision);
        Ok(self.push(OpKind::Concat { axis }, inputs, desc))
    }

    /// `[vocab, hidden] × index-shape → index-shape ⊕ [hidden]`. I8
    /// embedding tables are promoted to F16 output.
    pub fn build_embedding(&mut self, table: NodeId, indices: NodeId) -> Result<NodeId> {
        let table_desc = self.desc(table).clone();
        if table_desc.shape.len() != 2 {
            return Err(EngineError::RankMismatch {
                expected: 2,
                got: table_desc.shape.len(),
            });
        }
        let hidden = table_desc.shape[1];
        let mut out_shape = self.desc(indices).shape.clone();
        out_shape.push(hidden);
        let precision = match table_desc.precision {
            Precision::I8 => Precision::F16,
            other => other,
        };
        let desc = BufferDesc::new(out_shape, precision);
        Ok(self.push(OpKind::Embedding, vec![table, indices], desc))
    }

    pub fn build_precision_cast(&mut self, input: NodeId, target: Precision) -> Result<NodeId> {
        let shape = self.desc(input).shape.clone();
        let desc = BufferDesc::new(shape, target);
        Ok(self.push(OpKind::PrecisionCast { target }, vec![input], desc))
    }
}
