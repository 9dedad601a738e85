//! Llama-family per-layer wiring: the single concrete `BlockBuilder`
//! grounded on the teacher's `model/llama.rs`/`model/block.rs`
//! norm→attn→mlp ordering and on the per-layer weight-file naming and
//! Q/K-norm extras of `original_source/cactus/models/model_lfm2.cpp`.

use std::path::{Path, PathBuf};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::graph::{BinaryOp, Graph, NodeId};
use crate::precision::Precision;

/// The external-collaborator interface spec §1 names: per-architecture
/// model wiring writes kernel-level ops into the graph for one
/// transformer layer and hands back the updated hidden state plus this
/// step's new key/value node ids for the cache to ingest.
pub trait BlockBuilder {
    /// `cached_kv`, when `Some`, is `(key_context, value_context,
    /// cached_len)` — the layer's KV-cache content prior to this step,
    /// already materialized as graph input nodes of shape
    /// `[cached_len, kv_heads, head_dim]`. `position_offset` must equal
    /// `cached_len` so the causal mask admits exactly the cached range
    /// plus this step's new tokens (spec §4.A's attention parameter
    /// contract). Returns `(hidden_out, new_key, new_value)` where the
    /// key/value are only this step's newly computed slice, ready for
    /// `KVCache::update_layer`.
    #[allow(clippy::too_many_arguments)]
    fn build_layer(
        &self,
        graph: &mut Graph,
        layer_idx: usize,
        hidden_in: NodeId,
        seq_len: usize,
        position_offset: usize,
        cached_kv: Option<(NodeId, NodeId, usize)>,
    ) -> Result<(NodeId, NodeId, NodeId)>;

    fn num_layers(&self) -> usize;
    fn hidden_dim(&self) -> usize;
    fn attention_heads(&self) -> usize;
    fn attention_kv_heads(&self) -> usize;
    fn head_dim(&self) -> usize;
}

struct LayerWeights {
    attn_q: NodeId,
    attn_k: NodeId,
    attn_v: NodeId,
    attn_output: NodeId,
    ffn_gate: NodeId,
    ffn_up: NodeId,
    ffn_down: NodeId,
    input_norm: NodeId,
    post_attn_norm: NodeId,
    attn_q_norm: Option<NodeId>,
    attn_k_norm: Option<NodeId>,
}

pub struct LlamaBlockBuilder {
    layers: Vec<LayerWeights>,
    pub token_embeddings: NodeId,
    pub final_norm: NodeId,
    pub lm_head: NodeId,
    config: ModelConfig,
}

fn weight_path(model_dir: &Path, name: &str) -> PathBuf {
    model_dir.join(format!("{name}.weights"))
}

impl LlamaBlockBuilder {
    /// Maps every layer's weight files once at model init (the weight
    /// cache then guarantees they are never remapped).
    pub fn load(graph: &mut Graph, model_dir: &Path, config: ModelConfig) -> Result<Self> {
        let token_embeddings = graph.mmap_weights(&weight_path(model_dir, "token_embeddings"))?;
        let final_norm = graph.mmap_weights(&weight_path(model_dir, "final_norm"))?;
        let lm_head_path = weight_path(model_dir, "lm_head");
        let lm_head = if config.tie_word_embeddings || !lm_head_path.exists() {
            token_embeddings
        } else {
            graph.mmap_weights(&lm_head_path)?
        };

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let p = |suffix: &str| weight_path(model_dir, &format!("layer_{i}_{suffix}"));
            let q_norm_path = p("attn_q_norm");
            let k_norm_path = p("attn_k_norm");
            layers.push(LayerWeights {
                attn_q: graph.mmap_weights(&p("attn_q"))?,
                attn_k: graph.mmap_weights(&p("attn_k"))?,
                attn_v: graph.mmap_weights(&p("attn_v"))?,
                attn_output: graph.mmap_weights(&p("attn_output"))?,
                ffn_gate: graph.mmap_weights(&p("ffn_gate"))?,
                ffn_up: graph.mmap_weights(&p("ffn_up"))?,
                ffn_down: graph.mmap_weights(&p("ffn_down"))?,
                input_norm: graph.mmap_weights(&p("input_norm"))?,
                post_attn_norm: graph.mmap_weights(&p("post_attn_norm"))?,
                attn_q_norm: if q_norm_path.exists() {
                    Some(graph.mmap_weights(&q_norm_path)?)
                } else {
                    None
                },
                attn_k_norm: if k_norm_path.exists() {
                    Some(graph.mmap_weights(&k_norm_path)?)
                } else {
                    None
                },
            });
        }

        Ok(Self {
            layers,
            token_embeddings,
            final_norm,
            lm_head,
            config,
        })
    }

    pub fn embed(&self, graph: &mut Graph, token_ids: NodeId) -> Result<NodeId> {
        graph.build_embedding(self.token_embeddings, token_ids)
    }

    /// Projects normalized final hidden states to vocabulary logits.
    pub fn lm_head(&self, graph: &mut Graph, hidden: NodeId) -> Result<NodeId> {
        let normed = graph.build_rms_norm(hidden, self.final_norm, self.config.layer_norm_eps)?;
        graph.build_matmul(normed, self.lm_head, None, Precision::F32)
    }
}

impl BlockBuilder for LlamaBlockBuilder {
    fn build_layer(
        &self,
        graph: &mut Graph,
        layer_idx: usize,
        hidden_in: NodeId,
        seq_len: usize,
        position_offset: usize,
        cached_kv: Option<(NodeId, NodeId, usize)>,
    ) -> Result<(NodeId, NodeId, NodeId)> {
        let w = &self.layers[layer_idx];
        let eps = self.config.layer_norm_eps;
        let heads = self.config.attention_heads;
        let kv_heads = self.config.attention_kv_heads;
        let head_dim = self.config.attention_head_dim;
        let theta = self.config.rope_theta;

        let normed = graph.build_rms_norm(hidden_in, w.input_norm, eps)?;

        let q = graph.build_matmul(normed, w.attn_q, None, Precision::F32)?;
        let k = graph.build_matmul(normed, w.attn_k, None, Precision::F32)?;
        let v = graph.build_matmul(normed, w.attn_v, None, Precision::F32)?;

        let q = graph.build_reshape(q, vec![1, seq_len, heads, head_dim])?;
        let mut k = graph.build_reshape(k, vec![1, seq_len, kv_heads, head_dim])?;
        let v = graph.build_reshape(v, vec![seq_len, kv_heads, head_dim])?;

        let mut q = q;
        if let Some(q_norm) = w.attn_q_norm {
            q = graph.build_rms_norm(q, q_norm, eps)?;
        }
        if let Some(k_norm) = w.attn_k_norm {
            k = graph.build_rms_norm(k, k_norm, eps)?;
        }

        let q = graph.build_rope(q, theta, position_offset)?;
        let k = graph.build_rope(k, theta, position_offset)?;

        let q = graph.build_reshape(q, vec![seq_len, heads, head_dim])?;
        let new_k = graph.build_reshape(k, vec![seq_len, kv_heads, head_dim])?;

        let (k_ctx, v_ctx) = match cached_kv {
            Some((cached_key, cached_value, cached_len)) if cached_len > 0 => (
                graph.build_concat(vec![cached_key, new_k], 0)?,
                graph.build_concat(vec![cached_value, v], 0)?,
            ),
            _ => (new_k, v),
        };

        let scale = 1.0 / (head_dim as f32).sqrt();
        let attn_out = graph.build_attention(q, k_ctx, v_ctx, scale, true, 0, position_offset)?;
        let attn_flat = graph.build_reshape(attn_out, vec![seq_len, heads * head_dim])?;
        let attn_proj = graph.build_matmul(attn_flat, w.attn_output, None, Precision::F32)?;
        let hidden_mid = graph.build_elementwise_binary(BinaryOp::Add, hidden_in, attn_proj)?;

        let normed2 = graph.build_rms_norm(hidden_mid, w.post_attn_norm, eps)?;
        let gate = graph.build_matmul(normed2, w.ffn_gate, None, Precision::F32)?;
        let gate = graph.build_activation(crate::graph::ActivationKind::SiLU, gate)?;
        let up = graph.build_matmul(normed2, w.ffn_up, None, Precision::F32)?;
        let gated = graph.build_elementwise_binary(BinaryOp::Mul, gate, up)?;
        let down = graph.build_matmul(gated, w.ffn_down, None, Precision::F32)?;
        let hidden_out = graph.build_elementwise_binary(BinaryOp::Add, hidden_mid, down)?;

        Ok((hidden_out, new_k, v))
    }

    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn hidden_dim(&self) -> usize {
        self.config.hidden_dim
    }

    fn attention_heads(&self) -> usize {
        self.config.attention_heads
    }

    fn attention_kv_heads(&self) -> usize {
        self.config.attention_kv_heads
    }

    fn head_dim(&self) -> usize {
        self.config.attention_head_dim
    }
}
