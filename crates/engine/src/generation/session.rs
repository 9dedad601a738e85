//! The generation orchestrator (spec §4.E): prefix-reuse, per-step
//! graph submission, cache update, stop-sequence matching, streaming
//! emission and tool-call extraction.
//!
//! Grounded on the teacher's `core_engine.rs::Llama::stream_completion`
//! (cumulative decode, callback-per-token) and
//! `bit_llama/src/cli_mode.rs::run_chat`'s history accumulation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::buffer::{Buffer, BufferDesc, OwnedData};
use crate::cache::KVCache;
use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::graph::{Graph, NodeId};
use crate::model::{BlockBuilder, LlamaBlockBuilder};
use crate::precision::Precision;
use crate::tokenizer::{ChatMessage, Tokenizer};

use super::options::GenerationOptions;
use super::response::{extract_tool_calls, GenerationOutcome, GenerationResponse};
use super::stop::{compile_stop_sequences, match_stop};

/// Bridges the KV cache's raw-byte ring storage and the graph's `f32`
/// node buffers — the cache is byte-oriented so it can hold any
/// precision in principle, but every tensor it stores today is `f32`
/// (see `DESIGN.md`), so every crossing goes through these.
fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len() * 4];
    LittleEndian::write_f32_into(values, &mut bytes);
    bytes
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    let mut values = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(bytes, &mut values);
    values
}

/// `{model, tokenizer, processed_tokens, should_stop}` (spec §4.E).
pub struct Session {
    model_dir: std::path::PathBuf,
    config: ModelConfig,
    builder: LlamaBlockBuilder,
    graph: Graph,
    cache: KVCache,
    tokenizer: Tokenizer,
    pub processed_tokens: Vec<u32>,
    should_stop: Arc<AtomicBool>,
}

impl Session {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let config = ModelConfig::load(model_dir)?;
        let tok_config = crate::config::TokenizerConfig::load_optional(model_dir)?;

        let tokenizer = Tokenizer::load(
            model_dir,
            tok_config.bos_token_id.unwrap_or(config.bos_token_id),
            tok_config.eos_token_id.unwrap_or(config.eos_token_id),
            tok_config.pad_token_id.unwrap_or(0),
            tok_config.unk_token_id.unwrap_or(0),
        )?;

        let mut graph = Graph::new();
        let builder = LlamaBlockBuilder::load(&mut graph, model_dir, config.clone())?;

        let cache = KVCache::init(
            config.num_layers,
            2048,
            64,
            config.attention_kv_heads,
            config.attention_head_dim,
            Precision::F32,
        );

        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            config,
            builder,
            graph,
            cache,
            tokenizer,
            processed_tokens: Vec::new(),
            should_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// External `stop()`: sets the flag atomically; observed by the
    /// decoding loop between tokens (spec §5's cancellation model).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Release);
    }

    /// External `reset()`: clears `processed_tokens` and returns the KV
    /// cache to Empty for every layer. Weight mappings are untouched —
    /// only `soft_reset` (run at the top of every forward pass) discards
    /// per-step activation nodes.
    pub fn reset(&mut self) {
        self.processed_tokens.clear();
        self.cache.reset();
    }

    /// Runs one forward pass over `token_ids`, updates the KV cache with
    /// the newly produced key/value slices, and returns the final-layer
    /// sampled logits node's value as a token id.
    fn forward_and_sample(
        &mut self,
        token_ids: &[u32],
        position_offset: usize,
        temperature: f32,
        top_p: f32,
        top_k: usize,
        seed: u64,
    ) -> Result<u32> {
        self.graph.soft_reset();

        let seq_len = token_ids.len();
        let indices_desc = BufferDesc::new(vec![seq_len], Precision::F32);
        let indices_data: Vec<f32> = token_ids.iter().map(|&id| id as f32).collect();
        let indices_id = self
            .graph
            .new_input(indices_desc, Buffer::Owned(OwnedData::F32(indices_data)));

        let mut hidden = self.builder.embed(&mut self.graph, indices_id)?;
        // Embedding always promotes I8 -> F16 or passes through F16/F32; the
        // rest of the block math here runs at F32, so normalize up front.
        hidden = self.graph.build_precision_cast(hidden, Precision::F32)?;
        hidden = self.graph.build_reshape(hidden, vec![seq_len, self.builder.hidden_dim()])?;

        let mut layer_kv: Vec<(NodeId, NodeId)> = Vec::with_capacity(self.builder.num_layers());

        for layer in 0..self.builder.num_layers() {
            let cached_len = self.cache.current_len(layer);
            let cached_kv = if cached_len > 0 {
                let kv_heads = self.cache.kv_heads;
                let head_dim = self.cache.head_dim;
                let key_bytes = self.cache.get_key_ptr(layer).to_vec();
                let value_bytes = self.cache.get_value_ptr(layer).to_vec();
                let key_floats = bytes_to_f32(&key_bytes);
                let value_floats = bytes_to_f32(&value_bytes);
                let desc = BufferDesc::new(vec![cached_len, kv_heads, head_dim], Precision::F32);
                let key_id = self
                    .graph
                    .new_input(desc.clone(), Buffer::Owned(OwnedData::F32(key_floats)));
                let value_id = self
                    .graph
                    .new_input(desc, Buffer::Owned(OwnedData::F32(value_floats)));
                Some((key_id, value_id, cached_len))
            } else {
                None
            };

            let (hidden_out, new_key, new_value) = self.builder.build_layer(
                &mut self.graph,
                layer,
                hidden,
                seq_len,
                position_offset,
                cached_kv,
            )?;
            hidden = hidden_out;
            layer_kv.push((new_key, new_value));
        }

        let logits = self.builder.lm_head(&mut self.graph, hidden)?;

        self.graph.execute(None)?;

        for (layer, (key_id, value_id)) in layer_kv.into_iter().enumerate() {
            let key_floats = self.graph.node(key_id).output.view().to_f32_vec(None);
            let value_floats = self.graph.node(value_id).output.view().to_f32_vec(None);
            self.cache.update_layer(
                layer,
                &f32_to_bytes(&key_floats),
                &f32_to_bytes(&value_floats),
                seq_len,
            );
        }

        let vocab = self.graph.desc(logits).shape[1];
        let all_logits = self.graph.node(logits).output.view().to_f32_vec(None);
        let last_row = &all_logits[(seq_len - 1) * vocab..seq_len * vocab];
        Ok(crate::kernels::sampling::sample(
            last_row, temperature, top_p, top_k, seed,
        ))
    }

    /// `generate(messages, options, tool_schema, stream_callback)` (spec
    /// §4.E's single-step contract, steps 1-9).
    pub fn generate(
        &mut self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        tool_schema: Option<&serde_json::Value>,
        mut stream_callback: Option<&mut dyn FnMut(&str, u32)>,
    ) -> Result<GenerationResponse> {
        let resolved = options.resolved(&self.config.model_type);

        if messages.is_empty() {
            return Err(EngineError::TokenizationError(
                "messages must not be empty".to_string(),
            ));
        }

        // Step 1: render and encode.
        let rendered = self.tokenizer.chat_template.render(
            &messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect::<Vec<_>>(),
            true,
            tool_schema,
        )?;
        let current_prompt_tokens = self.tokenizer.encode(&rendered)?;

        // Step 2: prefix test.
        let is_prefix = self.processed_tokens.len() <= current_prompt_tokens.len()
            && self.processed_tokens == current_prompt_tokens[..self.processed_tokens.len()];
        let delta: Vec<u32> = if is_prefix {
            current_prompt_tokens[self.processed_tokens.len()..].to_vec()
        } else {
            self.reset();
            current_prompt_tokens.clone()
        };
        let prompt_tokens = current_prompt_tokens.len();

        // Step 3: compile stop sequences.
        let stop_sequences = compile_stop_sequences(
            &self.tokenizer,
            self.tokenizer.eos_token_id,
            &options.stop_sequences,
        );

        let mut generated: Vec<u32> = Vec::new();
        let mut outcome = GenerationOutcome::Completed;

        if resolved.max_tokens == 0 {
            // No forward pass runs, so the KV cache stays exactly as it
            // was: `processed_tokens` must not claim this prompt as
            // cached, or the next call's prefix-reuse test (step 2)
            // would skip tokens that were never actually fed through
            // the model.
            return Ok(GenerationResponse {
                response: String::new(),
                function_calls: Vec::new(),
                time_to_first_token_ms: 0.0,
                tokens_per_second: 0.0,
                total_time_ms: 0.0,
                prompt_tokens,
                completion_tokens: 0,
                outcome: GenerationOutcome::Completed,
            });
        }

        let start = std::time::Instant::now();

        // Step 4: first decoding call.
        let first_input: Vec<u32> = if delta.is_empty() {
            vec![*self.processed_tokens.last().ok_or_else(|| {
                EngineError::TokenizationError("no prior tokens to resubmit".to_string())
            })?]
        } else {
            delta.clone()
        };
        let position_offset = self.cache.total_seen(0).min(self.cache.capacity());
        let mut next_token = self.forward_and_sample(
            &first_input,
            position_offset,
            resolved.temperature,
            resolved.top_p,
            resolved.top_k,
            resolved.seed,
        )?;
        let ttft_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.processed_tokens.extend_from_slice(&first_input);

        loop {
            generated.push(next_token);
            self.processed_tokens.push(next_token);

            if let Some(cb) = stream_callback.as_deref_mut() {
                let text = self.tokenizer.decode(&[next_token]);
                cb(&text, next_token);
            }

            if generated.len() >= resolved.max_tokens {
                break;
            }
            if self.should_stop.load(Ordering::Relaxed) {
                outcome = GenerationOutcome::Stopped;
                break;
            }
            if match_stop(&generated, &stop_sequences).is_some() {
                break;
            }

            let pos = self.cache.total_seen(0).min(self.cache.capacity());
            next_token = self.forward_and_sample(
                &[next_token],
                pos,
                resolved.temperature,
                resolved.top_p,
                resolved.top_k,
                resolved.seed,
            )?;
        }

        // Step 7: decode and extract tool calls.
        let decoded = self.tokenizer.decode(&generated);
        let (response_text, function_calls) = extract_tool_calls(&decoded);

        // Step 8: timing.
        let total_ms = start.elapsed().as_secs_f64() * 1000.0;
        let decode_ms = total_ms - ttft_ms;
        let tps = if generated.len() >= 2 {
            (generated.len() - 1) as f64 * 1000.0 / decode_ms
        } else {
            0.0
        };

        Ok(GenerationResponse {
            response: response_text,
            function_calls,
            time_to_first_token_ms: ttft_ms,
            tokens_per_second: tps,
            total_time_ms: total_ms,
            prompt_tokens,
            completion_tokens: generated.len(),
            outcome,
        })
    }
}
