//! End-to-end `Session` tests against a synthetic one-layer model
//! directory. The byte vocabulary (vocab ids equal their own byte
//! value, no merges) makes `decode` a lossless inverse of `encode`, so
//! a generated token sequence re-tokenizes to the exact same ids —
//! this is what lets the cross-turn test assert on token counts
//! instead of needing to predict actual sampled tokens.

use std::io::Write as _;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use cortex_engine::error::EngineError;
use cortex_engine::generation::{GenerationOptions, GenerationOutcome};
use cortex_engine::tokenizer::ChatMessage;
use cortex_engine::Session;

const HIDDEN_DIM: usize = 4;
const FFN_DIM: usize = 4;
const HEADS: usize = 2;
const KV_HEADS: usize = 2;
const HEAD_DIM: usize = 2;
const VOCAB_SIZE: usize = 256;

/// Same byte/placeholder mapping `tokenizer::bpe` uses (GPT-2's
/// byte-level scheme), reproduced here only to build a vocab file
/// whose line order lines up with the raw byte values.
fn byte_to_unicode() -> [char; 256] {
    let mut keep: Vec<u32> = Vec::new();
    keep.extend(b'!' as u32..=b'~' as u32);
    keep.extend(0xA1u32..=0xACu32);
    keep.extend(0xAEu32..=0xFFu32);

    let mut table = [0u32; 256];
    let mut next_extra = 256u32;
    for b in 0..256u32 {
        if keep.contains(&b) {
            table[b as usize] = b;
        } else {
            table[b as usize] = next_extra;
            next_extra += 1;
        }
    }
    let mut out = ['\0'; 256];
    for (i, &cp) in table.iter().enumerate() {
        out[i] = char::from_u32(cp).unwrap();
    }
    out
}

fn write_crtx(path: &Path, shape: &[usize], data: &[f32]) {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"CRTX");
    bytes.push(2); // precision tag: F32
    bytes.push(shape.len() as u8);
    for &extent in shape {
        bytes.extend_from_slice(&(extent as u64).to_le_bytes());
    }
    let mut payload = vec![0u8; data.len() * 4];
    LittleEndian::write_f32_into(data, &mut payload);
    bytes.extend_from_slice(&payload);
    std::fs::write(path, bytes).unwrap();
}

/// Deterministic, boring fill so every weight has distinct but small
/// values: `f(i) = ((i % 7) as f32 - 3.0) * 0.05`.
fn filled(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i % 7) as f32 - 3.0) * 0.05).collect()
}

fn write_model_dir(dir: &Path) {
    std::fs::write(
        dir.join("config.txt"),
        format!(
            "vocab_size = {VOCAB_SIZE}\n\
             bos_token_id = 254\n\
             eos_token_id = 255\n\
             num_layers = 1\n\
             hidden_dim = {HIDDEN_DIM}\n\
             ffn_intermediate_dim = {FFN_DIM}\n\
             attention_heads = {HEADS}\n\
             attention_kv_heads = {KV_HEADS}\n\
             attention_head_dim = {HEAD_DIM}\n\
             layer_norm_eps = 0.00001\n\
             rope_theta = 10000.0\n\
             tie_word_embeddings = true\n\
             precision = FP32\n\
             model_type = llama\n"
        ),
    )
    .unwrap();

    let vocab_table = byte_to_unicode();
    let mut vocab_file = std::fs::File::create(dir.join("vocab.txt")).unwrap();
    for i in 0..VOCAB_SIZE {
        writeln!(vocab_file, "{}", vocab_table[i]).unwrap();
    }
    std::fs::write(dir.join("merges.txt"), "").unwrap();

    write_crtx(
        &dir.join("token_embeddings.weights"),
        &[VOCAB_SIZE, HIDDEN_DIM],
        &filled(VOCAB_SIZE * HIDDEN_DIM),
    );
    write_crtx(
        &dir.join("final_norm.weights"),
        &[HIDDEN_DIM],
        &vec![1.0f32; HIDDEN_DIM],
    );

    let qkv_out = HEADS * HEAD_DIM;
    let kv_out = KV_HEADS * HEAD_DIM;
    write_crtx(
        &dir.join("layer_0_attn_q.weights"),
        &[qkv_out, HIDDEN_DIM],
        &filled(qkv_out * HIDDEN_DIM),
    );
    write_crtx(
        &dir.join("layer_0_attn_k.weights"),
        &[kv_out, HIDDEN_DIM],
        &filled(kv_out * HIDDEN_DIM),
    );
    write_crtx(
        &dir.join("layer_0_attn_v.weights"),
        &[kv_out, HIDDEN_DIM],
        &filled(kv_out * HIDDEN_DIM),
    );
    write_crtx(
        &dir.join("layer_0_attn_output.weights"),
        &[HIDDEN_DIM, qkv_out],
        &filled(HIDDEN_DIM * qkv_out),
    );
    write_crtx(
        &dir.join("layer_0_ffn_gate.weights"),
        &[FFN_DIM, HIDDEN_DIM],
        &filled(FFN_DIM * HIDDEN_DIM),
    );
    write_crtx(
        &dir.join("layer_0_ffn_up.weights"),
        &[FFN_DIM, HIDDEN_DIM],
        &filled(FFN_DIM * HIDDEN_DIM),
    );
    write_crtx(
        &dir.join("layer_0_ffn_down.weights"),
        &[HIDDEN_DIM, FFN_DIM],
        &filled(HIDDEN_DIM * FFN_DIM),
    );
    write_crtx(
        &dir.join("layer_0_input_norm.weights"),
        &[HIDDEN_DIM],
        &vec![1.0f32; HIDDEN_DIM],
    );
    write_crtx(
        &dir.join("layer_0_post_attn_norm.weights"),
        &[HIDDEN_DIM],
        &vec![1.0f32; HIDDEN_DIM],
    );
}

fn options(max_tokens: usize, temperature: f32) -> GenerationOptions {
    GenerationOptions {
        temperature: Some(temperature),
        top_p: Some(1.0),
        top_k: Some(0),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn user(text: &str) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: text.to_string(),
    }
}

#[test]
fn generate_is_deterministic_at_zero_temperature() {
    let dir = tempfile::tempdir().unwrap();
    write_model_dir(dir.path());

    let mut a = Session::load(dir.path()).unwrap();
    let mut b = Session::load(dir.path()).unwrap();

    let messages = vec![user("hello")];
    let opts = options(4, 0.0);

    let ra = a.generate(&messages, &opts, None, None).unwrap();
    let rb = b.generate(&messages, &opts, None, None).unwrap();

    assert_eq!(ra.response, rb.response);
    assert_eq!(ra.completion_tokens, rb.completion_tokens);
    assert_eq!(ra.completion_tokens, 4);
}

#[test]
fn stop_handle_surfaces_as_stopped_outcome() {
    let dir = tempfile::tempdir().unwrap();
    write_model_dir(dir.path());
    let mut session = Session::load(dir.path()).unwrap();
    let opts = options(50, 0.0);

    session.stop();
    let response = session.generate(&[user("hi")], &opts, None, None).unwrap();

    assert_eq!(response.outcome, GenerationOutcome::Stopped);
    // The first decoding call always runs before cancellation is
    // observed, so exactly one token is emitted, not zero.
    assert_eq!(response.completion_tokens, 1);
}

#[test]
fn generate_rejects_empty_messages() {
    let dir = tempfile::tempdir().unwrap();
    write_model_dir(dir.path());
    let mut session = Session::load(dir.path()).unwrap();
    let opts = options(4, 0.0);

    let err = session.generate(&[], &opts, None, None).unwrap_err();
    assert!(matches!(err, EngineError::TokenizationError(_)));
}

#[test]
fn zero_max_tokens_does_not_mark_prompt_as_processed() {
    let dir = tempfile::tempdir().unwrap();
    write_model_dir(dir.path());
    let mut session = Session::load(dir.path()).unwrap();

    let zero = session
        .generate(&[user("hello")], &options(0, 0.0), None, None)
        .unwrap();
    assert_eq!(zero.completion_tokens, 0);
    assert!(session.processed_tokens.is_empty());

    // A real call afterwards must still run the full prompt through
    // the model rather than treating it as already cached.
    let real = session
        .generate(&[user("hello")], &options(2, 0.0), None, None)
        .unwrap();
    assert_eq!(
        session.processed_tokens.len(),
        real.prompt_tokens + real.completion_tokens
    );
}

#[test]
fn generate_resets_context_on_prompt_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    write_model_dir(dir.path());
    let mut session = Session::load(dir.path()).unwrap();
    let opts = options(3, 0.0);

    let first = session.generate(&[user("hello")], &opts, None, None).unwrap();
    assert_eq!(
        session.processed_tokens.len(),
        first.prompt_tokens + first.completion_tokens
    );

    // A prompt that shares no prefix with the first forces a reset
    // rather than a corrupted concatenation of the two histories.
    let second = session
        .generate(&[user("goodbye")], &opts, None, None)
        .unwrap();
    assert_eq!(
        session.processed_tokens.len(),
        second.prompt_tokens + second.completion_tokens
    );
}

#[test]
fn generate_extends_cache_across_conversation_turns() {
    let dir = tempfile::tempdir().unwrap();
    write_model_dir(dir.path());
    let mut session = Session::load(dir.path()).unwrap();
    let opts = options(2, 0.0);

    let first = session.generate(&[user("hi")], &opts, None, None).unwrap();

    let mut history = vec![
        user("hi"),
        ChatMessage {
            role: "assistant".to_string(),
            content: first.response.clone(),
        },
    ];
    history.push(user("again"));

    // Exercises the KV-cache concat path (cached_kv carried into
    // `build_layer`) across a second turn; a shape or offset bug in
    // that path surfaces here as an `Err`, not just a wrong value.
    let second = session.generate(&history, &opts, None, None).unwrap();
    assert_eq!(
        session.processed_tokens.len(),
        second.prompt_tokens + second.completion_tokens
    );
}
