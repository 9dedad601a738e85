//! Byte-level BPE encode/decode, special-token segmentation and
//! chat-template rendering (spec §2 row D, §4.D).

pub mod bpe;
pub mod special;
pub mod template;

use std::path::Path;

use bpe::BpeTokenizer;
use special::{SpecialTokens, Segment};
pub use template::{ChatMessage, ChatTemplate};

use crate::error::{EngineError, Result};

pub struct Tokenizer {
    bpe: BpeTokenizer,
    special: SpecialTokens,
    pub chat_template: ChatTemplate,
    pub bos_token_id: u32,
    pub eos_token_id: u32,
    pub pad_token_id: u32,
}

impl Tokenizer {
    pub fn load(
        model_dir: &Path,
        bos_token_id: u32,
        eos_token_id: u32,
        pad_token_id: u32,
        unk_token_id: u32,
    ) -> Result<Self> {
        let bpe = BpeTokenizer::load(
            &model_dir.join("vocab.txt"),
            &model_dir.join("merges.txt"),
            unk_token_id,
        )?;
        let special_path = model_dir.join("special_tokens.json");
        let special = if special_path.exists() {
            SpecialTokens::load(&special_path)?
        } else {
            SpecialTokens::empty()
        };
        let chat_template = ChatTemplate::load_optional(&model_dir.join("chat_template.jinja2"))?;

        Ok(Self {
            bpe,
            special,
            chat_template,
            bos_token_id,
            eos_token_id,
            pad_token_id,
        })
    }

    /// Splits `text` by registered special tokens, then runs byte-level
    /// BPE over each plain span. A zero-length encoding of non-empty
    /// input is a `TokenizationError` (spec boundary behavior #9).
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        if text.is_empty() {
            return Err(EngineError::TokenizationError(
                "cannot encode empty text".to_string(),
            ));
        }
        let mut ids = Vec::new();
        for segment in self.special.split(text) {
            match segment {
                Segment::Special(id) => ids.push(id),
                Segment::Plain(s) => ids.extend(self.bpe.encode_segment(s)),
            }
        }
        if ids.is_empty() {
            return Err(EngineError::TokenizationError(
                "encoding produced zero tokens for non-empty input".to_string(),
            ));
        }
        Ok(ids)
    }

    /// Decodes a token-id sequence back to text, emitting special-token
    /// literals verbatim and inverting the byte-placeholder map for
    /// ordinary tokens.
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut out = String::new();
        let mut run: Vec<u32> = Vec::new();
        for &id in ids {
            if let Some(literal) = self.special.literal(id) {
                if !run.is_empty() {
                    out.push_str(&self.bpe.decode_ids(&run));
                    run.clear();
                }
                out.push_str(literal);
            } else {
                run.push(id);
            }
        }
        if !run.is_empty() {
            out.push_str(&self.bpe.decode_ids(&run));
        }
        out
    }

    pub fn vocab_size(&self) -> usize {
        self.bpe.vocab_size()
    }
}
