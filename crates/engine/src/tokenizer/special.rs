//! Special-token recognition: longest-first segmentation around
//! atomic special-token literals (spec §4.D).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{EngineError, Result};

pub struct SpecialTokens {
    id_to_literal: HashMap<u32, String>,
    literals_longest_first: Vec<(String, u32)>,
}

impl SpecialTokens {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidModelDirectory(format!("special_tokens.json: {e}")))?;
        let map: HashMap<String, String> = serde_json::from_str(&text)
            .map_err(|e| EngineError::InvalidModelDirectory(format!("special_tokens.json: {e}")))?;

        let mut id_to_literal = HashMap::new();
        let mut literals_longest_first = Vec::new();
        for (id_str, literal) in map {
            let id: u32 = id_str
                .parse()
                .map_err(|_| EngineError::InvalidModelDirectory(format!("bad special token id {id_str}")))?;
            id_to_literal.insert(id, literal.clone());
            literals_longest_first.push((literal, id));
        }
        literals_longest_first.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Ok(Self {
            id_to_literal,
            literals_longest_first,
        })
    }

    pub fn empty() -> Self {
        Self {
            id_to_literal: HashMap::new(),
            literals_longest_first: Vec::new(),
        }
    }

    pub fn literal(&self, id: u32) -> Option<&str> {
        self.id_to_literal.get(&id).map(|s| s.as_str())
    }

    /// Splits `text` into a sequence of segments, each either an atomic
    /// special token (by id) or a plain substring, scanning left to
    /// right and preferring the longest matching special-token literal
    /// at each position.
    pub fn split<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut pos = 0usize;
        let mut plain_start = 0usize;

        while pos < text.len() {
            let matched = self
                .literals_longest_first
                .iter()
                .find(|(literal, _)| text[pos..].starts_with(literal.as_str()));

            match matched {
                Some((literal, id)) => {
                    if plain_start < pos {
                        segments.push(Segment::Plain(&text[plain_start..pos]));
                    }
                    segments.push(Segment::Special(*id));
                    pos += literal.len();
                    plain_start = pos;
                }
                None => {
                    let ch_len = text[pos..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                    pos += ch_len;
                }
            }
        }
        if plain_start < text.len() {
            segments.push(Segment::Plain(&text[plain_start..]));
        }
        segments
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Segment<'a> {
    Special(u32),
    Plain(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments_eq(got: Vec<Segment>, want: &[Segment]) {
        assert_eq!(got.len(), want.len());
        for (a, b) in got.iter().zip(want) {
            match (a, b) {
                (Segment::Special(x), Segment::Special(y)) => assert_eq!(x, y),
                (Segment::Plain(x), Segment::Plain(y)) => assert_eq!(x, y),
                _ => panic!("segment kind mismatch: {a:?} vs {b:?}"),
            }
        }
    }

    #[test]
    fn empty_table_yields_a_single_plain_segment() {
        let tokens = SpecialTokens::empty();
        let segments = tokens.split("hello world");
        segments_eq(segments, &[Segment::Plain("hello world")]);
    }

    #[test]
    fn longest_literal_wins_at_each_position() {
        let mut tokens = SpecialTokens::empty();
        tokens
            .literals_longest_first
            .push(("<|im_end|>".to_string(), 2));
        tokens.literals_longest_first.push(("<|im".to_string(), 1));
        tokens.literals_longest_first.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let segments = tokens.split("a<|im_end|>b");
        segments_eq(
            segments,
            &[Segment::Plain("a"), Segment::Special(2), Segment::Plain("b")],
        );
    }

    #[test]
    fn unmatched_text_passes_through_whole() {
        let tokens = SpecialTokens::empty();
        let segments = tokens.split("");
        assert!(segments.is_empty());
    }
}
