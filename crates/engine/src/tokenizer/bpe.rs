//! Byte-level BPE vocabulary, merges and encode/decode (spec §4.D).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{EngineError, Result};

/// Maps every raw byte to a stable printable unicode placeholder: the
/// 188 bytes that are already printable ASCII/Latin-1 map to
/// themselves; the remaining 68 map to code points starting at 256.
/// This is GPT-2's byte-level encoding, reused verbatim since it is the
/// de facto standard this spec's `vocab.txt`/`merges.txt` format assumes.
fn byte_to_unicode() -> [char; 256] {
    let mut bytes_to_keep: Vec<u32> = Vec::new();
    bytes_to_keep.extend(b'!' as u32..=b'~' as u32);
    bytes_to_keep.extend(0xA1u32..=0xACu32);
    bytes_to_keep.extend(0xAEu32..=0xFFu32);

    let mut table = [0u32; 256];
    let mut next_extra = 256u32;
    for b in 0..256u32 {
        if bytes_to_keep.contains(&b) {
            table[b as usize] = b;
        } else {
            table[b as usize] = next_extra;
            next_extra += 1;
        }
    }
    let mut out = ['\0'; 256];
    for (i, &cp) in table.iter().enumerate() {
        out[i] = char::from_u32(cp).expect("byte-level table produces valid code points");
    }
    out
}

fn unicode_to_byte_map() -> HashMap<char, u8> {
    let table = byte_to_unicode();
    table
        .iter()
        .enumerate()
        .map(|(b, &c)| (c, b as u8))
        .collect()
}

pub struct BpeTokenizer {
    vocab: Vec<String>,
    token_to_id: HashMap<String, u32>,
    merge_priority: HashMap<(String, String), usize>,
    byte_table: [char; 256],
    byte_lookup: HashMap<char, u8>,
    pub unk_token_id: u32,
}

impl BpeTokenizer {
    /// Loads `vocab.txt` (one literal per line, id = line index) and
    /// `merges.txt` (`a b` pairs, first-match-wins priority = line
    /// index).
    pub fn load(vocab_path: &Path, merges_path: &Path, unk_token_id: u32) -> Result<Self> {
        let vocab_text = std::fs::read_to_string(vocab_path)
            .map_err(|e| EngineError::InvalidModelDirectory(format!("vocab.txt: {e}")))?;
        let vocab: Vec<String> = vocab_text.lines().map(|s| s.to_string()).collect();
        let token_to_id: HashMap<String, u32> = vocab
            .iter()
            .enumerate()
            .map(|(i, tok)| (tok.clone(), i as u32))
            .collect();

        let merges_text = std::fs::read_to_string(merges_path)
            .map_err(|e| EngineError::InvalidModelDirectory(format!("merges.txt: {e}")))?;
        let mut merge_priority = HashMap::new();
        for (priority, line) in merges_text.lines().enumerate() {
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            if let Some((a, b)) = line.split_once(' ') {
                merge_priority.insert((a.to_string(), b.to_string()), priority);
            }
        }

        Ok(Self {
            vocab,
            token_to_id,
            merge_priority,
            byte_table: byte_to_unicode(),
            byte_lookup: unicode_to_byte_map(),
            unk_token_id,
        })
    }

    fn bytes_to_placeholder(&self, bytes: &[u8]) -> Vec<String> {
        bytes
            .iter()
            .map(|&b| self.byte_table[b as usize].to_string())
            .collect()
    }

    /// Runs the merge loop on a single non-special substring: repeatedly
    /// find the adjacent pair with the smallest registered priority
    /// (leftmost on ties), merge it, until no adjacent pair has a
    /// registered merge.
    fn bpe_merge(&self, mut symbols: Vec<String>) -> Vec<String> {
        loop {
            let mut best: Option<(usize, usize)> = None; // (priority, position)
            for i in 0..symbols.len().saturating_sub(1) {
                if let Some(&p) = self
                    .merge_priority
                    .get(&(symbols[i].clone(), symbols[i + 1].clone()))
                {
                    if best.map(|(bp, _)| p < bp).unwrap_or(true) {
                        best = Some((p, i));
                    }
                }
            }
            match best {
                None => break,
                Some((_, pos)) => {
                    let merged = format!("{}{}", symbols[pos], symbols[pos + 1]);
                    symbols.splice(pos..pos + 2, [merged]);
                }
            }
        }
        symbols
    }

    /// Encodes one non-special substring (already segmented away from
    /// special-token literals by the caller) into token ids.
    pub fn encode_segment(&self, text: &str) -> Vec<u32> {
        let placeholders = self.bytes_to_placeholder(text.as_bytes());
        let merged = self.bpe_merge(placeholders);
        merged
            .iter()
            .map(|tok| *self.token_to_id.get(tok).unwrap_or(&self.unk_token_id))
            .collect()
    }

    /// Concatenates token literals and inverts the byte-placeholder map;
    /// failed inversions emit `?`.
    pub fn decode_ids(&self, ids: &[u32]) -> String {
        let mut bytes = Vec::new();
        for &id in ids {
            let literal = match self.vocab.get(id as usize) {
                Some(l) => l,
                None => {
                    bytes.push(b'?');
                    continue;
                }
            };
            for c in literal.chars() {
                match self.byte_lookup.get(&c) {
                    Some(&b) => bytes.push(b),
                    None => bytes.push(b'?'),
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn token_literal(&self, id: u32) -> Option<&str> {
        self.vocab.get(id as usize).map(|s| s.as_str())
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn round_trip_without_merges() {
        let vocab = write_temp(
            &(0u8..=255)
                .map(|b| byte_to_unicode()[b as usize].to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let merges = write_temp("");
        let tok = BpeTokenizer::load(vocab.path(), merges.path(), 0).unwrap();
        let text = "hello, world! \u{1F980}";
        let ids = tok.encode_segment(text);
        assert_eq!(tok.decode_ids(&ids), text);
    }
}
