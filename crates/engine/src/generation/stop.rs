//! Stop-sequence compilation and matching (spec §4.E).
//!
//! Detection is trailing token-id equality only: a stop sequence
//! matches when its ids equal the last `len(stop)` ids of `generated`.
//! This can miss matches spanning a tokenization boundary (e.g. a stop
//! string that tokenizes differently when preceded by a space) — the
//! spec inherits this limitation rather than fixing it (§9).

#[derive(Debug, Clone)]
pub struct StopSequence {
    pub ids: Vec<u32>,
}

/// Tokenizes the EOS token plus every caller-supplied stop string.
/// Empty sequences (including a stop string that tokenizes to nothing)
/// are ignored.
pub fn compile_stop_sequences(
    tokenizer: &crate::tokenizer::Tokenizer,
    eos_token_id: u32,
    extra: &[String],
) -> Vec<StopSequence> {
    let mut sequences = vec![StopSequence {
        ids: vec![eos_token_id],
    }];
    for s in extra {
        if let Ok(ids) = tokenizer.encode(s) {
            if !ids.is_empty() {
                sequences.push(StopSequence { ids });
            }
        }
    }
    sequences
}

/// Returns the first stop sequence whose ids equal the trailing ids of
/// `generated`, if any.
pub fn match_stop<'a>(generated: &[u32], sequences: &'a [StopSequence]) -> Option<&'a StopSequence> {
    sequences.iter().find(|seq| {
        !seq.ids.is_empty()
            && generated.len() >= seq.ids.len()
            && generated[generated.len() - seq.ids.len()..] == seq.ids[..]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_never_matches() {
        let seqs = vec![StopSequence { ids: vec![] }];
        assert!(match_stop(&[1, 2, 3], &seqs).is_none());
    }

    #[test]
    fn trailing_equality_matches() {
        let seqs = vec![StopSequence { ids: vec![5, 6] }];
        assert!(match_stop(&[1, 5, 6], &seqs).is_some());
        assert!(match_stop(&[5, 6, 1], &seqs).is_none());
    }

    #[test]
    fn first_token_stop_terminates_after_one_emission() {
        let seqs = vec![StopSequence { ids: vec![42] }];
        assert!(match_stop(&[42], &seqs).is_some());
    }
}
