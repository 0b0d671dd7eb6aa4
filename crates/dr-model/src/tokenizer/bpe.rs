use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::GgufMetadata;

use super::vocab::{Vocab, MERGES_KEY};
use super::Tokenizer;

const SPACE_MARKER: char = '\u{2581}';

/// Byte-pair encoding tokenizer loaded from GGUF metadata.
///
/// With `tokenizer.ggml.merges` present, pairs merge in rank order (GPT-2
/// style). Without merges, the adjacent pair whose concatenation has the
/// highest vocabulary score merges first (SentencePiece style).
#[derive(Debug, Clone)]
pub struct BpeTokenizer {
    pub vocab: Vocab,
    merge_ranks: HashMap<(String, String), usize>,
    space_marker: bool,
}

impl BpeTokenizer {
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<BpeTokenizer> {
        let vocab = Vocab::from_gguf(metadata)?;
        let merges = if metadata.contains(MERGES_KEY) {
            metadata.get_string_array(MERGES_KEY)?
        } else {
            Vec::new()
        };
        BpeTokenizer::new(vocab, &merges)
    }

    /// Build from a vocabulary and "left right" merge rules, highest
    /// priority first.
    pub fn new(vocab: Vocab, merges: &[String]) -> Result<BpeTokenizer> {
        let mut merge_ranks = HashMap::with_capacity(merges.len());
        for (rank, entry) in merges.iter().enumerate() {
            let (left, right) = entry.split_once(' ').ok_or_else(|| {
                ModelError::TokenizerError(format!("invalid merge entry: {:?}", entry))
            })?;
            merge_ranks
                .entry((left.to_string(), right.to_string()))
                .or_insert(rank);
        }
        let space_marker = vocab.tokens.iter().any(|t| t.contains(SPACE_MARKER));
        Ok(BpeTokenizer {
            vocab,
            merge_ranks,
            space_marker,
        })
    }

    pub fn bos_id(&self) -> Option<u32> {
        self.vocab.bos_id
    }

    /// Split into per-character symbols, falling back to `<0xHH>` byte
    /// tokens for characters the vocabulary does not contain.
    fn initial_symbols(&self, text: &str) -> Vec<String> {
        let mut symbols = Vec::with_capacity(text.len());
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let ch = if self.space_marker && ch == ' ' {
                SPACE_MARKER
            } else {
                ch
            };
            let s = ch.encode_utf8(&mut buf);
            if self.vocab.id(s).is_some() {
                symbols.push(s.to_string());
                continue;
            }
            for byte in s.bytes() {
                symbols.push(format!("<0x{:02X}>", byte));
            }
        }
        symbols
    }

    fn best_merge(&self, symbols: &[String]) -> Option<usize> {
        let pairs = symbols.windows(2).enumerate();
        if !self.merge_ranks.is_empty() {
            return pairs
                .filter_map(|(i, w)| {
                    self.merge_ranks
                        .get(&(w[0].clone(), w[1].clone()))
                        .map(|&rank| (rank, i))
                })
                .min()
                .map(|(_, i)| i);
        }

        let mut best: Option<(f32, usize)> = None;
        for (i, w) in pairs {
            let merged = format!("{}{}", w[0], w[1]);
            if let Some(id) = self.vocab.id(&merged) {
                let score = self.vocab.score(id);
                if best.map_or(true, |(s, _)| score > s) {
                    best = Some((score, i));
                }
            }
        }
        best.map(|(_, i)| i)
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut symbols = self.initial_symbols(text);
        while let Some(i) = self.best_merge(&symbols) {
            let right = symbols.remove(i + 1);
            symbols[i].push_str(&right);
        }
        Ok(symbols
            .iter()
            .map(|s| self.vocab.id(s).unwrap_or(self.vocab.unknown_id))
            .collect())
    }

    /// Out-of-range ids and the BOS/EOS markers decode to nothing.
    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let mut bytes = Vec::new();
        for &id in tokens {
            if self.vocab.is_special(id) {
                continue;
            }
            let Some(tok) = self.vocab.token(id) else {
                continue;
            };
            if let Some(byte) = parse_byte_token(tok) {
                bytes.push(byte);
            } else if self.space_marker {
                bytes.extend_from_slice(tok.replace(SPACE_MARKER, " ").as_bytes());
            } else {
                bytes.extend_from_slice(tok.as_bytes());
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_id(&self) -> Option<u32> {
        self.vocab.eos_id
    }
}

/// `<0xHH>` byte tokens.
fn parse_byte_token(tok: &str) -> Option<u8> {
    let hex = tok.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(tokens: &[&str], scores: Vec<f32>) -> Vocab {
        let tokens = tokens.iter().map(|t| t.to_string()).collect();
        Vocab::new(tokens, scores, Some(1), Some(2), 0).unwrap()
    }

    #[test]
    fn test_ranked_merges() {
        let v = vocab(
            &["<unk>", "<s>", "</s>", "h", "e", "l", "o", "he", "ll", "hell", "hello"],
            vec![0.0; 11],
        );
        let merges: Vec<String> = ["h e", "l l", "he ll", "hell o"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let tok = BpeTokenizer::new(v, &merges).unwrap();
        assert_eq!(tok.encode("hello").unwrap(), vec![10]);
        assert_eq!(tok.encode("hell").unwrap(), vec![9]);
        assert_eq!(tok.decode(&[1, 10, 2]).unwrap(), "hello");
    }

    #[test]
    fn test_score_merges_and_space_marker() {
        let v = vocab(
            &["<unk>", "<s>", "</s>", "a", "b", "\u{2581}", "ab", "\u{2581}a"],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 1.0],
        );
        let tok = BpeTokenizer::new(v, &[]).unwrap();
        // "ab" outscores "\u{2581}a", so the marker is left on its own.
        assert_eq!(tok.encode("ab ab").unwrap(), vec![6, 5, 6]);
        assert_eq!(tok.decode(&[6, 7]).unwrap(), "ab a");
    }

    #[test]
    fn test_byte_fallback() {
        let mut tokens: Vec<String> = vec!["<unk>".into(), "<s>".into(), "</s>".into()];
        tokens.extend((0..=255u32).map(|b| format!("<0x{:02X}>", b)));
        let n = tokens.len();
        let v = Vocab::new(tokens, vec![0.0; n], Some(1), Some(2), 0).unwrap();
        let tok = BpeTokenizer::new(v, &[]).unwrap();

        let ids = tok.encode("é").unwrap();
        assert_eq!(ids, vec![3 + 0xC3, 3 + 0xA9]);
        assert_eq!(tok.decode(&ids).unwrap(), "é");
        // A lone lead byte is not valid UTF-8.
        assert_eq!(tok.decode(&ids[..1]).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn test_unknown_and_out_of_range() {
        let v = vocab(&["<unk>", "<s>", "</s>", "a"], vec![0.0; 4]);
        let tok = BpeTokenizer::new(v, &[]).unwrap();
        assert_eq!(tok.encode("az").unwrap(), vec![3, 0]);
        assert_eq!(tok.decode(&[3, 999]).unwrap(), "a");
        assert_eq!(tok.eos_id(), Some(2));
    }

    #[test]
    fn test_invalid_merge_entry() {
        let v = vocab(&["<unk>", "<s>", "</s>"], vec![0.0; 3]);
        assert!(BpeTokenizer::new(v, &["nospace".to_string()]).is_err());
    }
}
