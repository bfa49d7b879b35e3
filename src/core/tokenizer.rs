use std::collections::HashSet;
use std::fmt;

use log::{debug, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::bpe::byte_pair_encode;
use super::special::SpecialTokens;
use super::splitter::Splitter;
use super::vocab::{Rank, VocabError, Vocabulary};

/// Failure to build a [`CoreBPE`].
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unknown model or encoding: {0}")]
    UnknownModel(String),
    #[error("Malformed vocabulary data: {0}")]
    MalformedData(#[from] VocabError),
    #[error("Pattern compilation error: {0}")]
    Regex(#[from] fancy_regex::Error),
    #[error("Special token matcher build error: {0}")]
    SpecialMatcher(#[from] aho_corasick::BuildError),
    #[error("Special token rank {0} is also an ordinary rank")]
    SpecialRankCollision(Rank),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Disallowed special token {token:?} at byte offset {offset}")]
    DisallowedSpecialToken { token: String, offset: usize },
    #[error("Pattern matching failed: {0}")]
    Pattern(#[from] fancy_regex::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown rank: {0}")]
    UnknownRank(Rank),
    #[error("Decoded bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Construction options for [`CoreBPE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BpeOptions {
    /// Check that every multi-byte entry decomposes into two lower-ranked
    /// entries. Costs one pass over the vocabulary.
    pub verify_merges: bool,
}

/// A loaded encoding: vocabulary, special tokens and pre-tokenizer pattern.
///
/// Immutable once built. All encode and decode methods take `&self` and
/// share no mutable state, so one instance can serve any number of threads.
#[derive(Clone)]
pub struct CoreBPE {
    vocab: Vocabulary,
    special: SpecialTokens,
    splitter: Splitter,
}

impl CoreBPE {
    /// Create a tokenizer from an encoder map, special tokens and a pattern.
    pub fn new(
        encoder: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, LoadError> {
        Self::with_options(encoder, special_tokens, pattern, BpeOptions::default())
    }

    pub fn with_options(
        encoder: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
        options: BpeOptions,
    ) -> Result<Self, LoadError> {
        let vocab = Vocabulary::from_encoder(encoder)?;
        Self::from_vocabulary(vocab, special_tokens, pattern, options)
    }

    /// Create a tokenizer from tiktoken-format vocabulary data
    /// (`base64(bytes) rank` per line).
    pub fn from_tiktoken_bytes(
        data: &[u8],
        pattern: &str,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Result<Self, LoadError> {
        let vocab = Vocabulary::from_tiktoken(data)?;
        Self::from_vocabulary(vocab, special_tokens, pattern, BpeOptions::default())
    }

    pub fn from_vocabulary(
        vocab: Vocabulary,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
        options: BpeOptions,
    ) -> Result<Self, LoadError> {
        if options.verify_merges {
            vocab.verify_merges()?;
        }

        if let Some(&rank) = special_tokens
            .values()
            .find(|&&rank| vocab.bytes_of(rank).is_some())
        {
            return Err(LoadError::SpecialRankCollision(rank));
        }

        let special = SpecialTokens::new(special_tokens)?;
        let splitter = Splitter::new(pattern)?;

        debug!(
            "built BPE with {} ranks and {} special tokens",
            vocab.len(),
            special.len()
        );

        Ok(Self {
            vocab,
            special,
            splitter,
        })
    }

    /// Merge the pieces of one span with no special tokens in it.
    fn encode_span(&self, span: &[u8], out: &mut Vec<Rank>) -> Result<(), EncodeError> {
        for piece in self.splitter.split(span) {
            let piece = piece?;
            // Fast path: the whole piece is a token
            if let Some(rank) = self.vocab.rank_of(piece) {
                out.push(rank);
            } else {
                out.extend(byte_pair_encode(piece, &self.vocab));
            }
        }
        Ok(())
    }

    /// Encode text, treating special token literals as ordinary text.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<Rank>, EncodeError> {
        self.encode_ordinary_bytes(text.as_bytes())
    }

    /// Encode arbitrary bytes, treating special token literals as ordinary
    /// text. Invalid UTF-8 runs are merged at the byte level.
    pub fn encode_ordinary_bytes(&self, text: &[u8]) -> Result<Vec<Rank>, EncodeError> {
        let mut out = Vec::with_capacity(text.len() / 3 + 1);
        self.encode_span(text, &mut out)?;
        Ok(out)
    }

    /// Encode text, emitting the reserved rank for every special token
    /// literal in `allowed`.
    ///
    /// A special token literal that is not in `allowed` fails the whole call
    /// with [`EncodeError::DisallowedSpecialToken`]; it is never merged as
    /// ordinary text.
    pub fn encode_with_special_tokens(
        &self,
        text: &str,
        allowed: &HashSet<&str>,
    ) -> Result<Vec<Rank>, EncodeError> {
        self.encode_bytes_with_special_tokens(text.as_bytes(), allowed)
    }

    pub fn encode_bytes_with_special_tokens(
        &self,
        text: &[u8],
        allowed: &HashSet<&str>,
    ) -> Result<Vec<Rank>, EncodeError> {
        self.encode_special_filtered(text, |literal| allowed.contains(literal))
    }

    /// Encode text with every registered special token allowed.
    pub fn encode_all_special(&self, text: &str) -> Result<Vec<Rank>, EncodeError> {
        self.encode_special_filtered(text.as_bytes(), |_| true)
    }

    fn encode_special_filtered<F>(
        &self,
        text: &[u8],
        is_allowed: F,
    ) -> Result<Vec<Rank>, EncodeError>
    where
        F: Fn(&str) -> bool,
    {
        let mut out = Vec::with_capacity(text.len() / 3 + 1);
        let mut last_end = 0;

        for m in self.special.find_iter(text) {
            if !is_allowed(m.literal) {
                warn!(
                    "rejected disallowed special token {:?} at offset {}",
                    m.literal, m.start
                );
                return Err(EncodeError::DisallowedSpecialToken {
                    token: m.literal.to_string(),
                    offset: m.start,
                });
            }
            self.encode_span(&text[last_end..m.start], &mut out)?;
            out.push(m.rank);
            last_end = m.end;
        }

        self.encode_span(&text[last_end..], &mut out)?;
        Ok(out)
    }

    /// Number of tokens in `text` encoded with every special token allowed.
    pub fn count_tokens(&self, text: &str) -> Result<usize, EncodeError> {
        Ok(self.encode_all_special(text)?.len())
    }

    /// Number of tokens in `text` encoded as ordinary text.
    pub fn count_ordinary_tokens(&self, text: &str) -> Result<usize, EncodeError> {
        Ok(self.encode_ordinary(text)?.len())
    }

    /// Decode ranks back to bytes. Special ranks decode to their literal.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>, DecodeError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);

        for &token in tokens {
            if let Some(bytes) = self.vocab.bytes_of(token) {
                result.extend_from_slice(bytes);
            } else if let Some(literal) = self.special.literal_of(token) {
                result.extend_from_slice(literal.as_bytes());
            } else {
                warn!("cannot decode unknown rank {}", token);
                return Err(DecodeError::UnknownRank(token));
            }
        }

        Ok(result)
    }

    /// Decode ranks to a string.
    pub fn decode(&self, tokens: &[Rank]) -> Result<String, DecodeError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Decode ranks to a string, replacing invalid UTF-8 with U+FFFD.
    pub fn decode_lossy(&self, tokens: &[Rank]) -> Result<String, DecodeError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The bytes each token stands for, in order.
    pub fn decode_tokens_bytes(&self, tokens: &[Rank]) -> Result<Vec<Vec<u8>>, DecodeError> {
        tokens
            .iter()
            .map(|&token| self.decode_bytes(&[token]))
            .collect()
    }

    /// Batch encode multiple texts in parallel, ignoring special tokens.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<Rank>>, EncodeError> {
        texts
            .par_iter()
            .map(|text| self.encode_ordinary(text))
            .collect()
    }

    /// Batch encode multiple texts in parallel with one allowed set.
    pub fn encode_batch_with_special_tokens(
        &self,
        texts: &[String],
        allowed: &HashSet<&str>,
    ) -> Result<Vec<Vec<Rank>>, EncodeError> {
        texts
            .par_iter()
            .map(|text| self.encode_with_special_tokens(text, allowed))
            .collect()
    }

    /// Batch decode multiple token lists in parallel.
    pub fn decode_batch(&self, token_lists: &[Vec<Rank>]) -> Result<Vec<String>, DecodeError> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode(tokens))
            .collect()
    }

    /// Total number of rank slots, ordinary and special (max rank + 1).
    pub fn vocab_size(&self) -> usize {
        let max_special = self.special.max_rank().unwrap_or(0);
        self.vocab.max_rank().max(max_special) as usize + 1
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn splitter(&self) -> &Splitter {
        &self.splitter
    }

    pub fn pattern(&self) -> &str {
        self.splitter.pattern()
    }
}

impl fmt::Debug for CoreBPE {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBPE")
            .field("ranks", &self.vocab.len())
            .field("special_tokens", &self.special.len())
            .field("pattern", &self.splitter.pattern())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATTERN: &str = r"\S+|\s+";

    fn make_test_tokenizer() -> CoreBPE {
        let mut encoder = FxHashMap::default();
        for b in 0u16..=255 {
            encoder.insert(vec![b as u8], b as Rank);
        }
        encoder.insert(b"He".to_vec(), 256);
        encoder.insert(b"ll".to_vec(), 257);
        encoder.insert(b"Hell".to_vec(), 258);
        encoder.insert(b"Hello".to_vec(), 259);
        encoder.insert(b" W".to_vec(), 260);
        encoder.insert(b" World".to_vec(), 261);

        let mut special_tokens = FxHashMap::default();
        special_tokens.insert("<|endoftext|>".to_string(), 50256);
        special_tokens.insert("<|fim|>".to_string(), 50257);

        let pattern = r" ?\S+|\s+";
        CoreBPE::new(encoder, special_tokens, pattern).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let tokenizer = make_test_tokenizer();
        let text = "Hello World";
        let tokens = tokenizer.encode_ordinary(text).unwrap();
        assert_eq!(tokens, vec![259, 261]);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_empty_text() {
        let tokenizer = make_test_tokenizer();
        assert!(tokenizer.encode_ordinary("").unwrap().is_empty());
        assert!(tokenizer
            .encode_with_special_tokens("", &HashSet::new())
            .unwrap()
            .is_empty());
        assert_eq!(tokenizer.decode(&[]).unwrap(), "");
    }

    #[test]
    fn test_allowed_special_is_single_rank() {
        let tokenizer = make_test_tokenizer();
        let allowed = HashSet::from(["<|endoftext|>"]);
        let tokens = tokenizer
            .encode_with_special_tokens("Hello<|endoftext|> World", &allowed)
            .unwrap();
        assert_eq!(tokens, vec![259, 50256, 261]);
        assert_eq!(
            tokenizer.decode(&tokens).unwrap(),
            "Hello<|endoftext|> World"
        );
    }

    #[test]
    fn test_disallowed_special_fails() {
        let tokenizer = make_test_tokenizer();
        let allowed = HashSet::from(["<|endoftext|>"]);
        let err = tokenizer
            .encode_with_special_tokens("Hello <|fim|>", &allowed)
            .unwrap_err();
        match err {
            EncodeError::DisallowedSpecialToken { token, offset } => {
                assert_eq!(token, "<|fim|>");
                assert_eq!(offset, 6);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_encode_ordinary_ignores_specials() {
        let tokenizer = make_test_tokenizer();
        let tokens = tokenizer.encode_ordinary("<|endoftext|>").unwrap();
        assert!(!tokens.contains(&50256));
        assert_eq!(tokens.len(), "<|endoftext|>".len());
    }

    #[test]
    fn test_encode_all_special() {
        let tokenizer = make_test_tokenizer();
        let text = "<|fim|>Hello<|endoftext|>";
        let tokens = tokenizer.encode_all_special(text).unwrap();
        assert_eq!(tokens, vec![50257, 259, 50256]);
        assert_eq!(tokenizer.count_tokens(text).unwrap(), 3);
        assert_eq!(tokenizer.count_ordinary_tokens("Hello").unwrap(), 1);
    }

    #[test]
    fn test_invalid_utf8_round_trip() {
        let tokenizer = make_test_tokenizer();
        let text = b"He\xffllo\xc3";
        let tokens = tokenizer.encode_ordinary_bytes(text).unwrap();
        assert_eq!(tokenizer.decode_bytes(&tokens).unwrap(), text);
        assert_eq!(tokenizer.decode(&tokens), Err(DecodeError::InvalidUtf8));
        let lossy = tokenizer.decode_lossy(&tokens).unwrap();
        assert!(lossy.contains('\u{FFFD}'));
    }

    #[test]
    fn test_unknown_rank() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(
            tokenizer.decode_bytes(&[259, u32::MAX]),
            Err(DecodeError::UnknownRank(u32::MAX))
        );
        assert_eq!(
            tokenizer.decode(&[1000]),
            Err(DecodeError::UnknownRank(1000))
        );
    }

    #[test]
    fn test_decode_tokens_bytes() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(
            tokenizer.decode_tokens_bytes(&[259, 261, 50256]).unwrap(),
            vec![
                b"Hello".to_vec(),
                b" World".to_vec(),
                b"<|endoftext|>".to_vec(),
            ]
        );
    }

    #[test]
    fn test_batch_matches_sequential() {
        let tokenizer = make_test_tokenizer();
        let texts = vec!["Hello".to_string(), " World".to_string(), "xyz".to_string()];
        let batch_tokens = tokenizer.encode_batch(&texts).unwrap();
        assert_eq!(batch_tokens.len(), 3);
        for (text, tokens) in texts.iter().zip(&batch_tokens) {
            assert_eq!(tokens, &tokenizer.encode_ordinary(text).unwrap());
        }
        assert_eq!(tokenizer.decode_batch(&batch_tokens).unwrap(), texts);
    }

    #[test]
    fn test_batch_with_special_tokens() {
        let tokenizer = make_test_tokenizer();
        let allowed = HashSet::from(["<|fim|>"]);
        let texts = vec!["<|fim|>Hello".to_string(), "Hello".to_string()];
        assert_eq!(
            tokenizer
                .encode_batch_with_special_tokens(&texts, &allowed)
                .unwrap(),
            vec![vec![50257, 259], vec![259]]
        );

        let texts = vec!["<|endoftext|>".to_string()];
        assert!(tokenizer
            .encode_batch_with_special_tokens(&texts, &allowed)
            .is_err());
    }

    #[test]
    fn test_vocab_size() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(tokenizer.vocab_size(), 50258);
    }

    #[test]
    fn test_special_rank_collision() {
        let mut encoder = FxHashMap::default();
        for b in 0u16..=255 {
            encoder.insert(vec![b as u8], b as Rank);
        }
        let mut special_tokens = FxHashMap::default();
        special_tokens.insert("<|bad|>".to_string(), 65);
        let err = CoreBPE::new(encoder, special_tokens, PATTERN).unwrap_err();
        assert!(matches!(err, LoadError::SpecialRankCollision(65)));
    }

    #[test]
    fn test_bad_pattern() {
        let mut encoder = FxHashMap::default();
        for b in 0u16..=255 {
            encoder.insert(vec![b as u8], b as Rank);
        }
        let err = CoreBPE::new(encoder, FxHashMap::default(), r"(unclosed").unwrap_err();
        assert!(matches!(err, LoadError::Regex(_)));
    }

    #[test]
    fn test_verify_merges_option() {
        let mut encoder = FxHashMap::default();
        for b in 0u16..=255 {
            encoder.insert(vec![b as u8], b as Rank);
        }
        // "abc" has no split into two known entries
        encoder.insert(b"abc".to_vec(), 256);

        let options = BpeOptions {
            verify_merges: true,
        };
        let built = CoreBPE::with_options(encoder.clone(), FxHashMap::default(), PATTERN, options);
        assert!(matches!(
            built,
            Err(LoadError::MalformedData(VocabError::NotMergeable(256)))
        ));

        assert!(CoreBPE::new(encoder, FxHashMap::default(), PATTERN).is_ok());
    }

    #[test]
    fn test_from_tiktoken_bytes() {
        let mut data = String::new();
        for b in 0u16..=255 {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode([b as u8]);
            data.push_str(&format!("{} {}\n", encoded, b));
        }
        // "hi" -> aGk=
        data.push_str("aGk= 256\n");

        let special = FxHashMap::default();
        let tokenizer = CoreBPE::from_tiktoken_bytes(data.as_bytes(), PATTERN, special).unwrap();
        assert_eq!(tokenizer.encode_ordinary("hi").unwrap(), vec![256]);
        assert_eq!(
            tokenizer.encode_ordinary("hih").unwrap(),
            vec![256, b'h' as Rank]
        );
    }

    #[test]
    fn test_debug_is_compact() {
        let tokenizer = make_test_tokenizer();
        let shown = format!("{:?}", tokenizer);
        assert!(shown.starts_with("CoreBPE"));
        assert!(shown.contains("ranks: 262"));
    }
}
