//! Vocabulary loading and lookup for tiktoken BPE files.
//!
//! A [`Vocabulary`] is the bijection between byte sequences and ordinary ranks.
//! It is built once from serialized data and never mutated afterwards; the
//! merge engine queries the `bytes -> rank` direction and decoding queries
//! `rank -> bytes`.
//!
//! # Tiktoken Format
//!
//! Each line holds a base64-encoded token, a space, and its integer rank:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! `SGVsbG8=` decodes to `Hello` (rank 0), `V29ybGQ=` to `World` (rank 1) and
//! `IQ==` to `!` (rank 2). Lower ranks are merged first.
//!
//! # Vocabulary Files
//!
//! The reference files shipped in `vocabs/`:
//! - `r50k_base.tiktoken`: GPT-3 (`davinci`), also used for `gpt2`
//! - `p50k_base.tiktoken`: Codex, `text-davinci-002/003`, edit models
//! - `cl100k_base.tiktoken`: GPT-4, GPT-3.5-turbo, `text-embedding-*`
//! - `o200k_base.tiktoken`: GPT-4o, GPT-4.1, o-series

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Token identifier.
pub type Rank = u32;

/// Errors that can occur when loading vocabulary data.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    Parse(String),
    #[error("Rank {0} is assigned to more than one byte sequence")]
    DuplicateRank(Rank),
    #[error("Byte sequence for rank {0} already has a rank")]
    DuplicateBytes(Rank),
    #[error("Single byte 0x{0:02x} has no rank")]
    MissingByte(u8),
    #[error("Rank {0} cannot be built by merging two lower-ranked entries")]
    NotMergeable(Rank),
}

/// Immutable bidirectional mapping between byte sequences and ranks.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    encoder: FxHashMap<Vec<u8>, Rank>,
    decoder: FxHashMap<Rank, Vec<u8>>,
    byte_ranks: [Rank; 256],
}

impl Vocabulary {
    /// Parse tiktoken-format data (`base64_token rank\n` per line).
    pub fn from_tiktoken(data: &[u8]) -> Result<Self, VocabError> {
        Self::from_pairs(parse_tiktoken(data)?)
    }

    /// Build a vocabulary from an existing `bytes -> rank` map.
    pub fn from_encoder(encoder: FxHashMap<Vec<u8>, Rank>) -> Result<Self, VocabError> {
        let mut decoder = FxHashMap::with_capacity_and_hasher(encoder.len(), Default::default());
        for (bytes, &rank) in &encoder {
            if decoder.insert(rank, bytes.clone()).is_some() {
                return Err(VocabError::DuplicateRank(rank));
            }
        }
        let byte_ranks = byte_ranks(&encoder)?;
        Ok(Self {
            encoder,
            decoder,
            byte_ranks,
        })
    }

    /// Build a vocabulary from `(bytes, rank)` pairs, rejecting duplicates on
    /// either side.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, VocabError>
    where
        I: IntoIterator<Item = (Vec<u8>, Rank)>,
    {
        let pairs = pairs.into_iter();
        let (lower, _) = pairs.size_hint();
        let mut encoder = FxHashMap::with_capacity_and_hasher(lower, Default::default());
        let mut decoder = FxHashMap::with_capacity_and_hasher(lower, Default::default());

        for (bytes, rank) in pairs {
            if decoder.contains_key(&rank) {
                return Err(VocabError::DuplicateRank(rank));
            }
            if encoder.contains_key(&bytes) {
                return Err(VocabError::DuplicateBytes(rank));
            }
            decoder.insert(rank, bytes.clone());
            encoder.insert(bytes, rank);
        }

        let byte_ranks = byte_ranks(&encoder)?;
        Ok(Self {
            encoder,
            decoder,
            byte_ranks,
        })
    }

    /// Check that every multi-byte entry splits into two entries that both
    /// carry a lower rank than the entry itself.
    ///
    /// Costs up to `len - 1` lookups per entry.
    pub fn verify_merges(&self) -> Result<(), VocabError> {
        for (bytes, &rank) in &self.encoder {
            if bytes.len() < 2 {
                continue;
            }
            let mergeable = (1..bytes.len()).any(|mid| {
                let left = self.encoder.get(&bytes[..mid]);
                let right = self.encoder.get(&bytes[mid..]);
                matches!((left, right), (Some(&l), Some(&r)) if l < rank && r < rank)
            });
            if !mergeable {
                return Err(VocabError::NotMergeable(rank));
            }
        }
        Ok(())
    }

    /// Rank of a byte sequence, if it is a vocabulary entry.
    #[inline]
    pub fn rank_of(&self, bytes: &[u8]) -> Option<Rank> {
        self.encoder.get(bytes).copied()
    }

    /// Rank of a single byte. Every byte has one.
    #[inline]
    pub fn byte_rank(&self, byte: u8) -> Rank {
        self.byte_ranks[byte as usize]
    }

    /// Byte sequence of an ordinary rank.
    #[inline]
    pub fn bytes_of(&self, rank: Rank) -> Option<&[u8]> {
        self.decoder.get(&rank).map(Vec::as_slice)
    }

    /// Number of ordinary entries.
    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    /// Highest ordinary rank.
    pub fn max_rank(&self) -> Rank {
        self.decoder.keys().max().copied().unwrap_or(0)
    }

    /// The `bytes -> rank` map used by the merge engine.
    pub fn encoder(&self) -> &FxHashMap<Vec<u8>, Rank> {
        &self.encoder
    }

    /// The `rank -> bytes` map used by decoding.
    pub fn decoder(&self) -> &FxHashMap<Rank, Vec<u8>> {
        &self.decoder
    }
}

fn byte_ranks(encoder: &FxHashMap<Vec<u8>, Rank>) -> Result<[Rank; 256], VocabError> {
    let mut table = [0; 256];
    for b in 0u8..=255 {
        table[b as usize] = *encoder
            .get([b].as_slice())
            .ok_or(VocabError::MissingByte(b))?;
    }
    Ok(table)
}

/// Parse tiktoken-format data into `(bytes, rank)` pairs, in file order.
pub fn parse_tiktoken(data: &[u8]) -> Result<Vec<(Vec<u8>, Rank)>, VocabError> {
    let mut pairs = Vec::with_capacity(data.len() / 12);

    for (line_no, line) in data.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let space_pos = line.iter().rposition(|&b| b == b' ').ok_or_else(|| {
            VocabError::Parse(format!("line {}: missing space separator", line_no + 1))
        })?;

        let token = STANDARD.decode(&line[..space_pos])?;

        let rank_str = std::str::from_utf8(&line[space_pos + 1..]).map_err(|_| {
            VocabError::Parse(format!("line {}: invalid UTF-8 in rank", line_no + 1))
        })?;
        let rank: Rank = rank_str.trim().parse().map_err(|_| {
            VocabError::Parse(format!("line {}: invalid rank {:?}", line_no + 1, rank_str))
        })?;

        pairs.push((token, rank));
    }

    Ok(pairs)
}
