//! Special token registry.
//!
//! Special tokens are reserved literals (`<|endoftext|>`, FIM markers, ...)
//! with ranks outside the ordinary vocabulary. They are matched as whole
//! units before pre-tokenization and never reach the merge engine.
//!
//! Matching uses a single Aho-Corasick automaton in leftmost-longest mode,
//! so when two literals start at the same position the longer one wins.

use aho_corasick::{AhoCorasick, Anchored, Input, MatchKind, StartKind};
use rustc_hash::FxHashMap;

use super::vocab::Rank;

/// A special token occurrence in a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub rank: Rank,
    pub literal: &'a str,
}

/// Immutable mapping from special literals to their reserved ranks.
#[derive(Debug, Clone)]
pub struct SpecialTokens {
    encoder: FxHashMap<String, Rank>,
    decoder: FxHashMap<Rank, String>,
    // automaton pattern index -> (literal, rank)
    entries: Vec<(String, Rank)>,
    matcher: Option<AhoCorasick>,
}

impl SpecialTokens {
    pub fn new(tokens: FxHashMap<String, Rank>) -> Result<Self, aho_corasick::BuildError> {
        let mut entries: Vec<(String, Rank)> =
            tokens.iter().map(|(s, &r)| (s.clone(), r)).collect();
        entries.sort_by_key(|&(_, rank)| rank);

        let matcher = if entries.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .start_kind(StartKind::Both)
                    .build(entries.iter().map(|(s, _)| s.as_str()))?,
            )
        };

        let decoder = tokens.iter().map(|(s, &r)| (r, s.clone())).collect();

        Ok(Self {
            encoder: tokens,
            decoder,
            entries,
            matcher,
        })
    }

    /// A registry with no special tokens.
    pub fn empty() -> Self {
        Self {
            encoder: FxHashMap::default(),
            decoder: FxHashMap::default(),
            entries: Vec::new(),
            matcher: None,
        }
    }

    /// Longest special literal starting exactly at `position`, as
    /// `(rank, length in bytes)`.
    pub fn match_longest_special(&self, text: &[u8], position: usize) -> Option<(Rank, usize)> {
        let matcher = self.matcher.as_ref()?;
        if position > text.len() {
            return None;
        }
        let input = Input::new(text).range(position..).anchored(Anchored::Yes);
        let m = matcher.find(input)?;
        let (_, rank) = self.entries[m.pattern().as_usize()];
        Some((rank, m.len()))
    }

    /// Non-overlapping special literals in `text`, left to right.
    pub fn find_iter<'a>(&'a self, text: &'a [u8]) -> impl Iterator<Item = SpecialMatch<'a>> + 'a {
        self.matcher
            .iter()
            .flat_map(move |matcher| matcher.find_iter(text))
            .map(move |m| {
                let (literal, rank) = &self.entries[m.pattern().as_usize()];
                SpecialMatch {
                    start: m.start(),
                    end: m.end(),
                    rank: *rank,
                    literal: literal.as_str(),
                }
            })
    }

    pub fn rank_of(&self, literal: &str) -> Option<Rank> {
        self.encoder.get(literal).copied()
    }

    pub fn literal_of(&self, rank: Rank) -> Option<&str> {
        self.decoder.get(&rank).map(String::as_str)
    }

    /// Literals in rank order.
    pub fn literals(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_rank(&self) -> Option<Rank> {
        self.entries.last().map(|&(_, rank)| rank)
    }

    pub fn encoder(&self) -> &FxHashMap<String, Rank> {
        &self.encoder
    }
}
