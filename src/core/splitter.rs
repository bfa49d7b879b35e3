//! Pre-tokenization: partition text into pieces before merging.
//!
//! Each encoding family has one pattern. Pieces never span a pattern
//! boundary, so merges never cross word, number, or whitespace boundaries.
//! Input that is not valid UTF-8 is split around its invalid runs; every
//! invalid run becomes a piece of its own and merges at the byte level.

use std::iter::Peekable;
use std::str::Utf8Chunks;

use fancy_regex::{Matches, Regex, RegexBuilder};

/// Pattern for r50k_base, p50k_base and p50k_edit (GPT-2, GPT-3, Codex).
pub const R50K_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Pattern for cl100k_base (GPT-4, GPT-3.5-turbo).
///
/// Numbers are split into runs of at most three digits.
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Pattern for o200k_base (GPT-4o, GPT-4.1, o-series).
///
/// Case-aware word splitting, with contractions attached to the word they
/// follow.
pub const O200K_BASE_PATTERN: &str = concat!(
    r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n/]*",
    r"|\s*[\r\n]+",
    r"|\s+(?!\S)",
    r"|\s+",
);

/// Backtracking budget per match, ten times the fancy-regex default.
const BACKTRACK_LIMIT: usize = 10_000_000;

/// A compiled segmentation pattern. Stateless and shareable across threads.
#[derive(Debug, Clone)]
pub struct Splitter {
    regex: Regex,
}

impl Splitter {
    pub fn new(pattern: &str) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            regex: RegexBuilder::new(pattern)
                .backtrack_limit(BACKTRACK_LIMIT)
                .build()?,
        })
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Lazily split `text` into pieces.
    ///
    /// Pieces are contiguous, non-overlapping and, concatenated, reproduce
    /// `text` exactly. Splitting the same text again yields the same pieces.
    pub fn split<'r, 't>(&'r self, text: &'t [u8]) -> Pieces<'r, 't> {
        Pieces {
            regex: &self.regex,
            text,
            offset: 0,
            chunks: text.utf8_chunks().peekable(),
            matches: None,
            invalid: &[],
        }
    }

    /// Split valid UTF-8 text.
    pub fn split_str<'r, 't>(&'r self, text: &'t str) -> Pieces<'r, 't> {
        self.split(text.as_bytes())
    }
}

/// Iterator over the pieces of one text. See [`Splitter::split`].
///
/// Yields an error only when the regex engine gives up on a match. The
/// fancy-regex VM keeps a fixed backtracking stack of one million entries,
/// so a single homogeneous run (letters, digits or whitespace) approaching
/// one million characters fails with a stack overflow error instead of
/// splitting.
pub struct Pieces<'r, 't> {
    regex: &'r Regex,
    text: &'t [u8],
    /// Start of the next unread chunk in `text`.
    offset: usize,
    chunks: Peekable<Utf8Chunks<'t>>,
    matches: Option<Matches<'r, 't>>,
    invalid: &'t [u8],
}

impl<'r, 't> Iterator for Pieces<'r, 't> {
    type Item = Result<&'t [u8], fancy_regex::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(matches) = self.matches.as_mut() {
                match matches.next() {
                    Some(Ok(m)) => return Some(Ok(m.as_str().as_bytes())),
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.matches = None,
                }
            }

            if !self.invalid.is_empty() {
                return Some(Ok(std::mem::take(&mut self.invalid)));
            }

            let chunk = self.chunks.next()?;
            if !chunk.valid().is_empty() {
                self.matches = Some(self.regex.find_iter(chunk.valid()));
            }

            // utf8_chunks stops each invalid sequence after at most three
            // bytes; adjacent sequences with no valid text between them are
            // one run.
            let start = self.offset + chunk.valid().len();
            let mut end = start + chunk.invalid().len();
            while let Some(next) = self.chunks.next_if(|c| c.valid().is_empty()) {
                end += next.invalid().len();
            }
            self.offset = end;
            self.invalid = &self.text[start..end];
        }
    }
}
