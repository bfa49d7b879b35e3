//! Core tokenization engine for tokforge.
//!
//! This module contains the BPE tokenizer implementation with:
//! - Vocabulary loading from tiktoken format
//! - Special token matching with an Aho-Corasick automaton
//! - Regex pre-tokenization, one pattern per encoding family
//! - Byte-pair merging (linear scan for short pieces, heap for long ones)
//! - Chat request token accounting
//!
//! # Architecture
//!
//! - [`Vocabulary`]: immutable `bytes <-> rank` bijection
//! - [`SpecialTokens`]: reserved literals and their ranks
//! - [`Splitter`]: compiled pre-tokenizer pattern
//! - [`bpe`]: the merge algorithm for one piece
//! - [`CoreBPE`]: encode/decode facade over the three above
//! - [`pretrained`]: embedded encodings, model names and context windows
//! - [`chat`]: prompt token counts and completion budgets
//!
//! A [`CoreBPE`] holds no mutable state. Share one instance across threads
//! instead of building one per call.

pub mod bpe;
pub mod chat;
pub mod pretrained;
mod special;
mod splitter;
mod tokenizer;
mod vocab;

pub use bpe::{byte_pair_encode, byte_pair_split};
pub use chat::{
    count_message_tokens, max_completion_tokens, max_completion_tokens_for_prompt,
    num_tokens_from_messages, AccountError, ChatCompletionRequestMessage, ChatFormat, FunctionCall,
};
pub use pretrained::{
    context_size, encoding_for_model, from_pretrained, load_vocabulary, singleton,
    singleton_for_model, Encoding, VocabSource,
};
pub use special::{SpecialMatch, SpecialTokens};
pub use splitter::{Pieces, Splitter, CL100K_BASE_PATTERN, O200K_BASE_PATTERN, R50K_PATTERN};
pub use tokenizer::{BpeOptions, CoreBPE, DecodeError, EncodeError, LoadError};
pub use vocab::{parse_tiktoken, Rank, VocabError, Vocabulary};
