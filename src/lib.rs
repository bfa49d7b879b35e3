//! tokforge - fast tiktoken-compatible BPE tokenizer.
//!
//! Encodes text into the exact token IDs of the reference `r50k_base`,
//! `p50k_base`, `p50k_edit`, `cl100k_base` and `o200k_base` encodings, and
//! estimates the prompt size and completion budget of chat requests.
//!
//! - fancy-regex pre-tokenization with the reference patterns
//! - Rayon parallelism for batch encode/decode
//! - Heap-based BPE merging (no O(N²) blowup on pathological inputs)
//! - FxHashMap for fast lookups
//! - Aho-Corasick for special token matching
//!
//! ```rust
//! use std::collections::HashSet;
//! use tokforge::{Encoding, EncodeError};
//!
//! let bpe = tokforge::singleton(Encoding::Cl100kBase).unwrap();
//! let tokens = bpe.encode_ordinary("Hello, how are you?").unwrap();
//! assert_eq!(tokens, vec![9906, 11, 1268, 527, 499, 30]);
//! assert_eq!(bpe.decode(&tokens).unwrap(), "Hello, how are you?");
//!
//! let err = bpe
//!     .encode_with_special_tokens("<|endoftext|>", &HashSet::new())
//!     .unwrap_err();
//! assert!(matches!(err, EncodeError::DisallowedSpecialToken { .. }));
//! ```

pub mod core;
#[cfg(feature = "logging")]
mod logging;

pub use core::{
    bpe, byte_pair_encode, byte_pair_split, chat, context_size, count_message_tokens,
    encoding_for_model, from_pretrained, load_vocabulary, max_completion_tokens,
    max_completion_tokens_for_prompt, num_tokens_from_messages, parse_tiktoken, pretrained,
    singleton, singleton_for_model, AccountError, BpeOptions, ChatCompletionRequestMessage,
    ChatFormat, CoreBPE, DecodeError, EncodeError, Encoding, FunctionCall, LoadError, Pieces, Rank,
    SpecialMatch, SpecialTokens, Splitter, VocabError, VocabSource, Vocabulary, CL100K_BASE_PATTERN,
    O200K_BASE_PATTERN, R50K_PATTERN,
};
#[cfg(feature = "logging")]
pub use logging::init_logger;
