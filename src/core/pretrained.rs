//! Pretrained encodings and model-name resolution.
//!
//! The reference vocabularies are embedded at compile time:
//! - `r50k_base` - GPT-2 and the first GPT-3 models (~50k tokens)
//! - `p50k_base` - Codex and `text-davinci-002/003`
//! - `p50k_edit` - the edit models (`p50k_base` plus FIM tokens)
//! - `cl100k_base` - GPT-4, GPT-3.5-turbo, ada-002 embeddings (~100k tokens)
//! - `o200k_base` - GPT-4o, GPT-4.1 and the o-series (~200k tokens)
//!
//! # Example
//!
//! ```rust
//! use tokforge::pretrained::{encoding_for_model, Encoding};
//!
//! assert_eq!(encoding_for_model("gpt-4-0314"), Some(Encoding::Cl100kBase));
//! let bpe = Encoding::Cl100kBase.load().unwrap();
//! assert_eq!(bpe.encode_ordinary("hello").unwrap(), vec![15339]);
//! ```

use std::sync::OnceLock;

use log::debug;
use rustc_hash::FxHashMap;

use super::splitter::{CL100K_BASE_PATTERN, O200K_BASE_PATTERN, R50K_PATTERN};
use super::tokenizer::{CoreBPE, LoadError};
use super::vocab::{Rank, Vocabulary};

// Embed vocabulary files at compile time
pub const R50K_BASE_VOCAB: &[u8] = include_bytes!("../../vocabs/r50k_base.tiktoken");
pub const P50K_BASE_VOCAB: &[u8] = include_bytes!("../../vocabs/p50k_base.tiktoken");
pub const CL100K_BASE_VOCAB: &[u8] = include_bytes!("../../vocabs/cl100k_base.tiktoken");
pub const O200K_BASE_VOCAB: &[u8] = include_bytes!("../../vocabs/o200k_base.tiktoken");

pub const ENDOFTEXT: &str = "<|endoftext|>";
pub const FIM_PREFIX: &str = "<|fim_prefix|>";
pub const FIM_MIDDLE: &str = "<|fim_middle|>";
pub const FIM_SUFFIX: &str = "<|fim_suffix|>";
pub const ENDOFPROMPT: &str = "<|endofprompt|>";

/// Supported encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// GPT-2, GPT-3 (davinci, curie, babbage, ada)
    R50kBase,
    /// Codex, text-davinci-002/003
    P50kBase,
    /// text-davinci-edit-001, code-davinci-edit-001
    P50kEdit,
    /// GPT-4, GPT-3.5-turbo, text-embedding-ada-002
    Cl100kBase,
    /// GPT-4o, GPT-4.1, o1, o3, o4-mini
    O200kBase,
}

impl Encoding {
    pub const ALL: [Encoding; 5] = [
        Self::R50kBase,
        Self::P50kBase,
        Self::P50kEdit,
        Self::Cl100kBase,
        Self::O200kBase,
    ];

    /// Parse an encoding name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "r50k_base" | "gpt2" => Some(Self::R50kBase),
            "p50k_base" => Some(Self::P50kBase),
            "p50k_edit" => Some(Self::P50kEdit),
            "cl100k_base" => Some(Self::Cl100kBase),
            "o200k_base" => Some(Self::O200kBase),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::R50kBase => "r50k_base",
            Self::P50kBase => "p50k_base",
            Self::P50kEdit => "p50k_edit",
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
        }
    }

    /// Get all supported encoding names.
    pub fn supported_names() -> &'static [&'static str] {
        &[
            "r50k_base",
            "gpt2",
            "p50k_base",
            "p50k_edit",
            "cl100k_base",
            "o200k_base",
        ]
    }

    /// The embedded tiktoken data. p50k_edit shares the p50k_base ranks.
    pub fn vocab_data(self) -> &'static [u8] {
        match self {
            Self::R50kBase => R50K_BASE_VOCAB,
            Self::P50kBase | Self::P50kEdit => P50K_BASE_VOCAB,
            Self::Cl100kBase => CL100K_BASE_VOCAB,
            Self::O200kBase => O200K_BASE_VOCAB,
        }
    }

    pub fn pattern(self) -> &'static str {
        match self {
            Self::R50kBase | Self::P50kBase | Self::P50kEdit => R50K_PATTERN,
            Self::Cl100kBase => CL100K_BASE_PATTERN,
            Self::O200kBase => O200K_BASE_PATTERN,
        }
    }

    pub fn special_tokens(self) -> FxHashMap<String, Rank> {
        match self {
            Self::R50kBase | Self::P50kBase => r50k_base_special_tokens(),
            Self::P50kEdit => p50k_edit_special_tokens(),
            Self::Cl100kBase => cl100k_base_special_tokens(),
            Self::O200kBase => o200k_base_special_tokens(),
        }
    }

    /// Rank of `<|endoftext|>`.
    pub fn eot_token_id(self) -> Rank {
        match self {
            Self::R50kBase | Self::P50kBase | Self::P50kEdit => 50256,
            Self::Cl100kBase => 100257,
            Self::O200kBase => 199999,
        }
    }

    /// Whether chat message accounting rules are known for this encoding.
    pub fn supports_chat(self) -> bool {
        matches!(self, Self::Cl100kBase | Self::O200kBase)
    }

    /// Build a fresh [`CoreBPE`] from the embedded data.
    pub fn load(self) -> Result<CoreBPE, LoadError> {
        let vocab = Vocabulary::from_tiktoken(self.vocab_data())?;
        debug!("loaded {} with {} ranks", self.name(), vocab.len());
        CoreBPE::from_vocabulary(
            vocab,
            self.special_tokens(),
            self.pattern(),
            Default::default(),
        )
    }
}

pub fn r50k_base_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = FxHashMap::default();
    special.insert(ENDOFTEXT.to_string(), 50256);
    special
}

pub fn p50k_edit_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = r50k_base_special_tokens();
    special.insert(FIM_PREFIX.to_string(), 50281);
    special.insert(FIM_MIDDLE.to_string(), 50282);
    special.insert(FIM_SUFFIX.to_string(), 50283);
    special
}

pub fn cl100k_base_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = FxHashMap::default();
    special.insert(ENDOFTEXT.to_string(), 100257);
    special.insert(FIM_PREFIX.to_string(), 100258);
    special.insert(FIM_MIDDLE.to_string(), 100259);
    special.insert(FIM_SUFFIX.to_string(), 100260);
    special.insert(ENDOFPROMPT.to_string(), 100276);
    special
}

pub fn o200k_base_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = FxHashMap::default();
    special.insert(ENDOFTEXT.to_string(), 199999);
    special.insert(ENDOFPROMPT.to_string(), 200018);
    special
}

// =============================================================================
// Model name resolution
// =============================================================================

const MODEL_TO_ENCODING: &[(&str, Encoding)] = &[
    // chat
    ("o1", Encoding::O200kBase),
    ("o3", Encoding::O200kBase),
    ("o4-mini", Encoding::O200kBase),
    ("gpt-4.1", Encoding::O200kBase),
    ("chatgpt-4o-latest", Encoding::O200kBase),
    ("gpt-4o", Encoding::O200kBase),
    ("gpt-4", Encoding::Cl100kBase),
    ("gpt-3.5-turbo", Encoding::Cl100kBase),
    ("gpt-3.5", Encoding::Cl100kBase),
    ("gpt-35-turbo", Encoding::Cl100kBase),
    // base
    ("davinci-002", Encoding::Cl100kBase),
    ("babbage-002", Encoding::Cl100kBase),
    // embeddings
    ("text-embedding-ada-002", Encoding::Cl100kBase),
    ("text-embedding-3-small", Encoding::Cl100kBase),
    ("text-embedding-3-large", Encoding::Cl100kBase),
    // DEPRECATED MODELS
    // text (DEPRECATED)
    ("text-davinci-003", Encoding::P50kBase),
    ("text-davinci-002", Encoding::P50kBase),
    ("text-davinci-001", Encoding::R50kBase),
    ("text-curie-001", Encoding::R50kBase),
    ("text-babbage-001", Encoding::R50kBase),
    ("text-ada-001", Encoding::R50kBase),
    ("davinci", Encoding::R50kBase),
    ("curie", Encoding::R50kBase),
    ("babbage", Encoding::R50kBase),
    ("ada", Encoding::R50kBase),
    // code (DEPRECATED)
    ("code-davinci-002", Encoding::P50kBase),
    ("code-davinci-001", Encoding::P50kBase),
    ("code-cushman-002", Encoding::P50kBase),
    ("code-cushman-001", Encoding::P50kBase),
    ("davinci-codex", Encoding::P50kBase),
    ("cushman-codex", Encoding::P50kBase),
    // edit (DEPRECATED)
    ("text-davinci-edit-001", Encoding::P50kEdit),
    ("code-davinci-edit-001", Encoding::P50kEdit),
    // old embeddings (DEPRECATED)
    ("text-similarity-davinci-001", Encoding::R50kBase),
    ("text-similarity-curie-001", Encoding::R50kBase),
    ("text-similarity-babbage-001", Encoding::R50kBase),
    ("text-similarity-ada-001", Encoding::R50kBase),
    ("text-search-davinci-doc-001", Encoding::R50kBase),
    ("text-search-curie-doc-001", Encoding::R50kBase),
    ("text-search-babbage-doc-001", Encoding::R50kBase),
    ("text-search-ada-doc-001", Encoding::R50kBase),
    ("code-search-babbage-code-001", Encoding::R50kBase),
    ("code-search-ada-code-001", Encoding::R50kBase),
    // open source
    ("gpt2", Encoding::R50kBase),
    ("gpt-2", Encoding::R50kBase),
];

// Checked in order; the first matching prefix wins.
const MODEL_PREFIX_TO_ENCODING: &[(&str, Encoding)] = &[
    ("o1-", Encoding::O200kBase),
    ("o3-", Encoding::O200kBase),
    ("o4-mini-", Encoding::O200kBase),
    ("gpt-4.1-", Encoding::O200kBase),
    ("chatgpt-4o-", Encoding::O200kBase),
    ("gpt-4o-", Encoding::O200kBase),
    ("gpt-4-", Encoding::Cl100kBase),
    ("gpt-3.5-turbo-", Encoding::Cl100kBase),
    ("gpt-35-turbo-", Encoding::Cl100kBase),
    // fine-tuned
    ("ft:gpt-4o", Encoding::O200kBase),
    ("ft:gpt-4", Encoding::Cl100kBase),
    ("ft:gpt-3.5-turbo", Encoding::Cl100kBase),
    ("ft:davinci-002", Encoding::Cl100kBase),
    ("ft:babbage-002", Encoding::Cl100kBase),
];

/// Resolve a model name to its encoding: exact names first, then prefixes.
pub fn encoding_for_model(model: &str) -> Option<Encoding> {
    MODEL_TO_ENCODING
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| {
            MODEL_PREFIX_TO_ENCODING
                .iter()
                .find(|(prefix, _)| model.starts_with(prefix))
        })
        .map(|&(_, encoding)| encoding)
}

// Checked in order; the first matching prefix wins, so longer and more
// specific prefixes come first.
const CONTEXT_SIZES: &[(&str, usize)] = &[
    ("o1-mini", 128_000),
    ("o1-preview", 128_000),
    ("o1", 200_000),
    ("o3", 200_000),
    ("o4-mini", 200_000),
    ("gpt-4.1", 1_047_576),
    ("chatgpt-4o-latest", 128_000),
    ("gpt-4o", 128_000),
    ("ft:gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-0125", 128_000),
    ("gpt-4-1106", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("ft:gpt-4", 8_192),
    ("gpt-3.5-turbo-instruct", 4_096),
    ("gpt-3.5-turbo", 16_385),
    ("gpt-35-turbo", 16_385),
    ("ft:gpt-3.5-turbo", 16_385),
    ("text-davinci-002", 4_097),
    ("text-davinci-003", 4_097),
    ("text-ada-001", 2_049),
    ("text-babbage-001", 2_049),
    ("text-curie-001", 2_049),
    ("code-davinci-002", 8_001),
    ("code-cushman-001", 2_048),
    ("davinci-002", 16_384),
    ("babbage-002", 16_384),
    ("davinci", 2_049),
    ("curie", 2_049),
    ("babbage", 2_049),
    ("ada", 2_049),
    ("text-embedding-ada-002", 8_192),
    ("text-embedding-3-small", 8_191),
    ("text-embedding-3-large", 8_191),
];

/// Context window of a model in tokens, or `None` when it is not known.
pub fn context_size(model: &str) -> Option<usize> {
    CONTEXT_SIZES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|&(_, size)| size)
}

/// Build a [`CoreBPE`] for a model name or an encoding name.
pub fn from_pretrained(name: &str) -> Result<CoreBPE, LoadError> {
    let encoding = encoding_for_model(name)
        .or_else(|| Encoding::from_name(name))
        .ok_or_else(|| LoadError::UnknownModel(name.to_string()))?;
    encoding.load()
}

/// Vocabulary source for [`load_vocabulary`].
#[derive(Debug, Clone, Copy)]
pub enum VocabSource<'a> {
    /// A model or encoding name, resolved to an embedded vocabulary.
    Model(&'a str),
    /// tiktoken-format data supplied by the caller.
    Data {
        data: &'a [u8],
        pattern: &'a str,
        special_tokens: &'a [(&'a str, Rank)],
    },
}

/// Load a vocabulary by model name or from explicit data.
pub fn load_vocabulary(source: VocabSource<'_>) -> Result<CoreBPE, LoadError> {
    match source {
        VocabSource::Model(name) => from_pretrained(name),
        VocabSource::Data {
            data,
            pattern,
            special_tokens,
        } => {
            let special = special_tokens
                .iter()
                .map(|&(literal, rank)| (literal.to_string(), rank))
                .collect();
            CoreBPE::from_tiktoken_bytes(data, pattern, special)
        }
    }
}

static INSTANCES: [OnceLock<CoreBPE>; 5] = [
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
];

/// A process-wide shared instance of `encoding`, built on first use.
///
/// Two threads racing on the first call may both build the encoding; one
/// result is kept and the other dropped.
pub fn singleton(encoding: Encoding) -> Result<&'static CoreBPE, LoadError> {
    let cell = &INSTANCES[encoding as usize];
    if let Some(bpe) = cell.get() {
        return Ok(bpe);
    }
    let bpe = encoding.load()?;
    Ok(cell.get_or_init(|| bpe))
}

/// The shared instance for a model name.
pub fn singleton_for_model(model: &str) -> Result<&'static CoreBPE, LoadError> {
    let encoding =
        encoding_for_model(model).ok_or_else(|| LoadError::UnknownModel(model.to_string()))?;
    singleton(encoding)
}
