//! Text <-> token id conversion.

use anyhow::{anyhow, bail, Result};
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::info;

use crate::config::ModelConfig;

/// Maps text to token ids and back.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<usize>>;

    fn decode(&self, ids: &[usize]) -> Result<String>;

    /// Number of ids `decode` accepts.
    fn vocab_size(&self) -> usize;
}

/// Hub identifier of the GPT-2 byte-pair encoding.
pub const GPT2_HUB_ID: &str = "gpt2";

/// GPT-2 byte-level BPE tokenizer backed by the `tokenizers` crate.
pub struct Gpt2Tokenizer {
    inner: HfTokenizer,
}

impl Gpt2Tokenizer {
    pub fn from_inner(inner: HfTokenizer) -> Self {
        Self { inner }
    }

    /// Load a `tokenizer.json` from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let inner = HfTokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer {}: {}", path.display(), e))?;
        Ok(Self { inner })
    }

    /// Fetch the GPT-2 tokenizer from the Hugging Face hub (cached locally).
    pub fn from_pretrained() -> Result<Self> {
        let inner = HfTokenizer::from_pretrained(GPT2_HUB_ID, None)
            .map_err(|e| anyhow!("failed to fetch tokenizer {}: {}", GPT2_HUB_ID, e))?;
        Ok(Self { inner })
    }

    /// Use the config's `tokenizer` path if set, otherwise the hub.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        match &cfg.tokenizer {
            Some(path) => {
                info!(path = %path, "loading tokenizer from file");
                Self::from_file(path)
            }
            None => {
                info!(id = GPT2_HUB_ID, "loading tokenizer from hub");
                Self::from_pretrained()
            }
        }
    }
}

impl Tokenizer for Gpt2Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<usize>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("encoding failed: {}", e))?;
        Ok(encoding.get_ids().iter().map(|&id| id as usize).collect())
    }

    fn decode(&self, ids: &[usize]) -> Result<String> {
        let vocab_size = self.vocab_size();
        let ids = ids
            .iter()
            .map(|&id| match u32::try_from(id) {
                Ok(id32) if id < vocab_size => Ok(id32),
                _ => bail!("token id {} out of range for tokenizer vocabulary of {}", id, vocab_size),
            })
            .collect::<Result<Vec<u32>>>()?;
        self.inner
            .decode(&ids, false)
            .map_err(|e| anyhow!("decoding failed: {}", e))
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}
