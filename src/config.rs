//! Model configuration loaded from a JSON file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Configuration for the language model and the generation loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Maximum number of trailing tokens the model attends to.
    pub context_length: usize,
    /// Embedding/hidden dimension.
    pub emb_dim: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Number of transformer blocks.
    pub n_layers: usize,
    /// Dropout probability, only used in training mode.
    #[serde(default)]
    pub drop_rate: f32,
    /// Whether the query/key/value projections carry a bias.
    #[serde(default)]
    pub qkv_bias: bool,
    /// Seed for parameter initialization.
    #[serde(default = "dflt_seed")]
    pub seed: u64,
    /// Tokens appended per interactive turn.
    #[serde(default = "dflt_max_new_tokens")]
    pub max_new_tokens: usize,
    /// Path to a `tokenizer.json`; the hub's `gpt2` tokenizer is used when unset.
    #[serde(default)]
    pub tokenizer: Option<String>,
    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const fn dflt_seed() -> u64 {
    123
}

const fn dflt_max_new_tokens() -> usize {
    6
}

impl ModelConfig {
    /// Read and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Parse and validate a configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.context_length == 0 {
            bail!("context_length must be positive");
        }
        if self.vocab_size == 0 {
            bail!("vocab_size must be positive");
        }
        if self.n_heads == 0 {
            bail!("n_heads must be positive");
        }
        if self.emb_dim == 0 || self.emb_dim % self.n_heads != 0 {
            bail!(
                "emb_dim {} must be a positive multiple of n_heads {}",
                self.emb_dim,
                self.n_heads
            );
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            bail!("drop_rate {} must be in [0, 1)", self.drop_rate);
        }
        Ok(())
    }

    /// Dimension of one attention head.
    pub fn head_dim(&self) -> usize {
        self.emb_dim / self.n_heads
    }
}
