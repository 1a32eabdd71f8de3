#![allow(dead_code)]

use anyhow::{bail, Result};
use greedy_lm::grad;
use greedy_lm::model::LanguageModel;
use greedy_lm::tokenizer::Tokenizer;
use ndarray::{Array3, ArrayView2};
use std::cell::RefCell;

/// Scores `(last + 1) % vocab` highest at every position and records every
/// window it is given.
pub struct CountingModel {
    pub vocab: usize,
    pub context: usize,
    pub training: bool,
    pub windows: RefCell<Vec<Vec<Vec<usize>>>>,
    pub grad_seen: RefCell<Vec<bool>>,
}

impl CountingModel {
    pub fn new(vocab: usize, context: usize) -> Self {
        Self {
            vocab,
            context,
            training: true,
            windows: RefCell::new(Vec::new()),
            grad_seen: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.windows.borrow().len()
    }
}

impl LanguageModel for CountingModel {
    fn forward(&self, token_ids: ArrayView2<usize>) -> Result<Array3<f32>> {
        let (batch, seq) = token_ids.dim();
        if seq == 0 {
            bail!("empty sequence");
        }
        if seq > self.context {
            bail!("window of {} exceeds context {}", seq, self.context);
        }
        self.grad_seen.borrow_mut().push(grad::is_grad_enabled());
        self.windows
            .borrow_mut()
            .push(token_ids.rows().into_iter().map(|r| r.to_vec()).collect());

        let mut out = Array3::<f32>::zeros((batch, seq, self.vocab));
        for b in 0..batch {
            for p in 0..seq {
                let next = (token_ids[[b, p]] + 1) % self.vocab;
                out[[b, p, next]] = 1.0;
            }
        }
        Ok(out)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn context_length(&self) -> usize {
        self.context
    }
}

/// One token per byte.
pub struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<usize>> {
        Ok(text.bytes().map(usize::from).collect())
    }

    fn decode(&self, ids: &[usize]) -> Result<String> {
        let bytes: Vec<u8> = ids.iter().map(|&id| id as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> usize {
        256
    }
}

pub fn tiny_config_json(drop_rate: f32) -> String {
    format!(
        r#"{{"vocab_size": 64, "context_length": 8, "emb_dim": 16,
            "n_heads": 4, "n_layers": 2, "drop_rate": {drop_rate}, "seed": 7}}"#
    )
}
