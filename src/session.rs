//! Interactive read-generate-print loop.

use anyhow::{bail, Result};
use std::io::{BufRead, Write};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::generate::generate_tokens;
use crate::model::LanguageModel;
use crate::tokenizer::Tokenizer;

pub const BANNER: &str = "开始对话（输入'exit'退出）";
pub const USER_PROMPT: &str = "用户: ";
pub const MODEL_PREFIX: &str = "模型: ";
/// Compared case-insensitively against the whole line.
pub const EXIT_COMMAND: &str = "exit";

/// A model and tokenizer driven one line at a time.
///
/// Turns are independent: nothing from a previous turn is fed into the next.
pub struct Session<M, T> {
    model: M,
    tokenizer: T,
    context_length: usize,
    max_new_tokens: usize,
}

impl<M: LanguageModel, T: Tokenizer> Session<M, T> {
    /// Create a session; the model is switched to inference mode.
    ///
    /// Fails if the model can emit ids the tokenizer cannot decode, or if
    /// `context_length` exceeds what the model accepts.
    pub fn new(
        mut model: M,
        tokenizer: T,
        context_length: usize,
        max_new_tokens: usize,
    ) -> Result<Self> {
        if model.vocab_size() > tokenizer.vocab_size() {
            bail!(
                "model vocabulary of {} exceeds tokenizer vocabulary of {}",
                model.vocab_size(),
                tokenizer.vocab_size()
            );
        }
        if context_length > model.context_length() {
            bail!(
                "context_length {} exceeds the model's context length {}",
                context_length,
                model.context_length()
            );
        }
        model.eval();
        Ok(Self {
            model,
            tokenizer,
            context_length,
            max_new_tokens,
        })
    }

    pub fn from_config(model: M, tokenizer: T, cfg: &ModelConfig) -> Result<Self> {
        Self::new(model, tokenizer, cfg.context_length, cfg.max_new_tokens)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Encode `text`, extend it greedily and decode the whole sequence.
    pub fn respond(&self, text: &str) -> Result<String> {
        let ids = self.tokenizer.encode(text)?;
        let output = generate_tokens(&self.model, &ids, self.max_new_tokens, self.context_length)?;
        debug!(prompt_tokens = ids.len(), output_tokens = output.len(), "turn complete");
        self.tokenizer.decode(&output)
    }

    /// Run until the exit command or end of input.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<()> {
        writeln!(output, "{}", BANNER)?;
        let mut line = String::new();
        loop {
            write!(output, "{}", USER_PROMPT)?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                info!("end of input");
                break;
            }
            let text = strip_line_ending(&line);
            if is_exit(text) {
                info!("exit requested");
                break;
            }

            let reply = self.respond(text)?;
            writeln!(output, "{}{}\n", MODEL_PREFIX, reply)?;
        }
        output.flush()?;
        Ok(())
    }
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn is_exit(text: &str) -> bool {
    text.to_lowercase() == EXIT_COMMAND
}
