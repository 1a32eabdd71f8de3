//! Interactive text generation from the terminal.
//!
//! Builds the model described by `--config`, then reads prompts from stdin
//! and prints each prompt extended by greedily generated tokens.

use anyhow::Result;
use clap::Parser;
use greedy_lm::config::ModelConfig;
use greedy_lm::model::GptModel;
use greedy_lm::session::Session;
use greedy_lm::tokenizer::Gpt2Tokenizer;
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the model config json
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("greedy_lm=info,generate=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let cfg = ModelConfig::from_file(&args.config)?;
    info!(
        path = %args.config.display(),
        context_length = cfg.context_length,
        layers = cfg.n_layers,
        "config loaded"
    );

    let tokenizer = Gpt2Tokenizer::from_config(&cfg)?;
    let model = GptModel::new(&cfg)?;
    info!(params = model.num_parameters(), seed = cfg.seed, "model built");

    let session = Session::from_config(model, tokenizer, &cfg)?;
    session.run(io::stdin().lock(), io::stdout().lock())
}
