//! Interactive greedy text generation for a GPT-style language model.
//!
//! The library holds the model, the tokenizer adapter and the decoding
//! loop; the `generate` binary wires them to the terminal.

pub mod config;
pub mod generate;
pub mod grad;
pub mod model;
pub mod session;
pub mod tokenizer;
