mod common;

use greedy_lm::config::ModelConfig;
use greedy_lm::model::{GptModel, LanguageModel};
use ndarray::array;

fn tiny() -> ModelConfig {
    ModelConfig::from_json(&common::tiny_config_json(0.1)).unwrap()
}

#[test]
fn test_forward_shapes() {
    let cfg = tiny();
    let model = GptModel::new(&cfg).unwrap();
    let logits = model.forward(array![[1_usize, 2, 3], [4, 5, 6]].view()).unwrap();
    assert_eq!(logits.dim(), (2, 3, cfg.vocab_size));
    assert!(logits.iter().all(|v| v.is_finite()));
}

#[test]
fn test_starts_in_training_mode() {
    let mut model = GptModel::new(&tiny()).unwrap();
    assert!(model.is_training());
    model.eval();
    assert!(!model.is_training());
    model.train();
    assert!(model.is_training());
}

#[test]
fn test_same_seed_same_logits() {
    let cfg = tiny();
    let mut a = GptModel::new(&cfg).unwrap();
    let mut b = GptModel::new(&cfg).unwrap();
    a.eval();
    b.eval();
    let tokens = array![[7_usize, 3, 9]];
    assert_eq!(a.forward(tokens.view()).unwrap(), b.forward(tokens.view()).unwrap());
}

#[test]
fn test_different_seed_different_logits() {
    let cfg = tiny();
    let mut other = cfg.clone();
    other.seed += 1;
    let mut a = GptModel::new(&cfg).unwrap();
    let mut b = GptModel::new(&other).unwrap();
    a.eval();
    b.eval();
    let tokens = array![[7_usize, 3, 9]];
    assert_ne!(a.forward(tokens.view()).unwrap(), b.forward(tokens.view()).unwrap());
}

#[test]
fn test_batch_matches_single_rows() {
    let mut model = GptModel::new(&tiny()).unwrap();
    model.eval();
    let batch = model.forward(array![[1_usize, 2], [3, 4]].view()).unwrap();
    let second = model.forward_sequence(&[3, 4]).unwrap();
    assert_eq!(batch.index_axis(ndarray::Axis(0), 1), second);
}

#[test]
fn test_rejects_bad_input() {
    let cfg = tiny();
    let model = GptModel::new(&cfg).unwrap();
    assert!(model.forward_sequence(&[]).is_err());
    assert!(model.forward_sequence(&[cfg.vocab_size]).is_err());
    let too_long: Vec<usize> = (0..cfg.context_length + 1).collect();
    assert!(model.forward_sequence(&too_long).is_err());
    assert!(model
        .forward(ndarray::Array2::<usize>::zeros((0, 3)).view())
        .is_err());
}

#[test]
fn test_rejects_invalid_config() {
    let mut cfg = tiny();
    cfg.n_heads = 3;
    assert!(GptModel::new(&cfg).is_err());
}
