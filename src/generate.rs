//! Greedy autoregressive decoding.

use anyhow::{bail, Result};
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};
use tracing::{debug, trace};

use crate::grad;
use crate::model::LanguageModel;

/// Exponential normalization of a score vector.
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Index of the largest value; the first one wins on ties. NaN counts as
/// larger than any number, so the first NaN is returned if there is one.
pub fn argmax(values: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            return Some(i);
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Extend every row of `token_ids` by `max_new_tokens` greedily chosen tokens.
///
/// Each step feeds at most the last `context_length` tokens of a row to the
/// model, normalizes the scores of the final position and appends the most
/// probable id. The full sequences are returned, shape
/// `(batch, n + max_new_tokens)`.
pub fn generate_text<M: LanguageModel + ?Sized>(
    model: &M,
    mut token_ids: Array2<usize>,
    max_new_tokens: usize,
    context_length: usize,
) -> Result<Array2<usize>> {
    if context_length == 0 {
        bail!("context_length must be positive");
    }
    let _guard = grad::no_grad();

    for step in 0..max_new_tokens {
        let len = token_ids.ncols();
        let start = len.saturating_sub(context_length);
        let window = token_ids.slice(s![.., start..]);

        let logits = model.forward(window)?;
        let positions = logits.dim().1;
        if positions == 0 {
            bail!("model returned no output positions");
        }
        let last = logits.index_axis(Axis(1), positions - 1);

        let mut next = Array2::<usize>::zeros((token_ids.nrows(), 1));
        for (row, scores) in last.axis_iter(Axis(0)).enumerate() {
            let probabilities = softmax(scores);
            next[[row, 0]] = match argmax(probabilities.view()) {
                Some(id) => id,
                None => bail!("model returned an empty score vector"),
            };
        }
        trace!(step, window = len - start, next = ?next.column(0), "decoded token");

        token_ids = concatenate(Axis(1), &[token_ids.view(), next.view()])?;
    }

    debug!(
        rows = token_ids.nrows(),
        new_tokens = max_new_tokens,
        total = token_ids.ncols(),
        "generation finished"
    );
    Ok(token_ids)
}

/// Single-sequence form of [`generate_text`].
pub fn generate_tokens<M: LanguageModel + ?Sized>(
    model: &M,
    seed: &[usize],
    max_new_tokens: usize,
    context_length: usize,
) -> Result<Vec<usize>> {
    let batch = Array2::from_shape_vec((1, seed.len()), seed.to_vec())?;
    let out = generate_text(model, batch, max_new_tokens, context_length)?;
    Ok(out.row(0).to_vec())
}
