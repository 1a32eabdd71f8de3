use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::cell::RefCell;
use tracing::debug;

use crate::config::ModelConfig;

/// A causal language model mapping token ids to next-token logits.
pub trait LanguageModel {
    /// Run a forward pass over a (batch, seq) matrix of token ids, returning
    /// (batch, seq, vocab) logits.
    fn forward(&self, token_ids: ArrayView2<usize>) -> Result<Array3<f32>>;

    /// Switch between training and inference behavior.
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    fn vocab_size(&self) -> usize;

    fn context_length(&self) -> usize;

    /// Inference mode: disables dropout.
    fn eval(&mut self) {
        self.set_training(false);
    }

    fn train(&mut self) {
        self.set_training(true);
    }
}

/// Embedding table mapping ids to vectors.
pub struct Embedding {
    weight: Array2<f32>, // num_embeddings x dim
}

impl Embedding {
    pub fn new(num_embeddings: usize, dim: usize, rng: &mut StdRng) -> Self {
        let weight = Array2::from_shape_fn((num_embeddings, dim), |_| StandardNormal.sample(rng));
        Self { weight }
    }

    pub fn forward(&self, ids: &[usize]) -> Result<Array2<f32>> {
        let rows = self.weight.nrows();
        let mut out = Array2::<f32>::zeros((ids.len(), self.weight.ncols()));
        for (i, &id) in ids.iter().enumerate() {
            if id >= rows {
                bail!("token id {} out of range for vocabulary of {}", id, rows);
            }
            out.row_mut(i).assign(&self.weight.row(id));
        }
        Ok(out)
    }

    /// The first `n` rows, used for positional embeddings.
    pub fn leading(&self, n: usize) -> Result<ArrayView2<'_, f32>> {
        if n > self.weight.nrows() {
            bail!(
                "sequence of {} tokens exceeds context length {}",
                n,
                self.weight.nrows()
            );
        }
        Ok(self.weight.slice(s![..n, ..]))
    }

    pub fn num_params(&self) -> usize {
        self.weight.len()
    }
}

/// Fully connected layer.
pub struct Linear {
    weight: Array2<f32>, // out x in
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (in_features as f32).sqrt();
        let weight =
            Array2::from_shape_fn((out_features, in_features), |_| rng.gen_range(-bound..bound));
        let bias = if bias {
            Some(Array1::from_shape_fn(out_features, |_| rng.gen_range(-bound..bound)))
        } else {
            None
        };
        Self { weight, bias }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += &b.view().insert_axis(Axis(0));
        }
        y
    }

    pub fn num_params(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, |b| b.len())
    }
}

/// Layer normalization over the feature axis.
pub struct LayerNorm {
    scale: Array1<f32>,
    shift: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            scale: Array1::ones(dim),
            shift: Array1::zeros(dim),
            eps: 1e-5,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let n = x.ncols() as f32;
        let mean = x.sum_axis(Axis(1)) / n;
        let centered = x - &mean.insert_axis(Axis(1));
        let var = centered.mapv(|v| v * v).sum_axis(Axis(1)) / n;
        let denom = var.mapv(|v| (v + self.eps).sqrt()).insert_axis(Axis(1));
        let norm = centered / &denom;
        norm * &self.scale.view().insert_axis(Axis(0)) + &self.shift.view().insert_axis(Axis(0))
    }

    pub fn num_params(&self) -> usize {
        self.scale.len() + self.shift.len()
    }
}

/// Inverted dropout; a no-op unless an rng is supplied.
pub struct Dropout {
    rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        Self { rate }
    }

    pub fn forward(&self, mut x: Array2<f32>, rng: Option<&mut StdRng>) -> Array2<f32> {
        let rng = match rng {
            Some(rng) if self.rate > 0.0 => rng,
            _ => return x,
        };
        let keep = 1.0 - self.rate;
        x.mapv_inplace(|v| if rng.gen::<f32>() < keep { v / keep } else { 0.0 });
        x
    }
}

fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

/// Causal multi-head self attention.
pub struct Attention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    out_proj: Linear,
    dropout: Dropout,
    n_heads: usize,
    head_dim: usize,
}

impl Attention {
    pub fn new(cfg: &ModelConfig, rng: &mut StdRng) -> Self {
        let dim = cfg.emb_dim;
        Self {
            wq: Linear::new(dim, dim, cfg.qkv_bias, rng),
            wk: Linear::new(dim, dim, cfg.qkv_bias, rng),
            wv: Linear::new(dim, dim, cfg.qkv_bias, rng),
            out_proj: Linear::new(dim, dim, true, rng),
            dropout: Dropout::new(cfg.drop_rate),
            n_heads: cfg.n_heads,
            head_dim: cfg.head_dim(),
        }
    }

    pub fn forward(&self, x: &Array2<f32>, mut rng: Option<&mut StdRng>) -> Array2<f32> {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);
        let seq = x.nrows();
        let scale = (self.head_dim as f32).sqrt();

        let mut out = Array2::<f32>::zeros((seq, self.n_heads * self.head_dim));
        for h in 0..self.n_heads {
            let cols = h * self.head_dim..(h + 1) * self.head_dim;
            let qh = q.slice(s![.., cols.clone()]);
            let kh = k.slice(s![.., cols.clone()]);
            let vh = v.slice(s![.., cols.clone()]);

            let mut scores = qh.dot(&kh.t()) / scale;
            // mask future positions
            for i in 0..seq {
                for j in (i + 1)..seq {
                    scores[[i, j]] = f32::NEG_INFINITY;
                }
            }
            softmax_rows(&mut scores);
            let weights = self.dropout.forward(scores, rng.as_deref_mut());
            out.slice_mut(s![.., cols]).assign(&weights.dot(&vh));
        }
        self.out_proj.forward(&out)
    }

    pub fn num_params(&self) -> usize {
        self.wq.num_params() + self.wk.num_params() + self.wv.num_params() + self.out_proj.num_params()
    }
}

fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

/// Feed-forward network with a 4x expansion and GELU activation.
pub struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    pub fn new(dim: usize, rng: &mut StdRng) -> Self {
        Self {
            up: Linear::new(dim, 4 * dim, true, rng),
            down: Linear::new(4 * dim, dim, true, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = self.up.forward(x).mapv(gelu);
        self.down.forward(&hidden)
    }

    pub fn num_params(&self) -> usize {
        self.up.num_params() + self.down.num_params()
    }
}

/// Pre-norm transformer block.
pub struct Block {
    norm1: LayerNorm,
    attn: Attention,
    norm2: LayerNorm,
    ffn: FeedForward,
    drop_shortcut: Dropout,
}

impl Block {
    pub fn new(cfg: &ModelConfig, rng: &mut StdRng) -> Self {
        Self {
            norm1: LayerNorm::new(cfg.emb_dim),
            attn: Attention::new(cfg, rng),
            norm2: LayerNorm::new(cfg.emb_dim),
            ffn: FeedForward::new(cfg.emb_dim, rng),
            drop_shortcut: Dropout::new(cfg.drop_rate),
        }
    }

    pub fn forward(&self, x: Array2<f32>, mut rng: Option<&mut StdRng>) -> Array2<f32> {
        let h = self.attn.forward(&self.norm1.forward(&x), rng.as_deref_mut());
        let x = x + &self.drop_shortcut.forward(h, rng.as_deref_mut());
        let h = self.ffn.forward(&self.norm2.forward(&x));
        x + &self.drop_shortcut.forward(h, rng)
    }

    pub fn num_params(&self) -> usize {
        self.norm1.num_params() + self.attn.num_params() + self.norm2.num_params() + self.ffn.num_params()
    }
}

/// GPT-style decoder-only transformer.
pub struct GptModel {
    cfg: ModelConfig,
    tok_emb: Embedding,
    pos_emb: Embedding,
    drop_emb: Dropout,
    blocks: Vec<Block>,
    final_norm: LayerNorm,
    out_head: Linear,
    training: bool,
    dropout_rng: RefCell<StdRng>,
}

impl GptModel {
    /// Build a model with parameters drawn from the config's seed. The model
    /// starts in training mode.
    pub fn new(cfg: &ModelConfig) -> Result<Self> {
        cfg.validate()?;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let tok_emb = Embedding::new(cfg.vocab_size, cfg.emb_dim, &mut rng);
        let pos_emb = Embedding::new(cfg.context_length, cfg.emb_dim, &mut rng);
        let blocks = (0..cfg.n_layers).map(|_| Block::new(cfg, &mut rng)).collect();
        let out_head = Linear::new(cfg.emb_dim, cfg.vocab_size, false, &mut rng);
        let dropout_rng = RefCell::new(StdRng::from_rng(&mut rng)?);

        let model = Self {
            cfg: cfg.clone(),
            tok_emb,
            pos_emb,
            drop_emb: Dropout::new(cfg.drop_rate),
            blocks,
            final_norm: LayerNorm::new(cfg.emb_dim),
            out_head,
            training: true,
            dropout_rng,
        };
        debug!(
            layers = cfg.n_layers,
            params = model.num_parameters(),
            "model initialized"
        );
        Ok(model)
    }

    pub fn num_parameters(&self) -> usize {
        self.tok_emb.num_params()
            + self.pos_emb.num_params()
            + self.blocks.iter().map(Block::num_params).sum::<usize>()
            + self.final_norm.num_params()
            + self.out_head.num_params()
    }

    /// Logits for a single sequence: (seq, vocab).
    pub fn forward_sequence(&self, ids: &[usize]) -> Result<Array2<f32>> {
        let mut rng = if self.training {
            Some(self.dropout_rng.borrow_mut())
        } else {
            None
        };
        self.forward_with(ids, rng.as_deref_mut())
    }

    fn forward_with(&self, ids: &[usize], mut rng: Option<&mut StdRng>) -> Result<Array2<f32>> {
        if ids.is_empty() {
            bail!("cannot run the model on an empty token sequence");
        }
        let pos = self.pos_emb.leading(ids.len())?;
        let mut h = self.tok_emb.forward(ids)? + &pos;
        h = self.drop_emb.forward(h, rng.as_deref_mut());
        for block in &self.blocks {
            h = block.forward(h, rng.as_deref_mut());
        }
        let h = self.final_norm.forward(&h);
        Ok(self.out_head.forward(&h))
    }
}

impl LanguageModel for GptModel {
    fn forward(&self, token_ids: ArrayView2<usize>) -> Result<Array3<f32>> {
        let (batch, seq) = token_ids.dim();
        if batch == 0 {
            bail!("cannot run the model on an empty batch");
        }
        let mut out = Array3::<f32>::zeros((batch, seq, self.cfg.vocab_size));
        for (i, row) in token_ids.axis_iter(Axis(0)).enumerate() {
            let logits = self.forward_sequence(&row.to_vec())?;
            out.index_axis_mut(Axis(0), i).assign(&logits);
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
        self.cfg.vocab_size
    }

    fn context_length(&self) -> usize {
        self.cfg.context_length
    }
}
