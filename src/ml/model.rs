// ============================================================
// Layer 5 — Transformer Text Classifier
// ============================================================
// A small BERT-style encoder with a classification head:
//
//   token emb + position emb → LayerNorm → dropout
//       │
//       ▼
//   N × EncoderBlock
//       ├── self-attention (query / key / value / output linears)
//       ├── residual + LayerNorm
//       ├── feed-forward (intermediate → GELU → output)
//       └── residual + LayerNorm
//       │
//       ▼
//   masked mean pooling → dropout → classifier linear
//
// Every linear layer goes through `linear_forward`, which hands
// the input activation and the weight to a LayerHook first. That
// single seam is what calibration, fake quantization and
// quantized inference plug into. Linear layers are named:
//
//   encoder.{i}.attention.{query,key,value,output}
//   encoder.{i}.ffn.{intermediate,output}
//   classifier
//
// Reference: Vaswani et al. (2017) Attention Is All You Need
//            Devlin et al. (2019) BERT

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, softmax},
};

use crate::ml::hooks::{FloatHook, LayerHook};

/// Name of the classification head.
pub const CLASSIFIER: &str = "classifier";

/// Additive attention bias for padding positions.
const MASK_BIAS: f64 = -1.0e4;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub vocab_size: usize,
    pub num_labels: usize,
    #[config(default = 128)]
    pub max_seq_len: usize,
    #[config(default = 128)]
    pub d_model: usize,
    #[config(default = 4)]
    pub num_heads: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 512)]
    pub d_ff: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl ClassifierConfig {
    /// Check the shape constraints that would otherwise panic inside forward().
    pub fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_labels >= 2, "need at least 2 labels, got {}", self.num_labels);
        anyhow::ensure!(self.num_heads > 0, "num_heads must be positive");
        anyhow::ensure!(
            self.d_model % self.num_heads == 0,
            "d_model ({}) must be divisible by num_heads ({})",
            self.d_model,
            self.num_heads
        );
        anyhow::ensure!(self.max_seq_len >= 2, "max_seq_len must be at least 2");
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> TextClassifier<B> {
        let layers = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();

        TextClassifier {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device),
            embedding_norm:     LayerNormConfig::new(self.d_model).init(device),
            layers,
            classifier:         LinearConfig::new(self.d_model, self.num_labels).init(device),
            dropout:            DropoutConfig::new(self.dropout).init(),
            num_labels:         self.num_labels,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let linear = |d_in: usize, d_out: usize| LinearConfig::new(d_in, d_out).init(device);
        EncoderBlock {
            attention: SelfAttention {
                query:     linear(self.d_model, self.d_model),
                key:       linear(self.d_model, self.d_model),
                value:     linear(self.d_model, self.d_model),
                output:    linear(self.d_model, self.d_model),
                dropout:   DropoutConfig::new(self.dropout).init(),
                num_heads: self.num_heads,
            },
            attention_norm: LayerNormConfig::new(self.d_model).init(device),
            intermediate:   linear(self.d_model, self.d_ff),
            output:         linear(self.d_ff, self.d_model),
            ffn_norm:       LayerNormConfig::new(self.d_model).init(device),
            dropout:        DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Run a linear layer through `hook`. Burn stores the weight as
/// [d_input, d_output], so this is `x @ W + b`.
pub fn linear_forward<B: Backend, const D: usize, H: LayerHook<B>>(
    linear: &Linear<B>,
    name:   &str,
    x:      Tensor<B, D>,
    hook:   &mut H,
) -> Tensor<B, D> {
    let x      = hook.activation(name, x);
    let weight = hook.weight(name, linear.weight.val());
    let out    = x.matmul(weight.unsqueeze());
    match &linear.bias {
        Some(bias) => out + bias.val().unsqueeze(),
        None => out,
    }
}

#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    query:     Linear<B>,
    key:       Linear<B>,
    value:     Linear<B>,
    output:    Linear<B>,
    dropout:   Dropout,
    num_heads: usize,
}

impl<B: Backend> SelfAttention<B> {
    /// x: [batch, seq, d_model], pad_bias: [batch, seq] (0 or MASK_BIAS)
    fn forward<H: LayerHook<B>>(
        &self,
        x:        Tensor<B, 3>,
        pad_bias: Tensor<B, 2>,
        prefix:   &str,
        hook:     &mut H,
    ) -> Tensor<B, 3> {
        let [batch, seq_len, d_model] = x.dims();
        let heads    = self.num_heads;
        let head_dim = d_model / heads;

        // [batch, seq, d_model] → [batch, heads, seq, head_dim]
        let split = |t: Tensor<B, 3>| t.reshape([batch, seq_len, heads, head_dim]).swap_dims(1, 2);

        let q = split(linear_forward(&self.query, &format!("{prefix}.query"), x.clone(), hook));
        let k = split(linear_forward(&self.key,   &format!("{prefix}.key"),   x.clone(), hook));
        let v = split(linear_forward(&self.value, &format!("{prefix}.value"), x,         hook));

        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar((head_dim as f64).sqrt());
        let bias   = pad_bias
            .reshape([batch, 1, 1, seq_len])
            .expand([batch, heads, seq_len, seq_len]);
        let probs  = self.dropout.forward(softmax(scores + bias, 3));

        let context = probs
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq_len, d_model]);

        linear_forward(&self.output, &format!("{prefix}.output"), context, hook)
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    attention:      SelfAttention<B>,
    attention_norm: LayerNorm<B>,
    intermediate:   Linear<B>,
    output:         Linear<B>,
    ffn_norm:       LayerNorm<B>,
    dropout:        Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    fn forward<H: LayerHook<B>>(
        &self,
        x:        Tensor<B, 3>,
        pad_bias: Tensor<B, 2>,
        index:    usize,
        hook:     &mut H,
    ) -> Tensor<B, 3> {
        let attn = self
            .attention
            .forward(x.clone(), pad_bias, &format!("encoder.{index}.attention"), hook);
        let x = self.attention_norm.forward(x + self.dropout.forward(attn));

        let hidden = gelu(linear_forward(
            &self.intermediate,
            &format!("encoder.{index}.ffn.intermediate"),
            x.clone(),
            hook,
        ));
        let ffn = linear_forward(&self.output, &format!("encoder.{index}.ffn.output"), hidden, hook);
        self.ffn_norm.forward(x + self.dropout.forward(ffn))
    }

    fn linears(&self, index: usize) -> Vec<(String, &Linear<B>)> {
        vec![
            (format!("encoder.{index}.attention.query"),  &self.attention.query),
            (format!("encoder.{index}.attention.key"),    &self.attention.key),
            (format!("encoder.{index}.attention.value"),  &self.attention.value),
            (format!("encoder.{index}.attention.output"), &self.attention.output),
            (format!("encoder.{index}.ffn.intermediate"), &self.intermediate),
            (format!("encoder.{index}.ffn.output"),       &self.output),
        ]
    }

    fn map_linears<F>(mut self, index: usize, f: &mut F) -> Self
    where
        F: FnMut(&str, Linear<B>) -> Linear<B>,
    {
        self.attention.query  = f(&format!("encoder.{index}.attention.query"),  self.attention.query);
        self.attention.key    = f(&format!("encoder.{index}.attention.key"),    self.attention.key);
        self.attention.value  = f(&format!("encoder.{index}.attention.value"),  self.attention.value);
        self.attention.output = f(&format!("encoder.{index}.attention.output"), self.attention.output);
        self.intermediate     = f(&format!("encoder.{index}.ffn.intermediate"), self.intermediate);
        self.output           = f(&format!("encoder.{index}.ffn.output"),       self.output);
        self
    }
}

/// The sizes that decide which token ids and sequence lengths a model
/// accepts, and how many classes it predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierShape {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub num_labels:  usize,
}

#[derive(Module, Debug)]
pub struct TextClassifier<B: Backend> {
    token_embedding:    Embedding<B>,
    position_embedding: Embedding<B>,
    embedding_norm:     LayerNorm<B>,
    layers:             Vec<EncoderBlock<B>>,
    classifier:         Linear<B>,
    dropout:            Dropout,
    num_labels:         usize,
}

impl<B: Backend> TextClassifier<B> {
    /// input_ids, attention_mask: [batch, seq_len] → logits [batch, num_labels]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        self.forward_with(input_ids, attention_mask, &mut FloatHook)
    }

    pub fn forward_with<H: LayerHook<B>>(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        hook:           &mut H,
    ) -> Tensor<B, 2> {
        let [batch, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch, seq_len]);
        let embedded = self.token_embedding.forward(input_ids)
            + self.position_embedding.forward(positions);
        let mut x = self.dropout.forward(self.embedding_norm.forward(embedded));

        let mask     = attention_mask.float(); // 1 = token, 0 = padding
        let pad_bias = mask.clone().neg().add_scalar(1.0).mul_scalar(MASK_BIAS);

        for (index, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x, pad_bias.clone(), index, hook);
        }

        // Masked mean over the real tokens.
        let [_, _, d_model] = x.dims();
        let weights = mask
            .clone()
            .reshape([batch, seq_len, 1])
            .expand([batch, seq_len, d_model]);
        let summed = (x * weights).sum_dim(1).reshape([batch, d_model]);
        let counts = mask.sum_dim(1).clamp_min(1.0).expand([batch, d_model]);
        let pooled = self.dropout.forward(summed / counts);

        linear_forward(&self.classifier, CLASSIFIER, pooled, hook)
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn shape(&self) -> ClassifierShape {
        ClassifierShape {
            vocab_size:  self.token_embedding.weight.val().dims()[0],
            max_seq_len: self.position_embedding.weight.val().dims()[0],
            num_labels:  self.num_labels,
        }
    }

    /// Every linear layer with its name, in forward order.
    pub fn linears(&self) -> Vec<(String, &Linear<B>)> {
        let mut out: Vec<(String, &Linear<B>)> = self
            .layers
            .iter()
            .enumerate()
            .flat_map(|(i, block)| block.linears(i))
            .collect();
        out.push((CLASSIFIER.to_string(), &self.classifier));
        out
    }

    /// Names of the layers quantization and pruning operate on.
    pub fn linear_names(&self) -> Vec<String> {
        self.linears().into_iter().map(|(name, _)| name).collect()
    }

    /// Rebuild the model with every linear layer passed through `f`.
    pub fn map_linears<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(&str, Linear<B>) -> Linear<B>,
    {
        let layers = std::mem::take(&mut self.layers);
        self.layers = layers
            .into_iter()
            .enumerate()
            .map(|(i, block)| block.map_linears(i, &mut f))
            .collect();
        self.classifier = f(CLASSIFIER, self.classifier);
        self
    }
}

/// Anything that maps a batch of token ids to class logits.
pub trait SequenceClassifier<B: Backend> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2>;

    fn num_labels(&self) -> usize;
}

impl<B: Backend> SequenceClassifier<B> for TextClassifier<B> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.forward(input_ids, attention_mask)
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }
}
