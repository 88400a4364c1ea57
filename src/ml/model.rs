// ============================================================
// Layer 5 — Masked-LM Encoder
// ============================================================
// BERT-shaped encoder over diagnosis-code sequences:
//
//   embedding provider (+ position embeddings, norm, dropout)
//   N encoder blocks (self-attention with padding mask, GELU FFN)
//   MLM head: dense → GELU → norm → vocabulary decoder
//
// The loss is cross-entropy restricted to positions whose label
// is not the ignore sentinel — unmasked positions contribute
// nothing to the gradient.

use burn::{
    nn::{
        attention::{MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::IGNORE_INDEX;
use crate::ml::embedding::{EmbeddingProvider, InjectionEmbeddingConfig};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct IcdBertConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub dropout:     f64,
}

impl IcdBertConfig {
    /// Standard learned token embeddings.
    pub fn init<B: Backend>(&self, device: &B::Device) -> IcdBertModel<B> {
        let provider = EmbeddingProvider::standard(self.vocab_size, self.d_model, device);
        self.init_with_provider(provider, device)
    }

    /// Embedding-injection variant: external is a normalized,
    /// vocabulary-aligned [vocab_size, d_model] matrix.
    pub fn init_with_injection<B: Backend>(
        &self,
        external:      Tensor<B, 2>,
        keep_training: bool,
        device:        &B::Device,
    ) -> IcdBertModel<B> {
        let provider = EmbeddingProvider::Injection(
            InjectionEmbeddingConfig::new(self.vocab_size, self.d_model)
                .with_keep_training(keep_training)
                .init(external, device),
        );
        self.init_with_provider(provider, device)
    }

    fn init_with_provider<B: Backend>(
        &self,
        token_embedding: EmbeddingProvider<B>,
        device:          &B::Device,
    ) -> IcdBertModel<B> {
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let embed_norm = LayerNormConfig::new(self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let mlm_dense   = LinearConfig::new(self.d_model, self.d_model).init(device);
        let mlm_norm    = LayerNormConfig::new(self.d_model).init(device);
        let mlm_decoder = LinearConfig::new(self.d_model, self.vocab_size).init(device);
        let dropout     = DropoutConfig::new(self.dropout).init();
        IcdBertModel {
            token_embedding, position_embedding, embed_norm, layers,
            mlm_dense, mlm_norm, mlm_decoder, dropout,
            max_seq_len: self.max_seq_len,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        use burn::nn::attention::MhaInput;
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_pad(pad_mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct IcdBertModel<B: Backend> {
    pub token_embedding:    EmbeddingProvider<B>,
    pub position_embedding: Embedding<B>,
    pub embed_norm:         LayerNorm<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub mlm_dense:          Linear<B>,
    pub mlm_norm:           LayerNorm<B>,
    pub mlm_decoder:        Linear<B>,
    pub dropout:            Dropout,
    pub max_seq_len:        usize,
}

impl<B: Backend> IcdBertModel<B> {
    /// input_ids, attention_mask: [batch, seq_len]
    /// → vocabulary logits: [batch, seq_len, vocab_size]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = self.dropout.forward(self.embed_norm.forward(tok_emb + pos_emb));

        // true = padding position, hidden from attention
        let pad_mask = attention_mask.equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }

        let x = activation::gelu(self.mlm_dense.forward(x));
        let x = self.mlm_norm.forward(x);
        self.mlm_decoder.forward(x) // [batch, seq_len, vocab_size]
    }

    pub fn forward_loss(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels:         Tensor<B, 2, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 3>)
    where
        B: AutodiffBackend,
    {
        let logits = self.forward(input_ids, attention_mask);
        let loss = masked_cross_entropy(logits.clone(), labels);
        (loss, logits)
    }

    /// The probe diagnostic, present only in injection mode.
    pub fn probe_coefficient(&self, token_id: u32) -> Option<f64> {
        self.token_embedding.probe_coefficient(token_id)
    }
}

/// Mean negative log-likelihood over positions whose label is not
/// the ignore sentinel. A batch with no scored positions yields
/// zero loss rather than dividing by zero.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    labels: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let [batch_size, seq_len, vocab_size] = logits.dims();

    let log_probs = activation::log_softmax(logits, 2);

    let scored = labels.clone().not_equal_elem(IGNORE_INDEX).float();
    // Ignored positions carry -100, which gather cannot index;
    // clamp them to 0 and zero their contribution via the mask.
    let gather_idx: Tensor<B, 3, Int> = labels
        .clamp(0, (vocab_size - 1) as i32)
        .unsqueeze_dim(2);
    let picked = log_probs
        .gather(2, gather_idx)
        .reshape([batch_size, seq_len]);

    let count = scored.clone().sum().clamp_min(1.0);
    (picked * scored).sum().neg() / count
}

#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    fn tiny_config() -> IcdBertConfig {
        IcdBertConfig::new(12, 8, 16, 2, 1, 32, 0.0)
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model: IcdBertModel<B> = tiny_config().init(&device);

        let input_ids = Tensor::<B, 1, Int>::from_ints(
            [2, 5, 6, 3, 0, 0, 0, 0].as_slice(), &device,
        ).reshape([1, 8]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(
            [1, 1, 1, 1, 0, 0, 0, 0].as_slice(), &device,
        ).reshape([1, 8]);

        let logits = model.forward(input_ids, attention_mask);
        assert_eq!(logits.dims(), [1, 8, 12]);
    }

    #[test]
    fn test_masked_loss_scores_only_labeled_positions() {
        let device = Default::default();
        // Two positions, vocab of 3, uniform logits: NLL of any
        // label is ln(3).
        let logits = Tensor::<B, 1>::from_floats([0.0; 6].as_slice(), &device)
            .reshape([1, 2, 3]);
        let labels = Tensor::<B, 1, Int>::from_ints([1, -100].as_slice(), &device)
            .reshape([1, 2]);

        let loss: f64 = masked_cross_entropy(logits, labels).into_scalar().elem();
        assert!((loss - 3.0f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_loss_is_zero_without_labels() {
        let device = Default::default();
        let logits = Tensor::<B, 1>::from_floats([0.5; 6].as_slice(), &device)
            .reshape([1, 2, 3]);
        let labels = Tensor::<B, 1, Int>::from_ints([-100, -100].as_slice(), &device)
            .reshape([1, 2]);

        let loss: f64 = masked_cross_entropy(logits, labels).into_scalar().elem();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_injection_model_exposes_probe() {
        let device = Default::default();
        let cfg = tiny_config();
        let external = Tensor::<B, 2>::zeros([cfg.vocab_size, cfg.d_model], &device);
        let model = cfg.init_with_injection(external, false, &device);
        assert!(model.probe_coefficient(5).is_some());

        let base: IcdBertModel<B> = tiny_config().init(&device);
        assert!(base.probe_coefficient(5).is_none());
    }
}
