// ============================================================
// Layer 5 — Embedding Providers
// ============================================================
// The encoder's token-embedding lookup comes in two variants,
// chosen once at model construction:
//
//   Standard  — burn's learned Embedding table
//   Injection — convex blend of an externally supplied embedding
//               table with a trainable table, one learned mixing
//               coefficient per vocabulary id:
//
//                 c = sigmoid(mixing_logit[t])
//                 e[t] = c * external[t] + (1 - c) * trainable[t]
//
// The coefficient lives in (0, 1) for every parameter value —
// bounded by the sigmoid, never clamped.
//
// Gradient ownership: unless `keep_training` is set, the external
// table is stored as a plain constant tensor. It participates in
// the forward pass but is structurally outside the trainable
// parameter set, so the optimizer never sees it and no caller
// has to filter parameters by name.

use burn::{
    module::Param,
    nn::{Embedding, EmbeddingConfig, Initializer},
    prelude::*,
    tensor::activation::sigmoid,
};

/// External table storage. `Frozen` is a module constant;
/// `Trainable` registers with the optimizer like any parameter.
#[derive(Module, Debug)]
pub enum ExternalTable<B: Backend> {
    Frozen(Tensor<B, 2>),
    Trainable(Param<Tensor<B, 2>>),
}

impl<B: Backend> ExternalTable<B> {
    fn table(&self) -> Tensor<B, 2> {
        match self {
            Self::Frozen(t) => t.clone(),
            Self::Trainable(p) => p.val(),
        }
    }
}

#[derive(Config, Debug)]
pub struct InjectionEmbeddingConfig {
    pub vocab_size: usize,
    pub d_model:    usize,

    /// Let gradients flow into the external table as well
    #[config(default = false)]
    pub keep_training: bool,
}

impl InjectionEmbeddingConfig {
    /// `external` must be a [vocab_size, d_model] matrix, already
    /// normalized and vocabulary-aligned (see
    /// infra::embedding_store).
    pub fn init<B: Backend>(
        &self,
        external: Tensor<B, 2>,
        device:   &B::Device,
    ) -> InjectionEmbedding<B> {
        let external = if self.keep_training {
            ExternalTable::Trainable(Param::from_tensor(external))
        } else {
            ExternalTable::Frozen(external)
        };

        let trainable = Initializer::Normal { mean: 0.0, std: 0.02 }
            .init([self.vocab_size, self.d_model], device);

        // Zero logits start every coefficient at 0.5: an even
        // blend until training moves it.
        let mixing_logit = Initializer::Zeros.init([self.vocab_size], device);

        InjectionEmbedding {
            external,
            trainable,
            mixing_logit,
            d_model: self.d_model,
        }
    }
}

#[derive(Module, Debug)]
pub struct InjectionEmbedding<B: Backend> {
    pub external:     ExternalTable<B>,
    pub trainable:    Param<Tensor<B, 2>>,
    pub mixing_logit: Param<Tensor<B, 1>>,
    pub d_model:      usize,
}

impl<B: Backend> InjectionEmbedding<B> {
    /// input_ids: [batch, seq_len] → embeddings: [batch, seq_len, d_model]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let flat = input_ids.reshape([batch_size * seq_len]);

        let external  = self.external.table().select(0, flat.clone());
        let trainable = self.trainable.val().select(0, flat.clone());

        let coeff = sigmoid(self.mixing_logit.val())
            .select(0, flat)
            .reshape([batch_size * seq_len, 1]);
        let inverse = coeff.clone().neg() + 1.0;

        (external * coeff + trainable * inverse).reshape([batch_size, seq_len, self.d_model])
    }

    /// Current mixing coefficient of one vocabulary id.
    pub fn coefficient(&self, token_id: u32) -> f64 {
        let idx = token_id as usize;
        sigmoid(self.mixing_logit.val().slice([idx..idx + 1]))
            .into_scalar()
            .elem::<f64>()
    }
}

/// The model's token-embedding capability.
#[derive(Module, Debug)]
pub enum EmbeddingProvider<B: Backend> {
    Standard(Embedding<B>),
    Injection(InjectionEmbedding<B>),
}

impl<B: Backend> EmbeddingProvider<B> {
    pub fn standard(vocab_size: usize, d_model: usize, device: &B::Device) -> Self {
        Self::Standard(EmbeddingConfig::new(vocab_size, d_model).init(device))
    }

    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        match self {
            Self::Standard(embedding) => embedding.forward(input_ids),
            Self::Injection(injection) => injection.forward(input_ids),
        }
    }

    /// Mixing coefficient of `token_id`, None for the standard
    /// lookup (the diagnostic only exists in injection mode).
    pub fn probe_coefficient(&self, token_id: u32) -> Option<f64> {
        match self {
            Self::Standard(_) => None,
            Self::Injection(injection) => Some(injection.coefficient(token_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    const VOCAB: usize = 4;
    const DIM:   usize = 3;

    fn external_matrix(device: &<B as Backend>::Device) -> Tensor<B, 2> {
        // Row i = [i+1, i+1, i+1]: distinct per token, easy to spot.
        let flat: Vec<f32> = (0..VOCAB)
            .flat_map(|i| std::iter::repeat((i + 1) as f32).take(DIM))
            .collect();
        Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([VOCAB, DIM])
    }

    fn injection(keep_training: bool) -> InjectionEmbedding<B> {
        let device = Default::default();
        InjectionEmbeddingConfig::new(VOCAB, DIM)
            .with_keep_training(keep_training)
            .init(external_matrix(&device), &device)
    }

    fn forward_rows(layer: &InjectionEmbedding<B>) -> Vec<f32> {
        let device = Default::default();
        let ids = Tensor::<B, 1, Int>::from_ints([0, 1, 2, 3].as_slice(), &device)
            .reshape([1, VOCAB]);
        layer
            .forward(ids)
            .reshape([VOCAB * DIM])
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn test_coefficients_start_at_half_and_stay_bounded() {
        let layer = injection(false);
        for id in 0..VOCAB as u32 {
            let c = layer.coefficient(id);
            assert!((c - 0.5).abs() < 1e-6);
        }

        // Extreme logits still land inside [0, 1].
        let device = Default::default();
        let mut layer = layer;
        layer.mixing_logit = Param::from_tensor(Tensor::<B, 1>::from_floats(
            [-1e6, -3.0, 3.0, 1e6].as_slice(),
            &device,
        ));
        for id in 0..VOCAB as u32 {
            let c = layer.coefficient(id);
            assert!((0.0..=1.0).contains(&c), "coefficient {c} out of bounds");
        }
    }

    #[test]
    fn test_saturated_high_logit_passes_external_through() {
        let device = Default::default();
        let mut layer = injection(false);
        // sigmoid(200) rounds to exactly 1.0 in f32.
        layer.mixing_logit =
            Param::from_tensor(Tensor::<B, 1>::from_floats([200.0; VOCAB].as_slice(), &device));

        let rows = forward_rows(&layer);
        let expected: Vec<f32> = (0..VOCAB)
            .flat_map(|i| std::iter::repeat((i + 1) as f32).take(DIM))
            .collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_saturated_low_logit_passes_trainable_through() {
        let device = Default::default();
        let mut layer = injection(false);
        // exp(-200) underflows even the f32 denormal range, so the
        // coefficient is exactly zero.
        layer.mixing_logit =
            Param::from_tensor(Tensor::<B, 1>::from_floats([-200.0; VOCAB].as_slice(), &device));
        let trainable: Vec<f32> = (0..VOCAB * DIM).map(|i| i as f32 * 0.25).collect();
        layer.trainable = Param::from_tensor(
            Tensor::<B, 1>::from_floats(trainable.as_slice(), &device).reshape([VOCAB, DIM]),
        );

        assert_eq!(forward_rows(&layer), trainable);
    }

    #[test]
    fn test_even_blend_at_zero_logit() {
        let device = Default::default();
        let mut layer = injection(false);
        layer.trainable = Param::from_tensor(Tensor::<B, 2>::zeros([VOCAB, DIM], &device));

        // c = 0.5 against a zero trainable table halves the
        // external rows.
        let rows = forward_rows(&layer);
        let expected: Vec<f32> = (0..VOCAB)
            .flat_map(|i| std::iter::repeat((i + 1) as f32 * 0.5).take(DIM))
            .collect();
        for (got, want) in rows.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_external_table_variant_follows_keep_training() {
        assert!(matches!(injection(false).external, ExternalTable::Frozen(_)));
        assert!(matches!(injection(true).external, ExternalTable::Trainable(_)));
    }

    #[test]
    fn test_standard_provider_has_no_probe() {
        let device = Default::default();
        let provider = EmbeddingProvider::<B>::standard(VOCAB, DIM, &device);
        assert!(provider.probe_coefficient(0).is_none());
    }
}
