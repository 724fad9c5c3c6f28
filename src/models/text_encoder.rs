//! Text encoder: BERT pooled output projected to the shared embedding width

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use candle_transformers::models::bert::BertModel;

use crate::config::ArchitectureConfig;

/// Maps `(B, L)` token ids and attention mask to `(B, embedding_dim)`
pub struct TextEncoder {
    bert: BertModel,
    pooler: Linear,
    projection: Linear,
}

impl TextEncoder {
    /// `vb` points at `text_encoder`
    pub fn new(config: &ArchitectureConfig, vb: VarBuilder) -> Result<Self> {
        let bert_vb = vb.pp("bert");
        let bert = BertModel::load(bert_vb.clone(), &config.bert)?;
        let pooler = linear(
            config.bert_hidden_size,
            config.bert_hidden_size,
            bert_vb.pp("pooler").pp("dense"),
        )?;
        let projection = linear(config.bert_hidden_size, config.embedding_dim, vb.pp("projection"))?;
        Ok(Self {
            bert,
            pooler,
            projection,
        })
    }

    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self
            .bert
            .forward(input_ids, &token_type_ids, Some(attention_mask))?;

        // Pooled output: tanh(dense(h[CLS]))
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        self.projection.forward(&pooled)
    }
}

impl std::fmt::Debug for TextEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextEncoder")
            .field("pooler", &self.pooler)
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}
