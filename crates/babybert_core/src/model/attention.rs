//! Bidirectional multi-head self-attention with a key padding mask

use candle_core::{Result, Tensor, D};
use candle_nn::{linear, ops::softmax_last_dim, Linear, Module, VarBuilder};

/// Added to attention scores of padded keys.
const MASKED_SCORE: f64 = -1e4;

pub struct SelfAttention {
    pub q_proj: Linear,
    pub k_proj: Linear,
    pub v_proj: Linear,
    pub o_proj: Linear,
    pub n_heads: usize,
    pub head_dim: usize,
    pub scaling: f64,
}

impl SelfAttention {
    pub fn load(hidden_dim: usize, n_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = hidden_dim / n_heads;
        let scaling = 1.0 / (head_dim as f64).sqrt();

        let q_proj = linear(hidden_dim, hidden_dim, vb.pp("query"))?;
        let k_proj = linear(hidden_dim, hidden_dim, vb.pp("key"))?;
        let v_proj = linear(hidden_dim, hidden_dim, vb.pp("value"))?;
        let o_proj = linear(hidden_dim, hidden_dim, vb.pp("output"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_heads,
            head_dim,
            scaling,
        })
    }

    /// [batch, seq, hidden] -> [batch, heads, seq, head_dim]
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, s, _) = x.dims3()?;
        x.reshape((b, s, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// `key_mask`: [batch, seq] with 1.0 for real tokens, 0.0 for padding.
    pub fn forward(&self, x: &Tensor, key_mask: &Tensor) -> Result<Tensor> {
        let (b, s, hidden) = x.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(x)?)?;
        let k = self.split_heads(&self.k_proj.forward(x)?)?;
        let v = self.split_heads(&self.v_proj.forward(x)?)?;

        let scores = (q.matmul(&k.t()?)? * self.scaling)?;

        // [batch, seq] -> [batch, 1, 1, seq]
        let bias = ((key_mask.ones_like()? - key_mask)? * MASKED_SCORE)?
            .unsqueeze(1)?
            .unsqueeze(1)?;
        let scores = scores.broadcast_add(&bias)?;

        let probs = softmax_last_dim(&scores)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, s, hidden))?;

        self.o_proj.forward(&context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_padding_does_not_leak_into_real_tokens() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = SelfAttention::load(8, 2, vb)?;

        let x = Tensor::randn(0f32, 1.0, (1, 3, 8), &device)?;
        let mask = Tensor::new(&[[1f32, 1.0, 0.0]], &device)?;
        let full = attn.forward(&x, &mask)?;

        // Changing the padded position must not change the real positions.
        let noise = Tensor::randn(0f32, 1.0, (1, 1, 8), &device)?;
        let x2 = Tensor::cat(&[&x.narrow(1, 0, 2)?, &noise], 1)?;
        let changed = attn.forward(&x2, &mask)?;

        let diff = (full.narrow(1, 0, 2)? - changed.narrow(1, 0, 2)?)?
            .abs()?
            .max_keepdim(D::Minus1)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(diff.iter().all(|d| *d < 1e-4), "{diff:?}");
        Ok(())
    }
}
