//! Causal language-modeling loss.

use candle_core::{DType, Result, Tensor, D};

/// Mean next-token cross-entropy over positions whose label is not ignored.
///
/// Position `t` of `logits` [batch, seq_len, vocab] predicts label `t + 1`
/// of `labels` [batch, seq_len]; negative labels (the ignore index) are
/// excluded. Returns an f32 scalar, 0 when nothing is supervised.
pub fn causal_lm_loss(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (batch, seq_len, vocab) = logits.dims3()?;
    if seq_len < 2 {
        return Tensor::new(0f32, logits.device());
    }
    let n = batch * (seq_len - 1);

    let logits = logits
        .narrow(1, 0, seq_len - 1)?
        .to_dtype(DType::F32)?
        .reshape((n, vocab))?;
    let labels = labels
        .narrow(1, 1, seq_len - 1)?
        .to_dtype(DType::I64)?
        .reshape(n)?;

    let valid = labels.ge(0i64)?.to_dtype(DType::F32)?;
    let targets = labels.maximum(0i64)?.to_dtype(DType::U32)?.unsqueeze(1)?;

    let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
    let nll = log_probs.gather(&targets, 1)?.squeeze(1)?.neg()?;

    let count = valid.sum_all()?.to_scalar::<f32>()?;
    (nll * valid)?.sum_all()? / f64::from(count.max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_uniform_logits_give_log_vocab() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 4, 8), DType::F32, &device).unwrap();
        let labels = Tensor::new(&[[-100i64, -100, 3, 5]], &device).unwrap();

        let loss = causal_lm_loss(&logits, &labels).unwrap().to_scalar::<f32>().unwrap();
        assert!((loss - 8f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_ignored_positions_do_not_count() {
        let device = Device::Cpu;
        // Position 0 strongly predicts token 1; position 1 is garbage but ignored.
        let logits = Tensor::new(
            &[[[0f32, 20.0, 0.0], [20.0, 0.0, 0.0], [0.0, 0.0, 0.0]]],
            &device,
        )
        .unwrap();
        let labels = Tensor::new(&[[-100i64, 1, -100]], &device).unwrap();

        let loss = causal_lm_loss(&logits, &labels).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss < 1e-6);
    }

    #[test]
    fn test_all_ignored_is_zero() {
        let device = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (2, 3, 5), &device).unwrap();
        let labels = Tensor::new(&[[-100i64; 3], [-100; 3]], &device).unwrap();

        let loss = causal_lm_loss(&logits, &labels).unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(loss, 0.0);
    }
}
