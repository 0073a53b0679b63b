//! Loss function(s)

use crate::{nn::NNError, values::Value};

/// Negative log likelihood of the target class, expects log-probabilities as input
/// (e.g. the output of [`LogSoftmax`](crate::nn::LogSoftmax))
pub struct NLLLoss;

impl NLLLoss {
    pub fn call<T>(log_probs: &[T], target: usize) -> Result<Value, NNError>
    where
        T: AsRef<Value>,
    {
        let log_prob = log_probs.get(target).ok_or(NNError::TargetOutOfRange {
            target,
            n_classes: log_probs.len(),
        })?;
        Ok(-log_prob.as_ref())
    }

    /// Mean loss over a batch of outputs and their targets
    pub fn batch<T>(outputs: &[Vec<T>], targets: &[usize]) -> Result<Value, NNError>
    where
        T: AsRef<Value>,
    {
        if outputs.len() != targets.len() {
            return Err(NNError::BatchSizeMismatch {
                outputs: outputs.len(),
                targets: targets.len(),
            });
        }
        let total = outputs
            .iter()
            .zip(targets.iter())
            .map(|(out, &target)| Self::call(out, target))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .sum::<Value>();
        Ok(total / Value::new(outputs.len().max(1) as f32))
    }
}
