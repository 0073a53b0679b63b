//! Components to build a neural network

use std::sync::atomic::{self, AtomicBool, AtomicUsize};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::{state_dict::ParamSlot, values::Value};

/// Errors for the neural network
#[derive(Debug, Error, PartialEq)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected}, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("Invalid network configuration: {0}")]
    InvalidConfig(String),
    #[error("Target class {target} is out of range for {n_classes} outputs")]
    TargetOutOfRange { target: usize, n_classes: usize },
    #[error("Batch size mismatch: {outputs} outputs for {targets} targets")]
    BatchSizeMismatch { outputs: usize, targets: usize },
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError>;

    /// Parameters grouped into named slots, in a fixed order
    fn named_parameters(&self) -> Vec<ParamSlot>;

    fn parameters(&self) -> Vec<Value> {
        self.named_parameters()
            .iter()
            .flat_map(|s| s.values().to_vec())
            .collect()
    }

    fn zero_grad(&mut self) {
        for p in self.parameters().iter_mut() {
            p.zero_grad();
        }
    }

    /// Switches between training and evaluation behaviour (e.g. dropout)
    fn set_training(&self, _training: bool) {}
}

/// Fully connected layer computing `W x + b`
///
/// `W` has shape `[out_features, in_features]` and is stored row-major.
pub struct Linear {
    in_features: usize,
    out_features: usize,
    weight: ParamSlot,
    bias: ParamSlot,
    n_output_nans: AtomicUsize,
}

impl Linear {
    /// Creates a layer with He initialised weights and zero biases
    pub fn new(in_features: usize, out_features: usize) -> Result<Self, NNError> {
        Self::with_rng(in_features, out_features, &mut rand::rng())
    }

    pub fn with_rng<R: Rng>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        if in_features == 0 || out_features == 0 {
            return Err(NNError::InvalidConfig(format!(
                "linear layer {}x{} has a zero dimension",
                in_features, out_features
            )));
        }
        // He initialization keeps the variance of the activations roughly constant
        // across ReLU layers
        let std = (2.0 / in_features as f32).sqrt();
        let normal = Normal::new(0.0, std).map_err(|e| NNError::InvalidConfig(e.to_string()))?;
        let weight = (0..in_features * out_features)
            .map(|_| Value::new(normal.sample(rng)))
            .collect();
        let bias = (0..out_features).map(|_| Value::new(0.0)).collect();
        Ok(Self::from_values(in_features, out_features, weight, bias))
    }

    fn from_values(
        in_features: usize,
        out_features: usize,
        weight: Vec<Value>,
        bias: Vec<Value>,
    ) -> Self {
        Self {
            in_features,
            out_features,
            weight: ParamSlot::new("weight", vec![out_features, in_features], weight),
            bias: ParamSlot::new("bias", vec![out_features], bias),
            n_output_nans: AtomicUsize::new(0),
        }
    }

    // Testing utility for a deterministic and simple layer
    #[cfg(test)]
    pub(crate) fn new_ones(in_features: usize, out_features: usize) -> Self {
        Self::from_values(
            in_features,
            out_features,
            (0..in_features * out_features)
                .map(|_| Value::new(1.0))
                .collect(),
            (0..out_features).map(|_| Value::new(1.0)).collect(),
        )
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Number of NaN outputs seen in the last forward pass (used for debugging)
    pub fn n_output_nans(&self) -> usize {
        self.n_output_nans.load(atomic::Ordering::Relaxed)
    }
}

impl Module for Linear {
    fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        if inputs.len() != self.in_features {
            return Err(NNError::InputSizeMismatch {
                expected: self.in_features,
                got: inputs.len(),
            });
        }
        let outputs = self
            .weight
            .values()
            .chunks(self.in_features)
            .zip(self.bias.values())
            .map(|(row, b)| {
                let dot = row
                    .iter()
                    .zip(inputs.iter())
                    .map(|(w, x)| w * x)
                    .sum::<Value>();
                &dot + b
            })
            .collect::<Vec<_>>();

        let n_output_nans = outputs.iter().filter(|v| v.data().is_nan()).count();
        self.n_output_nans
            .store(n_output_nans, atomic::Ordering::Relaxed);
        if n_output_nans > 0 {
            log::debug!(
                "linear {}x{} produced {} NaN outputs",
                self.in_features,
                self.out_features,
                n_output_nans
            );
        }
        Ok(outputs)
    }

    fn named_parameters(&self) -> Vec<ParamSlot> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

/// Applies ReLU to a set of values, works for arbitrary number of inputs
#[derive(Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the element-wise ReLU of the input values
    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let n_dead_neurons = inputs.iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        inputs.iter().map(|v| v.relu()).collect()
    }

    /// Returns the number of inactive units in the last forward pass (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

/// Inverted dropout: during training each value is zeroed with probability `p` and
/// survivors are scaled by `1 / (1 - p)`. Identity in evaluation mode.
pub struct Dropout {
    p: f32,
    training: AtomicBool,
}

impl Dropout {
    pub fn new(p: f32) -> Result<Self, NNError> {
        if !(0.0..1.0).contains(&p) {
            return Err(NNError::InvalidConfig(format!(
                "dropout probability must be in [0, 1), got {}",
                p
            )));
        }
        Ok(Self {
            p,
            training: AtomicBool::new(true),
        })
    }

    pub fn is_training(&self) -> bool {
        self.training.load(atomic::Ordering::Relaxed)
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, atomic::Ordering::Relaxed);
    }

    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        self.forward_with_rng(inputs, &mut rand::rng())
    }

    pub fn forward_with_rng<R: Rng>(&self, inputs: &[Value], rng: &mut R) -> Vec<Value> {
        if !self.is_training() || self.p == 0.0 {
            return inputs.to_vec();
        }
        let keep_scale = 1.0 / (1.0 - self.p);
        inputs
            .iter()
            .map(|v| {
                let scale = if rng.random::<f32>() < self.p {
                    0.0
                } else {
                    keep_scale
                };
                v * &Value::new(scale)
            })
            .collect()
    }
}

/// Log of the softmax, computed as `x_i - max - ln(sum_j exp(x_j - max))`
///
/// The max shift keeps `exp` from overflowing on large logits; it is treated as a
/// constant since the result does not depend on it.
#[derive(Default)]
pub struct LogSoftmax {}

impl LogSoftmax {
    pub fn new() -> Self {
        Self {}
    }

    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        if inputs.is_empty() {
            return vec![];
        }
        let max = inputs
            .iter()
            .map(|v| v.data())
            .fold(f32::NEG_INFINITY, f32::max);
        let shift = Value::new(max);
        let shifted = inputs.iter().map(|v| v - &shift).collect::<Vec<_>>();
        let log_sum_exp = shifted.iter().map(|v| v.exp()).sum::<Value>().ln();
        shifted.iter().map(|v| v - &log_sum_exp).collect()
    }
}

/// Index of the largest value, the predicted class for log-probabilities or logits
pub fn argmax(values: &[Value]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.data().total_cmp(&b.data()))
        .map(|(i, _)| i)
}
