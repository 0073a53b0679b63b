//! A configurable fully connected classifier
//!
//! The topology is fully determined by [`NetworkConfig`]: one linear layer per
//! consecutive pair of `[input_size] + hidden_layers + [output_size]`, ReLU and
//! dropout after every hidden layer, and log-softmax on the output.

use std::fmt;

use rand::Rng;

use crate::{
    nn::{self, Dropout, Linear, LogSoftmax, Module, NNError, ReLU},
    state_dict::{LoadStateDictError, ParamSlot, StateDict},
    values::Value,
};

const DEFAULT_DROP_P: f32 = 0.5;

/// Architecture hyperparameters of a [`Network`]
///
/// Only the sizes are persisted in checkpoints; `drop_p` is a training setting.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub input_size: usize,
    pub output_size: usize,
    pub hidden_layers: Vec<usize>,
    pub drop_p: f32,
}

impl NetworkConfig {
    pub fn new(input_size: usize, output_size: usize, hidden_layers: Vec<usize>) -> Self {
        Self {
            input_size,
            output_size,
            hidden_layers,
            drop_p: DEFAULT_DROP_P,
        }
    }

    pub fn with_drop_p(mut self, drop_p: f32) -> Self {
        self.drop_p = drop_p;
        self
    }

    pub fn validate(&self) -> Result<(), NNError> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(NNError::InvalidConfig(format!(
                "input and output sizes must be non-zero, got {} and {}",
                self.input_size, self.output_size
            )));
        }
        if let Some(i) = self.hidden_layers.iter().position(|&w| w == 0) {
            return Err(NNError::InvalidConfig(format!(
                "hidden layer {} has zero width",
                i
            )));
        }
        if !(0.0..1.0).contains(&self.drop_p) {
            return Err(NNError::InvalidConfig(format!(
                "dropout probability must be in [0, 1), got {}",
                self.drop_p
            )));
        }
        Ok(())
    }

    /// `(in, out)` of every linear layer, input to output
    pub fn layer_widths(&self) -> Vec<(usize, usize)> {
        let sizes = std::iter::once(self.input_size)
            .chain(self.hidden_layers.iter().copied())
            .chain(std::iter::once(self.output_size))
            .collect::<Vec<_>>();
        sizes.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

/// Fully connected network producing log-probabilities over `output_size` classes
///
/// Parameter slots are named `hidden_layers.{i}.weight`, `hidden_layers.{i}.bias`,
/// `output.weight` and `output.bias`, in that order.
pub struct Network {
    config: NetworkConfig,
    hidden_layers: Vec<Linear>,
    output: Linear,
    relu: ReLU,
    dropout: Dropout,
    log_softmax: LogSoftmax,
    slots: Vec<ParamSlot>,
}

impl Network {
    pub fn new(config: NetworkConfig) -> Result<Self, NNError> {
        Self::with_rng(config, &mut rand::rng())
    }

    pub fn with_rng<R: Rng>(config: NetworkConfig, rng: &mut R) -> Result<Self, NNError> {
        config.validate()?;
        let mut widths = config.layer_widths();
        // validated config always yields at least the output layer
        let (out_in, out_out) = widths.pop().ok_or_else(|| {
            NNError::InvalidConfig("network has no layers".to_string())
        })?;

        let hidden_layers = widths
            .into_iter()
            .map(|(i, o)| Linear::with_rng(i, o, rng))
            .collect::<Result<Vec<_>, _>>()?;
        let output = Linear::with_rng(out_in, out_out, rng)?;

        let slots = hidden_layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                let prefix = format!("hidden_layers.{}", i);
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |s| s.with_prefix(&prefix))
            })
            .chain(
                output
                    .named_parameters()
                    .into_iter()
                    .map(|s| s.with_prefix("output")),
            )
            .collect();

        log::debug!(
            "built network {:?} with {} parameters",
            config.layer_widths(),
            hidden_layers
                .iter()
                .chain(std::iter::once(&output))
                .map(|l| (l.in_features() + 1) * l.out_features())
                .sum::<usize>()
        );

        Ok(Self {
            dropout: Dropout::new(config.drop_p)?,
            config,
            hidden_layers,
            output,
            relu: ReLU::new(),
            log_softmax: LogSoftmax::new(),
            slots,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    pub fn output_size(&self) -> usize {
        self.config.output_size
    }

    /// Widths of the hidden layers as actually constructed
    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.hidden_layers.iter().map(|l| l.out_features()).collect()
    }

    /// `(in, out)` of every constructed linear layer, input to output
    pub fn layer_widths(&self) -> Vec<(usize, usize)> {
        self.hidden_layers
            .iter()
            .chain(std::iter::once(&self.output))
            .map(|l| (l.in_features(), l.out_features()))
            .collect()
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn num_parameters(&self) -> usize {
        self.slots.iter().map(|s| s.numel()).sum()
    }

    /// Snapshot of every parameter keyed by slot name
    pub fn state_dict(&self) -> StateDict {
        StateDict::from_slots(&self.slots)
    }

    /// Overwrites every parameter from `state_dict`.
    ///
    /// The state dict must have exactly one entry per slot with the slot's shape;
    /// otherwise nothing is written and every mismatch is reported.
    pub fn load_state_dict(&mut self, state_dict: &StateDict) -> Result<(), LoadStateDictError> {
        state_dict.load_into(&mut self.slots)
    }

    pub fn is_training(&self) -> bool {
        self.dropout.is_training()
    }

    /// Log-probabilities for a single raw input
    pub fn log_probs(&self, input: &[f32]) -> Result<Vec<f32>, NNError> {
        let inputs = input.iter().map(|&x| Value::new(x)).collect::<Vec<_>>();
        Ok(self.forward(&inputs)?.iter().map(|v| v.data()).collect())
    }

    /// Most likely class for a single raw input
    pub fn predict(&self, input: &[f32]) -> Result<usize, NNError> {
        let inputs = input.iter().map(|&x| Value::new(x)).collect::<Vec<_>>();
        let output = self.forward(&inputs)?;
        nn::argmax(&output)
            .ok_or_else(|| NNError::InvalidConfig("network has no outputs".to_string()))
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("config", &self.config)
            .field("layer_widths", &self.layer_widths())
            .field("training", &self.is_training())
            .finish_non_exhaustive()
    }
}

impl Module for Network {
    fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let mut x = inputs.to_vec();
        for layer in self.hidden_layers.iter() {
            let h = self.relu.forward(&layer.forward(&x)?);
            x = self.dropout.forward(&h);
        }
        let logits = self.output.forward(&x)?;
        Ok(self.log_softmax.forward(&logits))
    }

    fn named_parameters(&self) -> Vec<ParamSlot> {
        self.slots.clone()
    }

    fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use crate::assert_eq_float;

    use super::*;

    #[test]
    fn test_layer_widths_follow_config() {
        let config = NetworkConfig::new(784, 10, vec![512, 256, 128]);
        assert_eq!(
            config.layer_widths(),
            vec![(784, 512), (512, 256), (256, 128), (128, 10)]
        );
        let network = Network::new(NetworkConfig::new(6, 3, vec![5, 4])).unwrap();
        assert_eq!(network.layer_widths(), vec![(6, 5), (5, 4), (4, 3)]);
        assert_eq!(network.hidden_sizes(), vec![5, 4]);
    }

    #[test]
    fn test_no_hidden_layers() {
        let network = Network::new(NetworkConfig::new(3, 2, vec![])).unwrap();
        assert_eq!(network.layer_widths(), vec![(3, 2)]);
        let names = network.slots().iter().map(|s| s.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["output.weight", "output.bias"]);
    }

    #[test]
    fn test_slot_names_and_shapes() {
        let network = Network::new(NetworkConfig::new(4, 2, vec![3, 5])).unwrap();
        let slots = network
            .slots()
            .iter()
            .map(|s| (s.name().to_string(), s.shape().to_vec()))
            .collect::<Vec<_>>();
        assert_eq!(
            slots,
            vec![
                ("hidden_layers.0.weight".to_string(), vec![3, 4]),
                ("hidden_layers.0.bias".to_string(), vec![3]),
                ("hidden_layers.1.weight".to_string(), vec![5, 3]),
                ("hidden_layers.1.bias".to_string(), vec![5]),
                ("output.weight".to_string(), vec![2, 5]),
                ("output.bias".to_string(), vec![2]),
            ]
        );
        assert_eq!(network.num_parameters(), 15 + 20 + 12);
        assert_eq!(network.parameters().len(), network.num_parameters());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            Network::new(NetworkConfig::new(0, 2, vec![3])),
            Err(NNError::InvalidConfig(_))
        ));
        assert!(matches!(
            Network::new(NetworkConfig::new(2, 2, vec![3, 0])),
            Err(NNError::InvalidConfig(_))
        ));
        assert!(matches!(
            Network::new(NetworkConfig::new(2, 2, vec![3]).with_drop_p(1.0)),
            Err(NNError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_forward_outputs_log_probabilities() {
        let network = Network::with_rng(
            NetworkConfig::new(3, 4, vec![8]),
            &mut Pcg64Mcg::seed_from_u64(1),
        )
        .unwrap();
        network.set_training(false);
        let log_probs = network.log_probs(&[0.5, -1.0, 2.0]).unwrap();
        assert_eq!(log_probs.len(), 4);
        assert!(log_probs.iter().all(|&p| p <= 0.0));
        let total: f32 = log_probs.iter().map(|p| p.exp()).sum();
        assert_eq_float!(total, 1.0);

        let predicted = network.predict(&[0.5, -1.0, 2.0]).unwrap();
        let best = log_probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(predicted, best);
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let network = Network::new(NetworkConfig::new(2, 2, vec![16, 16])).unwrap();
        assert!(network.is_training());
        network.set_training(false);
        assert!(!network.is_training());
        let a = network.log_probs(&[1.0, 2.0]).unwrap();
        let b = network.log_probs(&[1.0, 2.0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_input_width() {
        let network = Network::new(NetworkConfig::new(3, 2, vec![4])).unwrap();
        assert_eq!(
            network.predict(&[1.0]).unwrap_err(),
            NNError::InputSizeMismatch {
                expected: 3,
                got: 1
            }
        );
    }

    #[test]
    fn test_seeded_construction_is_reproducible() {
        let config = NetworkConfig::new(3, 2, vec![4]);
        let a = Network::with_rng(config.clone(), &mut Pcg64Mcg::seed_from_u64(3)).unwrap();
        let b = Network::with_rng(config, &mut Pcg64Mcg::seed_from_u64(3)).unwrap();
        assert_eq!(a.state_dict(), b.state_dict());
    }

    #[test]
    fn test_state_dict_round_trip_between_networks() {
        let config = NetworkConfig::new(3, 2, vec![4]);
        let source = Network::new(config.clone()).unwrap();
        let mut target = Network::new(config).unwrap();
        assert_ne!(source.state_dict(), target.state_dict());

        target.load_state_dict(&source.state_dict()).unwrap();
        assert_eq!(source.state_dict(), target.state_dict());

        // the loaded values are the ones the layers compute with
        source.set_training(false);
        target.set_training(false);
        assert_eq!(
            source.log_probs(&[0.1, 0.2, 0.3]).unwrap(),
            target.log_probs(&[0.1, 0.2, 0.3]).unwrap()
        );
    }
}
