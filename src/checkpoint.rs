//! Saving and restoring trained networks
//!
//! A checkpoint holds the architecture (`input_size`, `output_size`, `hidden_layers`)
//! next to the `state_dict`, so a loader can rebuild a network of the exact same
//! topology before copying the parameters back in.
//!
//! Two encodings are supported, picked from the file extension:
//! - `.json`: pretty printed JSON, handy for inspection. Non-finite parameters cannot
//!   be represented, so saving them as JSON is refused.
//! - anything else: compact binary (bincode), bit exact for every `f32`.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{
    model::{Network, NetworkConfig},
    nn::NNError,
    state_dict::{LoadStateDictError, StateDict},
};

/// Errors raised while saving or loading a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error on checkpoint '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode checkpoint: {0}")]
    Encode(String),
    #[error("Failed to decode checkpoint '{}': {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("Checkpoint is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("Checkpoint describes an invalid architecture: {0}")]
    Architecture(#[from] NNError),
    #[error(transparent)]
    StateDict(#[from] LoadStateDictError),
}

/// On-disk encoding of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    Binary,
}

impl CheckpointFormat {
    /// `.json` files are JSON, everything else is binary
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => CheckpointFormat::Json,
            _ => CheckpointFormat::Binary,
        }
    }
}

/// Everything needed to rebuild a trained [`Network`]
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub input_size: usize,
    pub output_size: usize,
    pub hidden_layers: Vec<usize>,
    pub state_dict: StateDict,
}

/// Serialised form. Fields are optional so that an incomplete record is reported
/// by name instead of as an opaque decoder error.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    #[serde(default)]
    input_size: Option<usize>,
    #[serde(default)]
    output_size: Option<usize>,
    #[serde(default)]
    hidden_layers: Option<Vec<usize>>,
    #[serde(default)]
    state_dict: Option<StateDict>,
}

impl From<Checkpoint> for CheckpointRecord {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            input_size: Some(checkpoint.input_size),
            output_size: Some(checkpoint.output_size),
            hidden_layers: Some(checkpoint.hidden_layers),
            state_dict: Some(checkpoint.state_dict),
        }
    }
}

impl TryFrom<CheckpointRecord> for Checkpoint {
    type Error = CheckpointError;

    fn try_from(record: CheckpointRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            input_size: record
                .input_size
                .ok_or(CheckpointError::MissingField("input_size"))?,
            output_size: record
                .output_size
                .ok_or(CheckpointError::MissingField("output_size"))?,
            hidden_layers: record
                .hidden_layers
                .ok_or(CheckpointError::MissingField("hidden_layers"))?,
            state_dict: record
                .state_dict
                .ok_or(CheckpointError::MissingField("state_dict"))?,
        })
    }
}

impl Checkpoint {
    /// Snapshots the architecture and current parameters of `network`
    pub fn from_network(network: &Network) -> Self {
        Self {
            input_size: network.input_size(),
            output_size: network.output_size(),
            hidden_layers: network.hidden_sizes(),
            state_dict: network.state_dict(),
        }
    }

    /// Architecture described by the checkpoint, with the default dropout
    pub fn config(&self) -> NetworkConfig {
        NetworkConfig::new(self.input_size, self.output_size, self.hidden_layers.clone())
    }

    /// Builds a fresh network from the stored architecture and loads the stored
    /// parameters into it
    pub fn to_network(&self) -> Result<Network, CheckpointError> {
        self.to_network_with(self.config())
    }

    /// Like [`Checkpoint::to_network`], keeping non-architectural settings (e.g.
    /// dropout) from `config`
    pub fn to_network_with(&self, config: NetworkConfig) -> Result<Network, CheckpointError> {
        let config = NetworkConfig {
            input_size: self.input_size,
            output_size: self.output_size,
            hidden_layers: self.hidden_layers.clone(),
            ..config
        };
        let mut network = Network::new(config)?;
        network.load_state_dict(&self.state_dict)?;
        Ok(network)
    }

    /// Writes the checkpoint to `path`, encoding chosen by the extension.
    ///
    /// The data goes to a temporary file in the same directory that then replaces
    /// `path`, so a failed save leaves any previous checkpoint intact.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        self.save_as(path, CheckpointFormat::from_path(path))
    }

    pub fn save_as(
        &self,
        path: impl AsRef<Path>,
        format: CheckpointFormat,
    ) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        if format == CheckpointFormat::Json {
            if let Some((name, value)) = self.first_non_finite() {
                return Err(CheckpointError::Encode(format!(
                    "parameter `{}` holds {}, which JSON cannot represent",
                    name, value
                )));
            }
        }
        let io_err = |source: std::io::Error| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };
        let record = CheckpointRecord::from(self.clone());

        // the target is only replaced once the new checkpoint is fully written
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut writer = BufWriter::new(NamedTempFile::new_in(dir).map_err(io_err)?);
        match format {
            CheckpointFormat::Json => serde_json::to_writer_pretty(&mut writer, &record)
                .map_err(|e| CheckpointError::Encode(e.to_string()))?,
            CheckpointFormat::Binary => {
                bincode::serde::encode_into_std_write(&record, &mut writer, bin_config())
                    .map_err(|e| CheckpointError::Encode(e.to_string()))?;
            }
        }
        let file = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.as_file().sync_all().map_err(io_err)?;
        file.persist(path).map_err(|e| io_err(e.error))?;

        log::info!(
            "Saved checkpoint ({:?}, {} tensors) to '{}'",
            format,
            self.state_dict.len(),
            path.display()
        );
        Ok(())
    }

    fn first_non_finite(&self) -> Option<(&str, f32)> {
        self.state_dict.iter().find_map(|(name, record)| {
            record
                .data
                .iter()
                .find(|x| !x.is_finite())
                .map(|&x| (name, x))
        })
    }

    /// Reads a checkpoint from `path`, encoding chosen by the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        Self::load_as(path, CheckpointFormat::from_path(path))
    }

    pub fn load_as(
        path: impl AsRef<Path>,
        format: CheckpointFormat,
    ) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let decode_err = |reason: String| CheckpointError::Decode {
            path: path.to_path_buf(),
            reason,
        };

        let record: CheckpointRecord = match format {
            CheckpointFormat::Json => {
                serde_json::from_reader(&mut reader).map_err(|e| decode_err(e.to_string()))?
            }
            CheckpointFormat::Binary => {
                bincode::serde::decode_from_std_read(&mut reader, bin_config())
                    .map_err(|e| decode_err(e.to_string()))?
            }
        };
        let checkpoint = Checkpoint::try_from(record)?;

        log::info!(
            "Loaded checkpoint '{}': {} -> {:?} -> {}",
            path.display(),
            checkpoint.input_size,
            checkpoint.hidden_layers,
            checkpoint.output_size
        );
        Ok(checkpoint)
    }
}

fn bin_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Saves `network` as a checkpoint at `path`
pub fn save_checkpoint(network: &Network, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
    Checkpoint::from_network(network).save(path)
}

/// Rebuilds the network stored at `path`
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Network, CheckpointError> {
    Checkpoint::load(path)?.to_network()
}
