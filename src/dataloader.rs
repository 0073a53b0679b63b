//! Data loader

use std::collections::HashSet;

use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

use crate::values::Value;

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error(
        "All input vectors must have the same dimension. Received different sizes: {input_dims:?}"
    )]
    InputDimensionMismatch { input_dims: HashSet<usize> },
    #[error("Labels must have the same length as the data ({label_len} labels, {data_len} inputs)")]
    LabelLengthMismatch { label_len: usize, data_len: usize },
    #[error("Batch size must be greater than zero")]
    ZeroBatchSize,
}

/// A batch of inputs, each turned into graph leaves, and their class labels
pub type Batch = (Vec<Vec<Value>>, Vec<usize>);

/// Data loader, returns batches of inputs and integer labels optionally shuffled
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
pub struct DataLoader {
    data: Vec<Vec<f32>>,
    labels: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
}

impl DataLoader {
    pub fn new(
        data: Vec<Vec<f32>>,
        labels: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        if data.len() != labels.len() {
            return Err(DataLoaderError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: data.len(),
            });
        }
        let input_dims = data.iter().map(|d| d.len()).collect::<HashSet<_>>();
        if input_dims.len() > 1 {
            return Err(DataLoaderError::InputDimensionMismatch { input_dims });
        }
        Ok(Self {
            data,
            labels,
            batch_size,
            shuffle,
        })
    }

    /// Number of samples
    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    /// Number of batches per pass, counting a trailing partial batch
    pub fn len(&self) -> usize {
        self.data.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Width of each input, `None` when there is no data
    pub fn input_dim(&self) -> Option<usize> {
        self.data.first().map(|d| d.len())
    }

    pub fn iter(&self) -> DataLoaderIterator<'_> {
        self.iter_with_rng(&mut rand::rng())
    }

    /// Iterates with shuffling (if enabled) drawn from `rng`
    pub fn iter_with_rng<R: Rng>(&self, rng: &mut R) -> DataLoaderIterator<'_> {
        let mut indices = (0..self.data.len()).collect::<Vec<_>>();
        if self.shuffle {
            indices.shuffle(rng);
        }
        DataLoaderIterator {
            data: &self.data,
            labels: &self.labels,
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of data and labels until the end of the dataset.
/// The last batch is shorter when the batch size does not divide the dataset.
pub struct DataLoaderIterator<'a> {
    data: &'a [Vec<f32>],
    labels: &'a [usize],
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl Iterator for DataLoaderIterator<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_iter >= self.indices.len() {
            return None;
        }
        let end = (self.curr_iter + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.curr_iter..end];
        let batch_data = batch_indices
            .iter()
            .map(|&i| self.data[i].iter().map(|&x| Value::new(x)).collect())
            .collect::<Vec<_>>();
        let batch_labels = batch_indices.iter().map(|&i| self.labels[i]).collect();
        self.curr_iter = end;
        Some((batch_data, batch_labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_floats(batch: &[Vec<Value>]) -> Vec<Vec<f32>> {
        batch
            .iter()
            .map(|row| row.iter().map(|v| v.data()).collect())
            .collect()
    }

    #[test]
    fn test_dataloader() {
        let data = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let labels = vec![0, 1];
        let dataloader = DataLoader::new(data, labels, 2, false).unwrap();
        assert_eq!(dataloader.len(), 1);
        assert_eq!(dataloader.n_samples(), 2);
        assert_eq!(dataloader.input_dim(), Some(3));

        let mut iter = dataloader.iter();
        let (inputs, labels) = iter.next().unwrap();
        assert_eq!(
            as_floats(&inputs),
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]
        );
        assert_eq!(labels, vec![0, 1]);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_dataloader_partial_last_batch() {
        let data = (0..5).map(|i| vec![i as f32]).collect::<Vec<_>>();
        let labels = vec![0, 1, 2, 3, 4];
        let dataloader = DataLoader::new(data, labels, 2, false).unwrap();
        assert_eq!(dataloader.len(), 3);

        let batches = dataloader.iter().map(|(_, l)| l).collect::<Vec<_>>();
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_dataloader_shuffle() {
        use rand::SeedableRng;
        use rand_pcg::Pcg64Mcg;

        let data = (0..10).map(|i| vec![i as f32]).collect::<Vec<_>>();
        let labels = (0..10).collect::<Vec<_>>();
        let dataloader = DataLoader::new(data, labels, 3, true).unwrap();

        let first = dataloader
            .iter_with_rng(&mut Pcg64Mcg::seed_from_u64(42))
            .flat_map(|(inputs, labels)| {
                // inputs and labels stay paired after shuffling
                for (x, l) in inputs.iter().zip(labels.iter()) {
                    assert_eq!(x[0].data(), *l as f32);
                }
                labels
            })
            .collect::<Vec<_>>();
        let second = dataloader
            .iter_with_rng(&mut Pcg64Mcg::seed_from_u64(42))
            .flat_map(|(_, labels)| labels)
            .collect::<Vec<_>>();
        assert_eq!(first, second);

        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_dataloader_errors() {
        let data = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let labels = vec![0, 1, 0];
        let dataloader = DataLoader::new(data, labels, 2, false);
        assert!(matches!(
            dataloader,
            Err(DataLoaderError::LabelLengthMismatch {
                label_len: 3,
                data_len: 2,
            })
        ));

        let data = vec![vec![1.0, 2.0], vec![4.0]];
        assert!(matches!(
            DataLoader::new(data, vec![0, 1], 2, false),
            Err(DataLoaderError::InputDimensionMismatch { .. })
        ));

        assert!(matches!(
            DataLoader::new(vec![], vec![], 0, false),
            Err(DataLoaderError::ZeroBatchSize)
        ));
    }
}
