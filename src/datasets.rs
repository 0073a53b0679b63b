//! Synthetic classification datasets
//!
//! Every generator returns `(inputs, labels)` where each input is a 2D point and each
//! label is a class index.

use std::{
    f32::consts::PI,
    fmt::{self, Display},
};

use clap::ValueEnum;
use rand::{Rng, seq::SliceRandom};

/// Inputs and integer class labels
pub type Samples = (Vec<Vec<f32>>, Vec<usize>);

/// Toggles between dataset types
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Line,
    Circle,
    Xor,
    Moon,
    Blobs,
}

impl Dataset {
    /// Width of every input vector
    pub fn input_size(&self) -> usize {
        2
    }

    pub fn n_classes(&self) -> usize {
        match self {
            Dataset::Blobs => BLOB_CENTERS.len(),
            _ => 2,
        }
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Line => write!(f, "line"),
            Dataset::Circle => write!(f, "circle"),
            Dataset::Xor => write!(f, "xor"),
            Dataset::Moon => write!(f, "moon"),
            Dataset::Blobs => write!(f, "blobs"),
        }
    }
}

/// Loads a dataset based on the dataset type
pub fn load_dataset<R: Rng>(dataset: Dataset, class_size: usize, rng: &mut R) -> Samples {
    match dataset {
        Dataset::Line => gen_linear_data(class_size, rng),
        Dataset::Circle => gen_circle_data(class_size, rng),
        Dataset::Xor => gen_xor_data(class_size, rng),
        Dataset::Moon => gen_moon_data(class_size, rng),
        Dataset::Blobs => gen_blob_data(class_size, rng),
    }
}

/// Points in a square labelled by which side of `y = x` they fall on
pub fn gen_linear_data<R: Rng>(class_size: usize, rng: &mut R) -> Samples {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..2 * class_size {
        let x = rng.random_range(-5.0..5.0);
        let y = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        labels.push(if x > y { 0 } else { 1 });
    }

    (data, labels)
}

/// Two noisy concentric rings, the inner ring is class 0
pub fn gen_circle_data<R: Rng>(class_size: usize, rng: &mut R) -> Samples {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for (label, radius) in [(0, 3.0f32), (1, 5.0f32)] {
        for _ in 0..class_size {
            let angle = rng.random_range(0.0..2.0 * PI);
            let r = radius + radius * rng.random_range(-0.25..0.25);
            data.push(vec![r * angle.cos(), r * angle.sin()]);
            labels.push(label);
        }
    }

    (data, labels)
}

/// Class 0 where both coordinates share a sign
pub fn gen_xor_data<R: Rng>(class_size: usize, rng: &mut R) -> Samples {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..2 * class_size {
        let x: f32 = rng.random_range(-5.0..5.0);
        let y: f32 = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        labels.push(if x * y > 0.0 { 0 } else { 1 });
    }

    (data, labels)
}

/// Two interleaving half circles
pub fn gen_moon_data<R: Rng>(class_size: usize, rng: &mut R) -> Samples {
    let mut data = Vec::new();
    let mut labels = Vec::new();
    let radius = 3.0;

    for _ in 0..class_size {
        let theta: f32 = rng.random_range(-PI / 4.0..PI * 5.0 / 4.0);
        let x = radius * theta.cos() + rng.random_range(-0.1..0.1);
        let y = radius * theta.sin() + rng.random_range(-0.1..0.1);
        data.push(vec![x, y]);
        labels.push(0);
    }

    for _ in 0..class_size {
        let theta: f32 = rng.random_range(-PI / 4.0..PI * 5.0 / 4.0);
        let x = radius * theta.cos() + 2.0 + rng.random_range(-0.1..0.1);
        let y = -radius * theta.sin() - 0.2 + rng.random_range(-0.1..0.1);
        data.push(vec![x, y]);
        labels.push(1);
    }

    (data, labels)
}

const BLOB_CENTERS: [(f32, f32); 4] = [(-3.0, -3.0), (-3.0, 3.0), (3.0, -3.0), (3.0, 3.0)];

/// Four gaussian-ish clusters, one class per cluster
pub fn gen_blob_data<R: Rng>(class_size: usize, rng: &mut R) -> Samples {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for (label, (cx, cy)) in BLOB_CENTERS.iter().enumerate() {
        for _ in 0..class_size {
            // sum of uniforms is a cheap bell shape, bounded to +-1.5
            let dx: f32 = (0..3).map(|_| rng.random_range(-0.5..0.5)).sum();
            let dy: f32 = (0..3).map(|_| rng.random_range(-0.5..0.5)).sum();
            data.push(vec![cx + dx, cy + dy]);
            labels.push(label);
        }
    }

    (data, labels)
}

/// Shuffles the samples and splits off `test_fraction` of them as a held-out set.
/// Returns `(train, test)`.
pub fn train_test_split<R: Rng>(
    samples: Samples,
    test_fraction: f32,
    rng: &mut R,
) -> (Samples, Samples) {
    let (data, labels) = samples;
    let mut pairs = data.into_iter().zip(labels).collect::<Vec<_>>();
    pairs.shuffle(rng);

    let n_test = ((pairs.len() as f32) * test_fraction.clamp(0.0, 1.0)).round() as usize;
    let train = pairs.split_off(n_test);
    let test = pairs;
    (train.into_iter().unzip(), test.into_iter().unzip())
}
