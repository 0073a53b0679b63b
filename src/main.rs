//! Command line front end for `fcnet`: trains a classifier on a synthetic dataset,
//! saves it as a checkpoint and reloads checkpoints for inspection or evaluation.
//!
//! # Usage
//! ```sh
//! cargo run -- train --dataset moon --hidden-layers 16,8 --checkpoint moon.pth
//! cargo run -- inspect moon.pth
//! cargo run -- evaluate moon.pth --dataset moon
//! ```
//!
//! Logging is controlled with `RUST_LOG`, e.g. `RUST_LOG=info`.

use std::{error::Error, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use fcnet::{
    checkpoint::{Checkpoint, save_checkpoint},
    dataloader::DataLoader,
    datasets::{Dataset, load_dataset, train_test_split},
    model::{Network, NetworkConfig},
    nn::Module,
    optim::{Adam, Optim, SGD},
    train::{TrainConfig, train, validation},
};

#[derive(Parser)]
#[command(version, about = "Train, save and reload feed-forward classifiers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a network and save it as a checkpoint
    Train(TrainArgs),
    /// Print the architecture stored in a checkpoint
    Inspect {
        checkpoint: PathBuf,
    },
    /// Reload a checkpoint and report its loss and accuracy on a fresh dataset
    Evaluate {
        checkpoint: PathBuf,
        #[clap(flatten)]
        data: DataArgs,
    },
}

#[derive(Args)]
struct DataArgs {
    #[clap(short, long, default_value_t = Dataset::Xor)]
    dataset: Dataset,
    /// Samples per class
    #[clap(short, long, default_value_t = 200)]
    class_size: usize,
    #[clap(short, long, default_value_t = 32)]
    batch_size: usize,
    /// Seed for data generation, shuffling and initialization
    #[clap(long)]
    seed: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OptimizerKind {
    Sgd,
    Adam,
}

#[derive(Args)]
struct TrainArgs {
    #[clap(flatten)]
    data: DataArgs,
    /// Widths of the hidden layers, input to output
    #[clap(long, value_delimiter = ',', default_values_t = vec![16, 8])]
    hidden_layers: Vec<usize>,
    #[clap(long, default_value_t = 0.0)]
    drop_p: f32,
    #[clap(short, long, default_value_t = 20)]
    epochs: usize,
    #[clap(short, long, default_value_t = 0.01)]
    lr: f32,
    #[clap(long, value_enum, default_value_t = OptimizerKind::Adam)]
    optimizer: OptimizerKind,
    /// Only used by SGD
    #[clap(short, long, default_value_t = 0.9)]
    momentum: f32,
    #[clap(short, long, default_value_t = 40)]
    print_every: usize,
    /// Fraction of the samples held out for evaluation
    #[clap(long, default_value_t = 0.2)]
    test_fraction: f32,
    #[clap(long, default_value = "checkpoint.pth")]
    checkpoint: PathBuf,
}

impl DataArgs {
    fn rng(&self) -> Pcg64Mcg {
        match self.seed {
            Some(seed) => Pcg64Mcg::seed_from_u64(seed),
            None => Pcg64Mcg::from_rng(&mut rand::rng()),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<(), Box<dyn Error>> {
    let mut rng = args.data.rng();
    let dataset = args.data.dataset;
    let samples = load_dataset(dataset, args.data.class_size, &mut rng);
    let ((train_x, train_y), (test_x, test_y)) =
        train_test_split(samples, args.test_fraction, &mut rng);
    let train_loader = DataLoader::new(train_x, train_y, args.data.batch_size, true)?;
    let test_loader = DataLoader::new(test_x, test_y, args.data.batch_size, false)?;
    log::info!(
        "dataset {}: {} training and {} test samples",
        dataset,
        train_loader.n_samples(),
        test_loader.n_samples()
    );

    let config = NetworkConfig::new(dataset.input_size(), dataset.n_classes(), args.hidden_layers)
        .with_drop_p(args.drop_p);
    let model = Network::with_rng(config, &mut rng)?;
    log::info!(
        "network {:?} with {} parameters",
        model.layer_widths(),
        model.num_parameters()
    );

    let mut optim: Box<dyn Optim> = match args.optimizer {
        OptimizerKind::Sgd => Box::new(SGD::new(model.parameters(), args.lr, args.momentum)),
        OptimizerKind::Adam => Box::new(Adam::new(model.parameters(), args.lr)),
    };
    let train_config = TrainConfig {
        epochs: args.epochs,
        print_every: args.print_every,
    };
    train(
        &model,
        &train_loader,
        &test_loader,
        optim.as_mut(),
        &train_config,
    )?;

    let evaluation = validation(&model, &test_loader)?;
    log::info!(
        "final test loss {:.3}, accuracy {:.3}",
        evaluation.loss,
        evaluation.accuracy
    );
    save_checkpoint(&model, &args.checkpoint)?;
    println!(
        "saved {} (test accuracy {:.3})",
        args.checkpoint.display(),
        evaluation.accuracy
    );
    Ok(())
}

fn run_inspect(path: PathBuf) -> Result<(), Box<dyn Error>> {
    let checkpoint = Checkpoint::load(&path)?;
    let network = checkpoint.to_network()?;
    println!("checkpoint: {}", path.display());
    println!("input_size: {}", checkpoint.input_size);
    println!("output_size: {}", checkpoint.output_size);
    println!("hidden_layers: {:?}", checkpoint.hidden_layers);
    for (i, (n_in, n_out)) in network.layer_widths().iter().enumerate() {
        println!("layer {}: {} -> {}", i, n_in, n_out);
    }
    for (name, record) in checkpoint.state_dict.iter() {
        println!("{}: {:?}", name, record.shape);
    }
    println!("parameters: {}", network.num_parameters());
    Ok(())
}

fn run_evaluate(path: PathBuf, data: DataArgs) -> Result<(), Box<dyn Error>> {
    let network = Checkpoint::load(&path)?.to_network()?;
    if network.input_size() != data.dataset.input_size()
        || network.output_size() != data.dataset.n_classes()
    {
        return Err(format!(
            "checkpoint expects {} inputs and {} classes, dataset {} has {} and {}",
            network.input_size(),
            network.output_size(),
            data.dataset,
            data.dataset.input_size(),
            data.dataset.n_classes()
        )
        .into());
    }
    let mut rng = data.rng();
    let (inputs, labels) = load_dataset(data.dataset, data.class_size, &mut rng);
    let loader = DataLoader::new(inputs, labels, data.batch_size, false)?;

    network.set_training(false);
    let evaluation = validation(&network, &loader)?;
    println!(
        "{} on {}: loss {:.3}, accuracy {:.3}",
        path.display(),
        data.dataset,
        evaluation.loss,
        evaluation.accuracy
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Inspect { checkpoint } => run_inspect(checkpoint),
        Command::Evaluate { checkpoint, data } => run_evaluate(checkpoint, data),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
