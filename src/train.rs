//! Training loop and held-out evaluation

use crate::{
    dataloader::DataLoader,
    loss::NLLLoss,
    nn::{self, Module, NNError},
    optim::Optim,
};

/// Settings for [`train`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Evaluate on the held-out set every this many optimizer steps
    pub print_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            print_every: 40,
        }
    }
}

/// Mean batch loss and accuracy over a data loader
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// One periodic report emitted while training
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    /// 1-based epoch
    pub epoch: usize,
    /// Optimizer steps taken so far
    pub step: usize,
    /// Mean training loss over the steps since the previous report
    pub train_loss: f32,
    pub test: Evaluation,
}

/// Evaluates `model` on every batch of `loader` without touching gradients.
///
/// Loss and accuracy are averaged per batch. The caller is responsible for putting
/// the model in evaluation mode.
pub fn validation<M: Module + ?Sized>(model: &M, loader: &DataLoader) -> Result<Evaluation, NNError> {
    let mut loss = 0.0;
    let mut accuracy = 0.0;
    let mut n_batches = 0;
    for (inputs, labels) in loader.iter() {
        let outputs = inputs
            .iter()
            .map(|x| model.forward(x))
            .collect::<Result<Vec<_>, _>>()?;
        loss += NLLLoss::batch(&outputs, &labels)?.data();
        let correct = outputs
            .iter()
            .zip(labels.iter())
            .filter(|(out, label)| nn::argmax(out) == Some(**label))
            .count();
        accuracy += correct as f32 / labels.len() as f32;
        n_batches += 1;
    }
    let n_batches = n_batches.max(1) as f32;
    Ok(Evaluation {
        loss: loss / n_batches,
        accuracy: accuracy / n_batches,
    })
}

/// Trains `model` for `config.epochs` passes over `train_loader`.
///
/// Each batch takes one optimizer step on the mean NLL loss of the batch. Every
/// `config.print_every` steps the model is evaluated on `test_loader` in evaluation
/// mode and a report is logged and collected.
pub fn train<M: Module + ?Sized>(
    model: &M,
    train_loader: &DataLoader,
    test_loader: &DataLoader,
    optim: &mut dyn Optim,
    config: &TrainConfig,
) -> Result<Vec<TrainReport>, NNError> {
    let print_every = config.print_every.max(1);
    let mut reports = vec![];
    let mut steps = 0;
    let mut running_loss = 0.0;

    model.set_training(true);
    for epoch in 1..=config.epochs {
        for (inputs, labels) in train_loader.iter() {
            steps += 1;
            optim.zero_grad();

            // once the batch graph is dropped, only the parameters keep their gradients
            let outputs = inputs
                .iter()
                .map(|x| model.forward(x))
                .collect::<Result<Vec<_>, _>>()?;
            let loss = NLLLoss::batch(&outputs, &labels)?;
            loss.backward();
            optim.step();

            running_loss += loss.data();

            if steps % print_every == 0 {
                model.set_training(false);
                let test = validation(model, test_loader)?;
                model.set_training(true);

                let report = TrainReport {
                    epoch,
                    step: steps,
                    train_loss: running_loss / print_every as f32,
                    test,
                };
                log::info!(
                    "Epoch: {}/{}.. Training Loss: {:.3}.. Test Loss: {:.3}.. Test Accuracy: {:.3}",
                    epoch,
                    config.epochs,
                    report.train_loss,
                    test.loss,
                    test.accuracy
                );
                reports.push(report);
                running_loss = 0.0;
            }
        }
        log::debug!("finished epoch {} after {} steps", epoch, steps);
    }
    model.set_training(false);
    Ok(reports)
}
