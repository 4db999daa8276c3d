use crate::dataset::{MnistBatch, VALIDATION_LEN};
use crate::model::ConvNet;
use crate::schedule::ReportSchedule;
use burn::{
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    /// Optimizer steps, one batch each.
    #[config(default = 500)]
    pub num_iter: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Seeds both the backend (weight init) and the batch shuffling.
    #[config(default = 1024)]
    pub seed: u64,
    /// Trailing training items held out for validation.
    #[config(default = "VALIDATION_LEN")]
    pub validation_len: usize,
    #[config(default = "ReportSchedule::tiered()")]
    pub report_schedule: ReportSchedule,
}

/// Mean loss since the previous report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossReport {
    pub iteration: usize,
    pub avg_loss: f64,
}

impl std::fmt::Display for LossReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iter: {:>5} avg. cost: {:>8.5}",
            self.iteration, self.avg_loss
        )
    }
}

/// Accumulates losses between reports.
#[derive(Clone, Debug, Default)]
pub struct RunningLoss {
    losses: Vec<f64>,
}

impl RunningLoss {
    pub fn push(&mut self, loss: f64) {
        self.losses.push(loss);
    }

    /// Mean of the accumulated losses, clearing them.
    pub fn take_average(&mut self) -> Option<f64> {
        if self.losses.is_empty() {
            return None;
        }
        let avg = self.losses.iter().sum::<f64>() / self.losses.len() as f64;
        self.losses.clear();
        Some(avg)
    }
}

/// Runs `training_config.num_iter` optimizer steps, pulling one batch per step.
///
/// Prints (and returns) the running average loss at the iterations the report schedule selects.
pub fn train<AutoB: AutodiffBackend>(
    mut model: ConvNet<AutoB>,
    training_config: &TrainingConfig,
    batches: &mut impl Iterator<Item = MnistBatch<AutoB>>,
) -> (ConvNet<AutoB>, Vec<LossReport>) {
    let mut optim = training_config
        .optimizer
        .init::<AutoB, ConvNet<AutoB>>();
    let mut running_loss = RunningLoss::default();
    let mut reports = vec![];

    log::info!(
        "Training for {} iterations (batch size {}, lr {})",
        training_config.num_iter,
        training_config.batch_size,
        training_config.lr
    );
    for (i, batch) in batches.take(training_config.num_iter).enumerate() {
        let output = model.forward_classification(batch.images, batch.targets);

        let loss_now: f64 = output.loss.clone().into_scalar().elem();
        log::debug!("iter {i}: loss {loss_now}");
        running_loss.push(loss_now);

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(training_config.lr, model, grads);

        if training_config.report_schedule.is_due(i) {
            if let Some(avg_loss) = running_loss.take_average() {
                let report = LossReport {
                    iteration: i,
                    avg_loss,
                };
                println!("{report}");
                reports.push(report);
            }
        }
    }

    (model, reports)
}
