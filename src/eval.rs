use crate::dataset::{MnistBatch, MnistBatcher, MnistItem};
use crate::error::{Error, Result};
use crate::model::ConvNet;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::prelude::*;
use burn_dataset::Dataset;
use std::sync::Arc;

/// Matches between predicted and labelled classes over the evaluated items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: usize,
    pub evaluated: usize,
}

impl Accuracy {
    /// In `[0, 100]`.
    pub fn percentage(&self) -> f64 {
        if self.evaluated == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.evaluated as f64
    }
}

/// Items covered by whole batches; the remainder is not evaluated.
pub fn evaluated_len(len: usize, batch_size: usize) -> usize {
    len - len % batch_size
}

/// Classifies `dataset` in consecutive batches of `batch_size`, dropping the trailing remainder.
pub fn measure_accuracy<B: Backend, D: Dataset<MnistItem> + 'static>(
    model: &ConvNet<B>,
    dataset: D,
    split: &'static str,
    batch_size: usize,
    device: &B::Device,
) -> Result<Accuracy> {
    if batch_size == 0 {
        return Err(Error::ZeroBatchSize);
    }
    let len = dataset.len();
    let max_val = evaluated_len(len, batch_size);
    if max_val == 0 {
        return Err(Error::SplitTooSmall {
            split,
            len,
            batch_size,
        });
    }

    let loader: Arc<dyn DataLoader<B, MnistBatch<B>>> =
        DataLoaderBuilder::new(MnistBatcher::default())
            .batch_size(batch_size)
            .set_device(device.clone())
            .build(dataset);

    let mut accuracy = Accuracy {
        correct: 0,
        evaluated: 0,
    };
    for batch in loader.iter() {
        let [items] = batch.targets.dims();
        if items < batch_size {
            break;
        }
        accuracy.correct += count_correct(model, batch);
        accuracy.evaluated += items;
    }
    debug_assert_eq!(accuracy.evaluated, max_val);
    log::debug!("{split}: {}/{} correct", accuracy.correct, accuracy.evaluated);

    Ok(accuracy)
}

fn count_correct<B: Backend>(model: &ConvNet<B>, batch: MnistBatch<B>) -> usize {
    let [batch_size] = batch.targets.dims();
    let logits = model.forward(batch.images);
    let predictions = logits.argmax(1).reshape([batch_size]);
    let matches: i64 = predictions
        .equal(batch.targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    matches as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::dataset::MnistDataset;
    use crate::dataset::tests::synthetic_items;
    use crate::model::tests::tiny_config;

    #[test]
    fn evaluated_len_drops_remainder() {
        assert_eq!(evaluated_len(10_000, 128), 9984);
        assert_eq!(evaluated_len(256, 128), 256);
        assert_eq!(evaluated_len(100, 128), 0);
        for len in 0..50 {
            for batch_size in 1..9 {
                let n = evaluated_len(len, batch_size);
                assert_eq!(n % batch_size, 0);
                assert!(len - n < batch_size);
            }
        }
    }

    #[test]
    fn percentage_bounds() {
        let none = Accuracy {
            correct: 0,
            evaluated: 64,
        };
        let all = Accuracy {
            correct: 64,
            evaluated: 64,
        };
        let some = Accuracy {
            correct: 16,
            evaluated: 64,
        };
        assert_eq!(none.percentage(), 0.0);
        assert_eq!(all.percentage(), 100.0);
        assert_eq!(some.percentage(), 25.0);
    }

    #[test]
    fn measures_whole_batches_only() {
        let device = Default::default();
        let model: ConvNet<CpuBackend> = tiny_config().init(&device);
        let dataset = MnistDataset::new(synthetic_items(11));

        let accuracy = measure_accuracy(&model, dataset, "test", 4, &device).unwrap();
        assert_eq!(accuracy.evaluated, 8);
        assert!(accuracy.correct <= accuracy.evaluated);
        assert!((0.0..=100.0).contains(&accuracy.percentage()));
    }

    #[test]
    fn split_shorter_than_batch_is_an_error() {
        let device = Default::default();
        let model: ConvNet<CpuBackend> = tiny_config().init(&device);
        let dataset = MnistDataset::new(synthetic_items(3));

        let err = measure_accuracy(&model, dataset, "validation", 4, &device).unwrap_err();
        assert!(matches!(
            err,
            Error::SplitTooSmall {
                split: "validation",
                len: 3,
                batch_size: 4
            }
        ));
        let dataset = MnistDataset::new(synthetic_items(3));
        let err = measure_accuracy(&model, dataset, "validation", 0, &device).unwrap_err();
        assert!(matches!(err, Error::ZeroBatchSize));
    }
}
