use crate::dataset::{MnistBatch, MnistBatcher, MnistItem};
use crate::error::{Error, Result};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::prelude::*;
use burn_dataset::Dataset;
use std::sync::Arc;

type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

/// Shuffled training batches, cycled over as many passes as needed.
///
/// The loader reshuffles on every pass. The short batch at the end of a pass
/// is skipped, so every yielded batch has exactly `batch_size` items.
pub struct TrainBatches<B: Backend> {
    loader: Dataloader<B>,
    batch_size: usize,
}

impl<B: Backend> TrainBatches<B> {
    pub fn new<D>(dataset: D, batch_size: usize, seed: u64, device: B::Device) -> Result<Self>
    where
        D: Dataset<MnistItem> + 'static,
    {
        if batch_size == 0 {
            return Err(Error::ZeroBatchSize);
        }
        let len = dataset.len();
        if len < batch_size {
            return Err(Error::SplitTooSmall {
                split: "train",
                len,
                batch_size,
            });
        }

        let loader: Dataloader<B> = DataLoaderBuilder::new(MnistBatcher::default())
            .batch_size(batch_size)
            .shuffle(seed)
            .set_device(device)
            .build(dataset);
        Ok(Self { loader, batch_size })
    }

    /// Endless stream of full batches.
    ///
    /// Never ends: the split holds at least one full batch, so each pass yields at least one.
    pub fn iter(&self) -> impl Iterator<Item = MnistBatch<B>> + '_ {
        let batch_size = self.batch_size;
        let loader: &dyn DataLoader<B, MnistBatch<B>> = self.loader.as_ref();
        std::iter::repeat(loader)
            .enumerate()
            .flat_map(move |(pass, loader)| {
                log::debug!("starting pass {pass} over the training split");
                loader
                    .iter()
                    .filter(move |batch| batch.targets.dims() == [batch_size])
            })
    }
}
