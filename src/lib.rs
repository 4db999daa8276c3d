pub mod backend;
pub mod batches;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod model;
pub mod optim;
pub mod schedule;
pub mod training;

use crate::backend::{ContextDevice, ExeContext};
use crate::batches::TrainBatches;
use crate::cli::AppArgs;
use crate::dataset::Mnist;
use crate::error::Result;
use crate::eval::{Accuracy, measure_accuracy};
use crate::training::LossReport;
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::time::{Duration, Instant};

/// Outcome of a full training and evaluation run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub losses: Vec<LossReport>,
    pub validation: Accuracy,
    pub test: Accuracy,
    pub elapsed: Duration,
}

/// Runs on the backend selected by `--exe_context`.
pub fn run(app_args: &AppArgs) -> Result<RunReport> {
    match app_args.exe_context {
        ExeContext::Numpy => launch::<backend::CpuBackend, backend::CpuAutoBackend>(app_args),
        #[cfg(feature = "wgpu")]
        ExeContext::Gpu => launch::<backend::GpuBackend, backend::GpuAutoBackend>(app_args),
        #[cfg(not(feature = "wgpu"))]
        ctx @ ExeContext::Gpu => Err(error::Error::ContextUnavailable(ctx)),
    }
}

/// Loads data, trains, then measures validation and test accuracy.
///
/// Training runs on `AutoB`; evaluation runs on its inner backend `B`.
pub fn launch<B, AutoB>(app_args: &AppArgs) -> Result<RunReport>
where
    B: Backend + ContextDevice,
    AutoB: AutodiffBackend<InnerBackend = B> + ContextDevice,
{
    let start = Instant::now();

    let training_config = app_args.training_config()?;
    let model_config = app_args.model_config()?;
    app_args.save_configs(&training_config, &model_config)?;

    let mnist = match &app_args.data_dir {
        Some(dir) => Mnist::from_dir(dir)?,
        None => Mnist::download()?,
    };
    let splits = mnist
        .with_validation_len(training_config.validation_len)
        .into_splits();

    // training
    let training_device = AutoB::context_device();
    AutoB::seed(&training_device, training_config.seed);
    let model = app_args.load_or_init_model::<AutoB>(&model_config, &training_device)?;
    let batches = TrainBatches::<AutoB>::new(
        splits.train,
        training_config.batch_size,
        training_config.seed,
        training_device,
    )?;
    let (model, losses) = training::train(model, &training_config, &mut batches.iter());
    app_args.save_model(&model)?;

    // evaluation
    let eval_device = B::context_device();
    let model = model.valid();
    let validation = measure_accuracy(
        &model,
        splits.validation,
        "validation",
        training_config.batch_size,
        &eval_device,
    )?;
    println!("Validation accuracy: {:.2}", validation.percentage());

    let test = measure_accuracy(
        &model,
        splits.test,
        "test",
        training_config.batch_size,
        &eval_device,
    )?;
    println!("Testing accuracy: {:.2}", test.percentage());

    let elapsed = start.elapsed();
    println!(
        "Time taken for training/testing: {:.3} seconds",
        elapsed.as_secs_f64()
    );

    Ok(RunReport {
        losses,
        validation,
        test,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::synthetic_items;
    use crate::dataset::{TEST_IMAGES, TEST_LABELS, TRAIN_IMAGES, TRAIN_LABELS};
    use crate::error::Error;
    use crate::training::TrainingConfig;
    use std::ffi::OsString;

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn gpu_without_feature_is_unavailable() {
        let app_args = AppArgs {
            exe_context: ExeContext::Gpu,
            ..Default::default()
        };
        assert!(matches!(
            run(&app_args).unwrap_err(),
            Error::ContextUnavailable(ExeContext::Gpu)
        ));
    }

    fn write_idx(dir: &std::path::Path, train_len: usize, test_len: usize) {
        use std::io::Write;
        let write = |name: &str, bytes: Vec<u8>| {
            std::fs::File::create(dir.join(name))
                .unwrap()
                .write_all(&bytes)
                .unwrap();
        };
        for (images, labels, len) in [
            (TRAIN_IMAGES, TRAIN_LABELS, train_len),
            (TEST_IMAGES, TEST_LABELS, test_len),
        ] {
            let items = synthetic_items(len);
            let mut image_bytes = vec![];
            image_bytes.extend(2051u32.to_be_bytes());
            image_bytes.extend((len as u32).to_be_bytes());
            image_bytes.extend(28u32.to_be_bytes());
            image_bytes.extend(28u32.to_be_bytes());
            let mut label_bytes = vec![];
            label_bytes.extend(2049u32.to_be_bytes());
            label_bytes.extend((len as u32).to_be_bytes());
            for item in items {
                image_bytes.extend(item.image_bytes);
                label_bytes.push(item.label);
            }
            write(images, image_bytes);
            write(labels, label_bytes);
        }
    }

    #[test]
    fn end_to_end_on_local_files() {
        let data = temp_dir::TempDir::new().unwrap();
        write_idx(data.path(), 40, 13);

        let artifacts = temp_dir::TempDir::new().unwrap();
        let model_config_path = artifacts.path().join("tiny.json");
        crate::model::tests::tiny_config()
            .save(&model_config_path)
            .unwrap();

        let training_config_path = artifacts.path().join("training.json");
        TrainingConfig::new(crate::optim::optimizer_config())
            .with_validation_len(10)
            .save(&training_config_path)
            .unwrap();

        let app_args = AppArgs::from_vec(
            [
                "-i",
                "12",
                "-b",
                "4",
                "-d",
                data.path().to_str().unwrap(),
                "-a",
                artifacts.path().to_str().unwrap(),
                "--model_config",
                model_config_path.to_str().unwrap(),
                "--training_config",
                training_config_path.to_str().unwrap(),
            ]
            .iter()
            .map(OsString::from)
            .collect(),
        )
        .unwrap();

        let report = run(&app_args).unwrap();
        assert_eq!(report.losses.len(), 11);
        // 10 validation items, batches of 4
        assert_eq!(report.validation.evaluated, 8);
        // 13 test items, batches of 4
        assert_eq!(report.test.evaluated, 12);
        assert!((0.0..=100.0).contains(&report.test.percentage()));

        assert!(artifacts.path().join(cli::MODEL_CONFIG_NAME).exists());
        assert!(artifacts.path().join("model.mpk").exists());
    }
}
