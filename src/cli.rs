use crate::backend::ExeContext;
use crate::error::{Error, Result};
use crate::model::{ConvNet, ConvNetConfig};
use crate::optim::optimizer_config;
use crate::training::TrainingConfig;
use burn::prelude::*;
use burn::record::{CompactRecorder, FileRecorder};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const HELP: &str = "\
ConvNet MNIST

Trains a small convolutional network on MNIST, then reports validation and test accuracy.

USAGE:
    convnet-mnist [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -c, --exe_context <CTX>     Execution context: numpy, gpu [default: numpy]
    -i, --num_iter <N>          Number of training iterations [default: 500]
    -b, --batch_size <N>        Batch size for training and evaluation [default: 128]
    -d, --data_dir <PATH>       Directory with the uncompressed MNIST idx files.
                                Defaults to downloading them into ~/.cache/burn-dataset/mnist
    -a, --artifacts_path <PATH>
                                Directory where configurations and the trained model are saved.
                                A model already saved there is loaded and training resumes from it.
        --training_config <PATH>
                                Load the training configuration from this json file
        --model_config <PATH>   Load the model configuration from this json file

Command line values take precedence over values from configuration files.
Set RUST_LOG (e.g. RUST_LOG=debug) to adjust logging.
";

#[derive(Debug, Default, PartialEq)]
pub struct AppArgs {
    pub help: bool,
    pub exe_context: ExeContext,
    pub num_iter: Option<usize>,
    pub batch_size: Option<usize>,
    pub data_dir: Option<PathBuf>,
    pub artifacts_path: Option<PathBuf>,
    pub training_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
}

impl AppArgs {
    pub fn parse() -> Result<Self> {
        Self::from_pico(pico_args::Arguments::from_env())
    }

    pub fn from_vec(args: Vec<OsString>) -> Result<Self> {
        Self::from_pico(pico_args::Arguments::from_vec(args))
    }

    fn from_pico(mut pargs: pico_args::Arguments) -> Result<Self> {
        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            return Ok(AppArgs {
                help: true,
                ..Default::default()
            });
        }

        let args = AppArgs {
            help: false,
            exe_context: pargs
                .opt_value_from_str(["-c", "--exe_context"])?
                .unwrap_or_default(),
            num_iter: pargs.opt_value_from_str(["-i", "--num_iter"])?,
            batch_size: pargs.opt_value_from_str(["-b", "--batch_size"])?,
            data_dir: pargs.opt_value_from_os_str(["-d", "--data_dir"], parse_path)?,
            artifacts_path: pargs.opt_value_from_os_str(["-a", "--artifacts_path"], parse_path)?,
            training_config: pargs.opt_value_from_os_str("--training_config", parse_path)?,
            model_config: pargs.opt_value_from_os_str("--model_config", parse_path)?,
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            return Err(Error::UnusedArguments(remaining));
        }

        Ok(args)
    }

    /// Config file given on the command line, else the artifacts copy, else defaults.
    /// Command line values are applied last.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let loaded = match &self.training_config {
            Some(path) => Some(load_config(path)?),
            None => self.artifact(TRAINING_CONFIG_NAME).map(load_config).transpose()?,
        };
        let mut config = loaded.unwrap_or_else(|| TrainingConfig::new(optimizer_config()));
        if let Some(num_iter) = self.num_iter {
            config.num_iter = num_iter;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if config.batch_size == 0 {
            return Err(Error::ZeroBatchSize);
        }
        Ok(config)
    }

    pub fn model_config(&self) -> Result<ConvNetConfig> {
        let loaded = match &self.model_config {
            Some(path) => Some(load_config(path)?),
            None => self.artifact(MODEL_CONFIG_NAME).map(load_config).transpose()?,
        };
        let config = loaded.unwrap_or_else(ConvNetConfig::new);
        config.validate()?;
        Ok(config)
    }

    /// Writes both configs into the artifacts directory, if one was given.
    pub fn save_configs(
        &self,
        training_config: &TrainingConfig,
        model_config: &ConvNetConfig,
    ) -> Result<()> {
        let Some(artifacts_path) = &self.artifacts_path else {
            return Ok(());
        };
        create_artifact_dir(artifacts_path)?;
        save_config(&artifacts_path.join(TRAINING_CONFIG_NAME), training_config)?;
        save_config(&artifacts_path.join(MODEL_CONFIG_NAME), model_config)
    }

    /// Loads the saved model from the artifacts directory, or initializes a new one.
    pub fn load_or_init_model<B: Backend>(
        &self,
        model_config: &ConvNetConfig,
        device: &B::Device,
    ) -> Result<ConvNet<B>> {
        if let Some(artifacts_path) = &self.artifacts_path {
            if let Some(model) = load_model(artifacts_path, model_config, device)? {
                return Ok(model);
            }
        }
        log::info!("Initializing new model");
        Ok(model_config.init(device))
    }

    pub fn save_model<B: Backend>(&self, model: &ConvNet<B>) -> Result<()> {
        match &self.artifacts_path {
            Some(artifacts_path) => save_model(artifacts_path, model),
            None => Ok(()),
        }
    }

    /// Path of an existing file in the artifacts directory.
    fn artifact(&self, name: &str) -> Option<PathBuf> {
        let path = self.artifacts_path.as_ref()?.join(name);
        path.exists().then_some(path)
    }
}

fn parse_path(s: &std::ffi::OsStr) -> std::result::Result<PathBuf, &'static str> {
    Ok(s.into())
}

pub fn create_artifact_dir(artifact_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(artifact_dir).map_err(|e| Error::io(artifact_dir, e))
}

pub const TRAINING_CONFIG_NAME: &str = "training_config.json";
pub const MODEL_CONFIG_NAME: &str = "model_config.json";

pub fn save_config(path: &Path, config: &impl Config) -> Result<()> {
    log::info!("Saving config into {path:?}");
    config.save(path).map_err(|e| Error::io(path, e))
}

pub fn load_config<C: Config>(path: impl AsRef<Path>) -> Result<C> {
    let path = path.as_ref();
    log::info!("Loading config from {path:?}");
    C::load(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        reason: format!("{e:?}"),
    })
}

pub const MODEL_NAME: &str = "model";

fn model_path<B: Backend>(artifact_dir: &Path) -> (PathBuf, PathBuf) {
    let path = artifact_dir.join(MODEL_NAME);
    let file_ext = <CompactRecorder as FileRecorder<B>>::file_extension();
    let path_ext = path.with_extension(file_ext);
    (path, path_ext)
}

pub fn save_model<B: Backend>(artifact_dir: &Path, model: &ConvNet<B>) -> Result<()> {
    create_artifact_dir(artifact_dir)?;
    let (path, path_ext) = model_path::<B>(artifact_dir);
    log::info!("Saving model to {path_ext:?}");
    model
        .clone()
        .save_file(path, &CompactRecorder::new()) // ext added automatically
        .map_err(|e| Error::Record {
            path: path_ext,
            reason: format!("{e:?}"),
        })
}

pub fn load_model<B: Backend>(
    artifact_dir: &Path,
    model_config: &ConvNetConfig,
    device: &B::Device,
) -> Result<Option<ConvNet<B>>> {
    let (path, path_ext) = model_path::<B>(artifact_dir);
    if !path_ext.exists() {
        return Ok(None);
    }
    log::info!("Loading model from {path_ext:?}");
    let model = model_config
        .init::<B>(device)
        .load_file(path, &CompactRecorder::new(), device) // ext added automatically
        .map_err(|e| Error::Record {
            path: path_ext,
            reason: format!("{e:?}"),
        })?;
    Ok(Some(model))
}
