//! Convolutional classifier for 28x28 single-channel digits.
//!
//! Two valid (unpadded) convolutions with ReLU, a max-pool, then two dense layers.
//! With the default config a batch flows as:
//! `[b, 784] -> [b, 1, 28, 28] -> [b, 32, 24, 24] -> [b, 64, 20, 20] -> [b, 64, 10, 10] -> [b, 6400] -> [b, 512] -> [b, 10]`.

use crate::dataset::{HEIGHT, NUM_CLASSES, WIDTH};
use crate::error;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::train::ClassificationOutput;

#[derive(Config, Debug)]
pub struct ConvNetConfig {
    /// Images are square, `image_size` pixels per side.
    #[config(default = 28)]
    pub image_size: usize,
    #[config(default = 1)]
    pub in_channels: usize,
    #[config(default = 32)]
    pub conv1_channels: usize,
    #[config(default = 64)]
    pub conv2_channels: usize,
    /// Both convolutions use square `kernel_size` kernels.
    #[config(default = 5)]
    pub kernel_size: usize,
    /// Pooling window and stride.
    #[config(default = 2)]
    pub pool_size: usize,
    #[config(default = 512)]
    pub hidden_size: usize,
    #[config(default = 10)]
    pub num_classes: usize,
    /// Standard deviation of the zero-mean normal used for every weight and bias.
    #[config(default = 0.1)]
    pub init_std: f64,
}

impl ConvNetConfig {
    /// Checks that the layers fit together and match the MNIST batches they will be fed.
    pub fn validate(&self) -> error::Result<()> {
        let invalid = |reason: String| Err(error::Error::InvalidConfig(reason));
        if (self.image_size, self.image_size) != (HEIGHT, WIDTH) {
            return invalid(format!(
                "image_size is {}, MNIST images are {HEIGHT}x{WIDTH}",
                self.image_size
            ));
        }
        if self.in_channels != 1 {
            return invalid(format!(
                "in_channels is {}, MNIST images have one channel",
                self.in_channels
            ));
        }
        if self.num_classes != NUM_CLASSES {
            return invalid(format!(
                "num_classes is {}, MNIST has {NUM_CLASSES} classes",
                self.num_classes
            ));
        }
        for (name, value) in [
            ("conv1_channels", self.conv1_channels),
            ("conv2_channels", self.conv2_channels),
            ("kernel_size", self.kernel_size),
            ("pool_size", self.pool_size),
            ("hidden_size", self.hidden_size),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        let shrink = 2 * (self.kernel_size - 1);
        if self.image_size < shrink + self.pool_size {
            return invalid(format!(
                "kernel_size {} and pool_size {} leave nothing of a {} pixel image",
                self.kernel_size, self.pool_size, self.image_size
            ));
        }
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return invalid(format!("init_std is {}", self.init_std));
        }
        Ok(())
    }

    /// Side length after both convolutions and the pooling.
    ///
    /// Assumes a config accepted by [`validate`](Self::validate).
    pub fn pooled_size(&self) -> usize {
        let conv_out = self.image_size - 2 * (self.kernel_size - 1);
        conv_out / self.pool_size
    }

    /// Features entering the first dense layer.
    pub fn flattened_size(&self) -> usize {
        let pooled = self.pooled_size();
        self.conv2_channels * pooled * pooled
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        let initializer = Initializer::Normal {
            mean: 0.0,
            std: self.init_std,
        };
        let kernel = [self.kernel_size, self.kernel_size];
        let pool = [self.pool_size, self.pool_size];

        ConvNet {
            conv1: Conv2dConfig::new([self.in_channels, self.conv1_channels], kernel)
                .with_bias(true)
                .with_initializer(initializer.clone())
                .init(device),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], kernel)
                .with_bias(true)
                .with_initializer(initializer.clone())
                .init(device),
            pool: MaxPool2dConfig::new(pool).with_strides(pool).init(),
            dense1: LinearConfig::new(self.flattened_size(), self.hidden_size)
                .with_bias(true)
                .with_initializer(initializer.clone())
                .init(device),
            dense2: LinearConfig::new(self.hidden_size, self.num_classes)
                .with_bias(true)
                .with_initializer(initializer)
                .init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub pool: MaxPool2d,
    pub dense1: Linear<B>,
    pub dense2: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> ConvNet<B> {
    /// # Shapes
    ///   - Input [batch, in_channels * image_size * image_size]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch_size, flat_size] = images.dims();
        let [_, in_channels, _, _] = self.conv1.weight.dims();
        let side = ((flat_size / in_channels) as f64).sqrt() as usize;
        debug_assert_eq!(in_channels * side * side, flat_size);

        let x = images.reshape([batch_size, in_channels, side, side]);

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let [_, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.dense1.forward(x);
        let x = self.activation.forward(x);
        let logits = self.dense2.forward(x);

        let [_, num_classes] = self.dense2.weight.dims();
        debug_assert_eq!([batch_size, num_classes], logits.dims());
        logits
    }

    /// Logits plus the softmax cross-entropy against `targets`, averaged over the batch.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let [batch_size, _] = images.dims();
        assert_eq!([batch_size], targets.dims());

        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::error::Error;

    pub(crate) fn tiny_config() -> ConvNetConfig {
        ConvNetConfig::new()
            .with_conv1_channels(2)
            .with_conv2_channels(3)
            .with_hidden_size(8)
    }

    #[test]
    fn default_config_flattens_to_6400() {
        let config = ConvNetConfig::new();
        assert_eq!(config.pooled_size(), 10);
        assert_eq!(config.flattened_size(), 6400);
        config.validate().unwrap();
        tiny_config().validate().unwrap();
    }

    #[test]
    fn rejects_configs_that_do_not_fit_mnist() {
        let rejected = [
            ConvNetConfig::new().with_pool_size(0),
            ConvNetConfig::new().with_kernel_size(0),
            ConvNetConfig::new().with_kernel_size(15),
            ConvNetConfig::new().with_kernel_size(14).with_pool_size(3),
            ConvNetConfig::new().with_image_size(32),
            ConvNetConfig::new().with_in_channels(3),
            ConvNetConfig::new().with_num_classes(5),
            ConvNetConfig::new().with_hidden_size(0),
            ConvNetConfig::new().with_init_std(f64::NAN),
        ];
        for config in rejected {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{config:?}");
        }

        // the largest kernel still leaving one pooled pixel
        let config = ConvNetConfig::new().with_kernel_size(14).with_pool_size(2);
        config.validate().unwrap();
        assert_eq!(config.pooled_size(), 1);
    }

    #[test]
    fn default_parameter_count() {
        let device = Default::default();
        let model: ConvNet<CpuBackend> = ConvNetConfig::new().init(&device);
        let expected = (32 * 25 + 32) + (64 * 32 * 25 + 64) + (6400 * 512 + 512) + (512 * 10 + 10);
        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn forward_produces_class_logits() {
        let device = Default::default();
        let model: ConvNet<CpuBackend> = tiny_config().init(&device);
        let images = Tensor::<CpuBackend, 2>::ones([3, 28 * 28], &device);

        let logits = model.forward(images);
        assert_eq!(logits.dims(), [3, 10]);
    }

    #[test]
    fn classification_loss_is_finite_scalar() {
        let device = Default::default();
        let model: ConvNet<CpuBackend> = tiny_config().init(&device);
        let images = Tensor::<CpuBackend, 2>::zeros([2, 28 * 28], &device);
        let targets = Tensor::<CpuBackend, 1, Int>::from_data([3, 7], &device);

        let output = model.forward_classification(images, targets);
        assert_eq!(output.output.dims(), [2, 10]);
        let loss: f32 = output.loss.into_scalar().elem();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }
}
