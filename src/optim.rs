use burn::optim::AdamConfig;

/// Plain Adam: betas 0.9/0.999, epsilon 1e-8, no weight decay.
pub fn optimizer_config() -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuAutoBackend;
    use crate::model::ConvNet;
    use crate::model::tests::tiny_config;
    use burn::optim::{GradientsParams, Optimizer};
    use burn::prelude::*;

    #[test]
    fn step_updates_parameters() {
        let device = Default::default();
        let model: ConvNet<CpuAutoBackend> = tiny_config().init(&device);
        let mut optim = optimizer_config().init::<CpuAutoBackend, ConvNet<CpuAutoBackend>>();

        let images = Tensor::<CpuAutoBackend, 2>::ones([2, 28 * 28], &device);
        let targets = Tensor::<CpuAutoBackend, 1, Int>::from_data([1, 4], &device);
        let before = model.dense2.bias.as_ref().unwrap().val().into_data();

        let loss = model.forward_classification(images, targets).loss;
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let model = optim.step(1e-3, model, grads);

        let after = model.dense2.bias.as_ref().unwrap().val().into_data();
        assert_ne!(before, after);
    }
}
