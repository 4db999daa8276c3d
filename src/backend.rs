use crate::error::Error;
use burn::prelude::*;
use std::fmt;
use std::str::FromStr;

pub type Element = f32;

pub type CpuBackend = burn::backend::NdArray<Element, i32>;
pub type CpuAutoBackend = burn::backend::Autodiff<CpuBackend>;

#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(feature = "wgpu")]
pub type GpuAutoBackend = burn::backend::Autodiff<GpuBackend>;

/// Device a backend runs on when selected through an [`ExeContext`].
pub trait ContextDevice: Backend {
    fn context_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

impl ContextDevice for CpuBackend {}

#[cfg(feature = "wgpu")]
impl ContextDevice for GpuBackend {}

impl<B: ContextDevice> ContextDevice for burn::backend::Autodiff<B> {
    fn context_device() -> <Self as Backend>::Device {
        B::context_device()
    }
}

/// Where tensor operations execute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExeContext {
    /// Host execution on the `ndarray` backend.
    #[default]
    Numpy,
    /// Device execution on the `wgpu` backend.
    Gpu,
}

impl FromStr for ExeContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "numpy" | "cpu" => Ok(ExeContext::Numpy),
            "gpu" => Ok(ExeContext::Gpu),
            other => Err(Error::UnknownContext(other.to_string())),
        }
    }
}

impl fmt::Display for ExeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExeContext::Numpy => f.write_str("numpy"),
            ExeContext::Gpu => f.write_str("gpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_contexts() {
        assert_eq!("numpy".parse::<ExeContext>().unwrap(), ExeContext::Numpy);
        assert_eq!("cpu".parse::<ExeContext>().unwrap(), ExeContext::Numpy);
        assert_eq!("gpu".parse::<ExeContext>().unwrap(), ExeContext::Gpu);
    }

    #[test]
    fn rejects_unknown_context() {
        let err = "tpu".parse::<ExeContext>().unwrap_err();
        assert!(matches!(err, Error::UnknownContext(name) if name == "tpu"));
    }

    #[test]
    fn display_round_trips() {
        for ctx in [ExeContext::Numpy, ExeContext::Gpu] {
            assert_eq!(ctx.to_string().parse::<ExeContext>().unwrap(), ctx);
        }
    }
}
