//! Model library selection.
//!
//! The real backend is candle, compiled in with the `candle-models` feature.
//! Builds without it can still run every test against the synthetic library,
//! but refuse to serve.

use std::sync::Arc;

use thiserror::Error;

use super::network::ModelLibrary;
#[cfg(feature = "candle-models")]
use super::network::NetworkError;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("No model backend compiled in; rebuild with `--features candle-models`")]
    NotCompiled,

    #[cfg(feature = "candle-models")]
    #[error("Model backend failed to start: {0}")]
    Backend(#[from] NetworkError),
}

/// Library used by the server.
pub fn default_library() -> Result<Arc<dyn ModelLibrary>, LibraryError> {
    #[cfg(feature = "candle-models")]
    {
        let library = CandleLibrary::new()?;
        tracing::info!(backend = library.name(), "Model library ready");
        Ok(Arc::new(library))
    }
    #[cfg(not(feature = "candle-models"))]
    {
        Err(LibraryError::NotCompiled)
    }
}

// ═══════════════════════════════════════════════════════════
// Candle library (`candle-models` feature)
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "candle-models")]
mod candle {
    use candle_core::{DType, Device, Module, Tensor};
    use candle_nn::{
        conv1d, conv2d, linear, lstm, Conv1d, Conv1dConfig, Conv2d, Conv2dConfig, Linear,
        LSTMConfig, VarBuilder, VarMap, LSTM, RNN,
    };
    use candle_transformers::models::{convnext, efficientnet, resnet};
    use ndarray::{ArrayD, IxDyn};

    use crate::pipeline::catalog::{ArchitectureCandidate, ArchitectureFamily as F};
    use crate::pipeline::network::{ModelLibrary, Network, NetworkError, ParameterSpec};

    fn backend(e: candle_core::Error) -> NetworkError {
        NetworkError::Backend(e.to_string())
    }

    /// PyTorch batch-norm counter with no candle counterpart. Declared so
    /// exported state dicts bind strictly; assigning it is a no-op.
    const BATCH_COUNTER: &str = "num_batches_tracked";

    /// CPU-backed candle networks. Parameters live in a `VarMap` so they can
    /// be enumerated and overwritten by name after construction.
    pub struct CandleLibrary {
        device: Device,
    }

    impl CandleLibrary {
        pub fn new() -> Result<Self, NetworkError> {
            Ok(Self {
                device: Device::Cpu,
            })
        }

        fn build(
            &self,
            candidate: &ArchitectureCandidate,
            vb: VarBuilder,
        ) -> Result<Box<dyn Module + Send + Sync>, NetworkError> {
            let classes = candidate.num_classes;
            let module: Box<dyn Module + Send + Sync> = match (candidate.family, classes) {
                (F::SimpleCnn, 1) => Box::new(SimpleCnn::new(vb).map_err(backend)?),
                (F::Resnet18Sigmoid, 1) => Box::new(Resnet18Sigmoid::new(vb).map_err(backend)?),
                (F::Resnet18, n) => Box::new(resnet::resnet18(n, vb).map_err(backend)?),
                (F::EfficientnetB0, n) => Box::new(
                    efficientnet::EfficientNet::new(vb, efficientnet::MBConvConfig::b0(), n)
                        .map_err(backend)?,
                ),
                (F::EfficientnetB3, n) => Box::new(
                    efficientnet::EfficientNet::new(vb, efficientnet::MBConvConfig::b3(), n)
                        .map_err(backend)?,
                ),
                (F::ConvnextBase, n) => Box::new(
                    convnext::convnext(&convnext::Config::base(), n, vb).map_err(backend)?,
                ),
                (F::CnnLstm1d, 1) => Box::new(CnnLstm1d::new(vb).map_err(backend)?),
                // TF-ported EfficientNets use "same" padding and a different
                // parameter layout; not provided.
                _ => return Err(NetworkError::UnsupportedArchitecture(*candidate)),
            };
            Ok(module)
        }
    }

    impl ModelLibrary for CandleLibrary {
        fn instantiate(
            &self,
            candidate: &ArchitectureCandidate,
        ) -> Result<Box<dyn Network>, NetworkError> {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
            let module = self.build(candidate, vb)?;
            tracing::debug!(%candidate, "Candle network instantiated");
            Ok(Box::new(CandleNetwork {
                varmap,
                module,
                device: self.device.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "candle-cpu"
        }
    }

    struct CandleNetwork {
        varmap: VarMap,
        module: Box<dyn Module + Send + Sync>,
        device: Device,
    }

    impl CandleNetwork {
        fn to_tensor(&self, array: &ArrayD<f32>) -> Result<Tensor, NetworkError> {
            Tensor::from_vec(array.iter().copied().collect::<Vec<f32>>(), array.shape(), &self.device)
                .map_err(backend)
        }
    }

    impl Network for CandleNetwork {
        fn parameters(&self) -> Vec<ParameterSpec> {
            let vars = match self.varmap.data().lock() {
                Ok(vars) => vars,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut specs: Vec<ParameterSpec> = vars
                .iter()
                .map(|(name, var)| ParameterSpec::new(name.clone(), var.dims()))
                .collect();
            let counters: Vec<ParameterSpec> = vars
                .keys()
                .filter_map(|name| name.strip_suffix("running_mean"))
                .map(|prefix| ParameterSpec::new(format!("{prefix}{BATCH_COUNTER}"), &[]))
                .collect();
            specs.extend(counters);
            specs.sort_by(|a, b| a.name.cmp(&b.name));
            specs
        }

        fn assign(&mut self, name: &str, value: &ArrayD<f32>) -> Result<(), NetworkError> {
            if name.ends_with(BATCH_COUNTER) {
                return Ok(());
            }
            let tensor = self.to_tensor(value)?;
            let vars = self
                .varmap
                .data()
                .lock()
                .map_err(|_| NetworkError::Backend("Parameter map lock poisoned".into()))?;
            let var = vars
                .get(name)
                .ok_or_else(|| NetworkError::UnknownParameter(name.to_string()))?;
            var.set(&tensor).map_err(backend)
        }

        fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, NetworkError> {
            let output = self
                .module
                .forward(&self.to_tensor(input)?)
                .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;
            let dims = output.dims().to_vec();
            let values = output
                .flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(backend)?;
            ArrayD::from_shape_vec(IxDyn(&dims), values)
                .map_err(|e| NetworkError::Backend(e.to_string()))
        }
    }

    // ── Locally defined families ────────────────────────────────

    /// Two conv/pool blocks over a 224×224 input and a two-layer sigmoid head.
    struct SimpleCnn {
        conv1: Conv2d,
        conv2: Conv2d,
        fc1: Linear,
        fc2: Linear,
    }

    impl SimpleCnn {
        fn new(vb: VarBuilder) -> candle_core::Result<Self> {
            let same = Conv2dConfig {
                padding: 1,
                ..Default::default()
            };
            Ok(Self {
                conv1: conv2d(3, 32, 3, same, vb.pp("conv1"))?,
                conv2: conv2d(32, 64, 3, same, vb.pp("conv2"))?,
                fc1: linear(64 * 56 * 56, 128, vb.pp("fc1"))?,
                fc2: linear(128, 1, vb.pp("fc2"))?,
            })
        }
    }

    impl Module for SimpleCnn {
        fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
            let xs = xs.apply(&self.conv1)?.relu()?.max_pool2d(2)?;
            let xs = xs.apply(&self.conv2)?.relu()?.max_pool2d(2)?;
            let xs = xs.flatten_from(1)?.apply(&self.fc1)?.relu()?;
            candle_nn::ops::sigmoid(&xs.apply(&self.fc2)?)
        }
    }

    /// ResNet-18 trunk with a single-logit sigmoid head stored under `fc.1`.
    struct Resnet18Sigmoid {
        trunk: candle_nn::Func<'static>,
        head: Linear,
    }

    impl Resnet18Sigmoid {
        fn new(vb: VarBuilder) -> candle_core::Result<Self> {
            Ok(Self {
                trunk: resnet::resnet18_no_final_layer(vb.clone())?,
                head: linear(512, 1, vb.pp("fc").pp("1"))?,
            })
        }
    }

    impl Module for Resnet18Sigmoid {
        fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
            let features = xs.apply(&self.trunk)?;
            candle_nn::ops::sigmoid(&features.apply(&self.head)?)
        }
    }

    /// 1-D conv stack feeding an LSTM; input `(batch, features, 1)`.
    struct CnnLstm1d {
        conv1: Conv1d,
        conv2: Conv1d,
        lstm: LSTM,
        fc1: Linear,
        fc2: Linear,
    }

    impl CnnLstm1d {
        fn new(vb: VarBuilder) -> candle_core::Result<Self> {
            let cfg = Conv1dConfig::default();
            Ok(Self {
                conv1: conv1d(1, 64, 3, cfg, vb.pp("conv1"))?,
                conv2: conv1d(64, 128, 3, cfg, vb.pp("conv2"))?,
                lstm: lstm(128, 64, LSTMConfig::default(), vb.pp("lstm"))?,
                fc1: linear(64, 64, vb.pp("fc1"))?,
                fc2: linear(64, 1, vb.pp("fc2"))?,
            })
        }
    }

    fn max_pool1d(xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.unsqueeze(2)?
            .max_pool2d_with_stride((1, 2), (1, 2))?
            .squeeze(2)
    }

    impl Module for CnnLstm1d {
        fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
            let xs = xs.permute((0, 2, 1))?.contiguous()?;
            let xs = max_pool1d(&xs.apply(&self.conv1)?.relu()?)?;
            let xs = max_pool1d(&xs.apply(&self.conv2)?.relu()?)?;
            let xs = xs.permute((0, 2, 1))?.contiguous()?;
            let states = self.lstm.seq(&xs)?;
            let last = states
                .last()
                .ok_or_else(|| candle_core::Error::Msg("sequence too short for LSTM".into()))?;
            let out = last.h().apply(&self.fc1)?.relu()?;
            candle_nn::ops::sigmoid(&out.apply(&self.fc2)?)
        }
    }

}

#[cfg(feature = "candle-models")]
pub use candle::CandleLibrary;

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "candle-models"))]
    #[test]
    fn default_library_requires_backend_feature() {
        assert!(matches!(default_library(), Err(LibraryError::NotCompiled)));
    }

    #[cfg(feature = "candle-models")]
    #[test]
    fn default_library_is_candle() {
        assert_eq!(default_library().unwrap().name(), "candle-cpu");
    }
}
