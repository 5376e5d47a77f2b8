use ndarray::Array4;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to load model from {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("Model error: {0}")]
    Model(String),
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Model produced {outputs} scores but {labels} class names are configured")]
    ClassCountMismatch { outputs: usize, labels: usize },
    #[error("No class names configured")]
    NoClasses,
    #[error("Model produced no usable scores")]
    EmptyOutput,
}

/// A compiled classification model: one image batch in, one score vector out.
///
/// Implementations must be safe to call from several actix workers at once;
/// runtimes that are not re-entrant serialise calls internally.
pub trait ScoreModel: Send + Sync {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

#[cfg(feature = "torch")]
pub use self::torch::TorchModel;

#[cfg(feature = "torch")]
mod torch {
    use super::{InferenceError, ScoreModel};
    use ndarray::Array4;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tch::{CModule, Device, Kind, Tensor};

    /// TorchScript module behind a mutex; every forward pass holds the lock.
    #[derive(Clone)]
    pub struct TorchModel {
        model: Arc<Mutex<CModule>>,
        device: Device,
    }

    impl TorchModel {
        pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
            let device = Device::cuda_if_available();
            let mut module =
                CModule::load_on_device(model_path, device).map_err(|e| InferenceError::Load {
                    path: model_path.display().to_string(),
                    reason: e.to_string(),
                })?;
            module.set_eval();
            log::info!("Loaded model {} on {:?}", model_path.display(), device);
            Ok(Self {
                model: Arc::new(Mutex::new(module)),
                device,
            })
        }
    }

    impl ScoreModel for TorchModel {
        fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let shape: Vec<i64> = input.shape().iter().map(|&dim| dim as i64).collect();
            let data = input.as_slice().ok_or_else(|| {
                InferenceError::Preprocessing("input tensor is not contiguous".into())
            })?;
            let tensor = Tensor::from_slice(data)
                .view(shape.as_slice())
                .to_device(self.device);

            let model = self
                .model
                .lock()
                .map_err(|_| InferenceError::Model("model lock poisoned".into()))?;
            let output = tch::no_grad(|| model.forward_ts(&[tensor]))
                .map_err(|e| InferenceError::Model(e.to_string()))?;

            let output_flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
            Vec::<f32>::try_from(&output_flat).map_err(|e| InferenceError::Model(e.to_string()))
        }
    }
}
