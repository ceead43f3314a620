use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::model::{Classifier, ClassifierError, ModelLoadError, lock_backend};
use super::preprocess::ImageTensor;

/// TorchScript classifier. Expects an NCHW float input and returns logits,
/// which are turned into probabilities with softmax.
pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchClassifier {
    pub const ARTIFACT: &'static str = "model.pt";

    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device)
            .map_err(|e| ModelLoadError::Torch(e.to_string()))?;
        log::info!("Loaded TorchScript model from {} on {:?}", path.display(), device);
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl Classifier for TorchClassifier {
    fn name(&self) -> &str {
        "torchscript"
    }

    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, ClassifierError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let tensor = Tensor::from_slice(&input.to_vec())
            .view(shape.as_slice())
            .permute([0, 3, 1, 2])
            .to_device(self.device);

        let output = lock_backend(&self.module)
            .forward_ts(&[tensor])
            .map_err(|e| ClassifierError::Backend(e.to_string()))?;
        let output = output.softmax(-1, Kind::Float);
        let output_flat = output.to_kind(Kind::Float).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
