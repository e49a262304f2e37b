use std::path::Path;

use burn::{
    config::Config,
    record::{FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Device},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::{encoder::checkpoint::load_checked, error::Error};

use super::{Pretrained, ResNet, ResNetArch, ResNetRecord};

/// A ResNet variant together with how its weights are initialised.
#[derive(Config, Debug)]
pub struct ResNetPreset {
    pub arch: ResNetArch,
    #[config(default = "Pretrained::ImageNet1kV1")]
    pub weights: Pretrained,
}

impl ResNetPreset {
    /// Build the backbone with `n_in` input channels.
    ///
    /// Published weights are always RGB; other channel counts are adapted
    /// after loading.
    pub fn init<B: Backend>(&self, n_in: usize, device: &Device<B>) -> crate::Result<ResNet<B>> {
        let structure = self.arch.structure();

        if self.weights == Pretrained::Random {
            return Ok(structure.to_config(n_in).init(device));
        }

        let url = self
            .arch
            .weights_url(self.weights)
            .ok_or(Error::UnsupportedWeights {
                arch: self.arch,
                weights: self.weights,
            })?;
        let weights = fetch(url)?;
        let model = structure.to_config(3).init(device);
        let model = load_torchvision(model, &weights, device)?;

        Ok(model.with_input_channels(n_in))
    }

    /// Channel count of the feature map this backbone produces.
    pub fn out_channels(&self) -> usize {
        self.arch.out_channels()
    }
}

#[cfg(feature = "pretrained")]
fn fetch(url: &str) -> crate::Result<std::path::PathBuf> {
    Ok(crate::download("resnet", url)?)
}

#[cfg(not(feature = "pretrained"))]
fn fetch(_url: &str) -> crate::Result<std::path::PathBuf> {
    Err(Error::PretrainedUnavailable)
}

/// Load a torchvision ResNet `state_dict` into `model`.
///
/// The classifier (`fc.*`) entries of the file have no counterpart in the
/// body and are skipped. Every other tensor must match the model's shape.
pub fn load_torchvision<B: Backend>(
    model: ResNet<B>,
    torch_weights: &Path,
    device: &Device<B>,
) -> crate::Result<ResNet<B>> {
    tracing::info!(path = %torch_weights.display(), "loading torchvision weights");
    let record = load_weights_record(torch_weights, device).map_err(|err| Error::Weights {
        path: torch_weights.to_path_buf(),
        reason: format!("{err:?}"),
    })?;
    if !model.matches_record(&record) {
        return Err(Error::Weights {
            path: torch_weights.to_path_buf(),
            reason: "residual stages differ from the backbone".to_string(),
        });
    }
    load_checked(model, record, torch_weights)
}

/// Load specified pre-trained PyTorch weights as a record.
fn load_weights_record<B: Backend>(
    torch_weights: &Path,
    device: &Device<B>,
) -> core::result::Result<ResNetRecord<B>, burn::record::RecorderError> {
    // Load weights from torch state_dict
    let load_args = LoadArgs::new(torch_weights.into())
        // Map *.downsample.0.* -> *.downsample.conv.*
        .with_key_remap("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2")
        // Map *.downsample.1.* -> *.downsample.bn.*
        .with_key_remap("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2")
        // Map layer[i].[j].* -> layer[i].blocks.[j].*
        .with_key_remap("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3");
    PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)
}
