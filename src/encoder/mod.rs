mod checkpoint;
mod head;
pub mod resnet;

use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};

pub use head::{PoolingHead, PoolingHeadConfig};
use resnet::{load_torchvision, ResNet, ResNetArch, ResNetPreset};

use crate::error::Error;
use checkpoint::load_checked;

/// Pretrained CNN body followed by a pooling head.
///
/// With a classifier the output is `[batch, n_out]` logits; without one it is
/// the pooled `[batch, num_features]` feature vector.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub body: ResNet<B>,
    pub head: PoolingHead<B>,
}

impl<B: Backend> Encoder<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.body.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    #[config(default = "ResNetPreset::new(ResNetArch::ResNet34)")]
    pub backbone: ResNetPreset,
    #[config(default = 3)]
    pub n_in: usize,
    /// Weights applied over the pretrained backbone.
    ///
    /// `.pt`/`.pth` files are torchvision `state_dict`s for the body, anything
    /// else a burn record of the whole encoder saved with
    /// [`NamedMpkFileRecorder`].
    pub weights_file: Option<PathBuf>,
    /// Keep the classifier layers; without them the encoder yields features.
    #[config(default = true)]
    pub head: bool,
    #[config(default = 1)]
    pub n_out: usize,
    #[config(default = true)]
    pub concat_pool: bool,
    #[config(default = "vec![512]")]
    pub lin_ftrs: Vec<usize>,
    #[config(default = 0.5)]
    pub ps: f64,
    #[config(default = false)]
    pub bn_final: bool,
    #[config(default = false)]
    pub lin_first: bool,
}

impl EncoderConfig {
    fn head_config(&self) -> PoolingHeadConfig {
        PoolingHeadConfig::new(self.backbone.out_channels(), self.n_out)
            .with_concat_pool(self.concat_pool)
            .with_lin_ftrs(self.lin_ftrs.clone())
            .with_ps(self.ps)
            .with_bn_final(self.bn_final)
            .with_lin_first(self.lin_first)
    }

    /// Width of the encoder output when `head` is false.
    pub fn num_features(&self) -> usize {
        self.head_config().num_features()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Encoder<B>> {
        let body = self.backbone.init(self.n_in, device)?;
        let head = self.head_config().init(device);
        let mut encoder = Encoder { body, head };

        if let Some(path) = &self.weights_file {
            encoder = load_weights_file(encoder, path, self.head, device)?;
        }
        if !self.head {
            encoder.head = encoder.head.truncate();
        }

        Ok(encoder)
    }

    /// Only the CNN body, with the weights file applied.
    pub fn init_body<B: Backend>(&self, device: &B::Device) -> crate::Result<ResNet<B>> {
        Ok(self.init(device)?.body)
    }
}

fn load_weights_file<B: Backend>(
    mut encoder: Encoder<B>,
    path: &Path,
    keep_head: bool,
    device: &B::Device,
) -> crate::Result<Encoder<B>> {
    let torchvision = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("pt" | "pth")
    );

    if torchvision {
        let body = load_torchvision(encoder.body, path, device)?;
        return Ok(Encoder { body, ..encoder });
    }

    let invalid = |reason: String| Error::Weights {
        path: path.to_path_buf(),
        reason,
    };

    tracing::info!(path = %path.display(), "loading encoder record");
    let record: EncoderRecord<B> = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .load(path.to_path_buf(), device)
        .map_err(|err| invalid(format!("{err:?}")))?;

    // Records of headless encoders carry no classifier layers
    if record.head.classifier.is_empty() && encoder.head.has_classifier() {
        if keep_head {
            return Err(invalid(
                "file holds a headless encoder but a classifier was requested".to_string(),
            ));
        }
        tracing::debug!("weights file has no classifier, truncating head before loading");
        encoder.head = encoder.head.truncate();
    }
    if !encoder.body.matches_record(&record.body) || !encoder.head.matches_record(&record.head) {
        return Err(invalid("layer layout differs from the encoder".to_string()));
    }

    load_checked(encoder, record, path)
}
