use std::path::PathBuf;

use burn::prelude::*;

use crate::{
    clip::{encode_frames, stack_frames},
    encoder::{resnet::ResNetArch, resnet::ResNetPreset, Encoder, EncoderConfig},
    layers::{AttentionPool, AttentionPoolConfig, LinBnDrop, LinBnDropConfig},
};

/// Per-frame CNN features pooled over time with learned attention.
#[derive(Module, Debug)]
pub struct SimpleModel<B: Backend> {
    pub encoder: Encoder<B>,
    pub attention: AttentionPool<B>,
    pub head: Vec<LinBnDrop<B>>,
}

impl<B: Backend> SimpleModel<B> {
    /// `[batch, time, channels, height, width]` to `[batch, num_classes]` logits.
    pub fn forward(&self, clip: Tensor<B, 5>) -> Tensor<B, 2> {
        self.forward_with_attention(clip).0
    }

    /// Logits together with the `[batch, time]` attention weights.
    pub fn forward_with_attention(&self, clip: Tensor<B, 5>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        tracing::trace!(dims = ?clip.dims(), "clip");
        let features = encode_frames(&self.encoder, clip);

        let (pooled, weights) = self.attention.forward(features);
        tracing::trace!(dims = ?pooled.dims(), "after attention");

        let logits = self.head.iter().fold(pooled, |x, layer| layer.forward(x));
        (logits, weights)
    }

    /// Stack a list of `[batch, channels, height, width]` frames and classify.
    pub fn forward_frames(&self, frames: Vec<Tensor<B, 4>>) -> crate::Result<Tensor<B, 2>> {
        Ok(self.forward(stack_frames(frames)?))
    }
}

#[derive(Config, Debug)]
pub struct SimpleModelConfig {
    #[config(default = "ResNetPreset::new(ResNetArch::ResNet34)")]
    pub backbone: ResNetPreset,
    pub weights_file: Option<PathBuf>,
    #[config(default = 30)]
    pub num_classes: usize,
}

impl SimpleModelConfig {
    pub fn encoder(&self) -> EncoderConfig {
        EncoderConfig::new()
            .with_backbone(self.backbone.clone())
            .with_weights_file(self.weights_file.clone())
            .with_head(false)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<SimpleModel<B>> {
        let encoder_config = self.encoder();
        let nf = encoder_config.num_features();

        let head = vec![
            LinBnDropConfig::new(nf, nf / 2)
                .with_dropout(0.2)
                .with_relu(true)
                .init(device),
            LinBnDropConfig::new(nf / 2, self.num_classes)
                .with_dropout(0.05)
                .init(device),
        ];

        Ok(SimpleModel {
            encoder: encoder_config.init(device)?,
            attention: AttentionPoolConfig::new(nf).init(device),
            head,
        })
    }
}
