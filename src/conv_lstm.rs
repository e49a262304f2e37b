use std::path::PathBuf;

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
};

use crate::{
    clip::{encode_frames, stack_frames},
    encoder::{resnet::ResNetArch, resnet::ResNetPreset, Encoder, EncoderConfig},
    layers::{AttentionPool, AttentionPoolConfig, LinBnDrop, LinBnDropConfig},
    lstm::{HiddenState, StatefulLstm, StatefulLstmConfig},
};

/// Shared per-frame CNN encoding followed by a stateful LSTM over time.
///
/// The clip summary is either attention pooling over every LSTM step or the
/// final hidden state of all layers and directions, flattened.
#[derive(Module, Debug)]
pub struct ConvLstm<B: Backend> {
    pub encoder: Encoder<B>,
    pub lstm: StatefulLstm<B>,
    pub attention_layer: AttentionPool<B>,
    pub head: LinBnDrop<B>,
    pub classifier: Linear<B>,
    attention: bool,
}

#[derive(Debug, Clone)]
pub struct ConvLstmOutput<B: Backend> {
    /// `[batch, num_classes]`.
    pub logits: Tensor<B, 2>,
    /// `[batch, time]`, present when attention pooling is enabled.
    pub attention: Option<Tensor<B, 2>>,
}

impl<B: Backend> ConvLstm<B> {
    /// `[batch, time, channels, height, width]` to `[batch, num_classes]` logits.
    pub fn forward(&mut self, clip: Tensor<B, 5>) -> crate::Result<Tensor<B, 2>> {
        Ok(self.forward_detailed(clip)?.logits)
    }

    pub fn forward_detailed(&mut self, clip: Tensor<B, 5>) -> crate::Result<ConvLstmOutput<B>> {
        let features = encode_frames(&self.encoder, clip);
        tracing::trace!(dims = ?features.dims(), "before lstm");

        let out = self.lstm.forward(features)?;
        tracing::trace!(dims = ?out.output.dims(), "after lstm");

        let (summary, attention) = if self.attention {
            let (pooled, weights) = self.attention_layer.forward(out.output);
            tracing::trace!(dims = ?pooled.dims(), "after attention");
            (pooled, Some(weights))
        } else {
            // [layers * directions, batch, hidden] -> [batch, layers * directions * hidden]
            let hidden = out.state.hidden.swap_dims(0, 1).flatten::<2>(1, 2);
            tracing::trace!(dims = ?hidden.dims(), "hidden state flat");
            (hidden, None)
        };

        let logits = self.classifier.forward(self.head.forward(summary));
        Ok(ConvLstmOutput { logits, attention })
    }

    pub fn forward_frames(&mut self, frames: Vec<Tensor<B, 4>>) -> crate::Result<Tensor<B, 2>> {
        self.forward(stack_frames(frames)?)
    }

    /// Forget the recurrent state, e.g. at an epoch or sequence boundary.
    pub fn reset(&mut self) {
        self.lstm.reset();
    }

    pub fn state(&self) -> Option<&HiddenState<B>> {
        self.lstm.state()
    }

    pub fn set_state(&mut self, state: Option<HiddenState<B>>) {
        self.lstm.set_state(state);
    }

    pub fn uses_attention(&self) -> bool {
        self.attention
    }
}

#[derive(Config, Debug)]
pub struct ConvLstmConfig {
    #[config(default = "ResNetPreset::new(ResNetArch::ResNet34)")]
    pub backbone: ResNetPreset,
    pub weights_file: Option<PathBuf>,
    #[config(default = 30)]
    pub num_classes: usize,
    #[config(default = 1)]
    pub lstm_layers: usize,
    #[config(default = 1024)]
    pub hidden_dim: usize,
    #[config(default = true)]
    pub bidirectional: bool,
    #[config(default = true)]
    pub attention: bool,
    #[config(default = false)]
    pub fail_on_batch_change: bool,
}

impl ConvLstmConfig {
    pub fn encoder(&self) -> EncoderConfig {
        EncoderConfig::new()
            .with_backbone(self.backbone.clone())
            .with_weights_file(self.weights_file.clone())
            .with_head(false)
    }

    pub fn lstm(&self) -> StatefulLstmConfig {
        StatefulLstmConfig::new(self.encoder().num_features(), self.hidden_dim)
            .with_num_layers(self.lstm_layers)
            .with_bidirectional(self.bidirectional)
            .with_fail_on_batch_change(self.fail_on_batch_change)
    }

    /// Width of the clip summary fed to the head.
    pub fn summary_width(&self) -> usize {
        let step = self.lstm().d_output();
        if self.attention {
            step
        } else {
            step * self.lstm_layers
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<ConvLstm<B>> {
        let lstm = self.lstm();

        Ok(ConvLstm {
            encoder: self.encoder().init(device)?,
            lstm: lstm.init(device),
            attention_layer: AttentionPoolConfig::new(lstm.d_output()).init(device),
            head: LinBnDropConfig::new(self.summary_width(), self.hidden_dim)
                .with_dropout(0.2)
                .with_relu(true)
                .init(device),
            classifier: LinearConfig::new(self.hidden_dim, self.num_classes).init(device),
            attention: self.attention,
        })
    }
}
