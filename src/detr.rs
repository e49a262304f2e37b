//! Single-query DETR-style classifier.
//!
//! A clip is treated as a small spatio-temporal point cloud: every cell of
//! every frame's feature map becomes a token carrying learned time, column and
//! row embeddings, and one learned query decodes the clip's class.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        transformer::{
            TransformerDecoder, TransformerDecoderConfig, TransformerDecoderInput,
            TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput,
        },
        Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    prelude::*,
};

use crate::{
    clip::{merge_time, stack_frames},
    encoder::{
        resnet::{ResNet, ResNetArch, ResNetPreset},
        EncoderConfig,
    },
    error::Error,
};

/// Post-norm encoder-decoder with a final LayerNorm on each stack.
#[derive(Module, Debug)]
pub struct Transformer<B: Backend> {
    encoder: TransformerEncoder<B>,
    encoder_norm: LayerNorm<B>,
    decoder: TransformerDecoder<B>,
    decoder_norm: LayerNorm<B>,
}

impl<B: Backend> Transformer<B> {
    /// `source` is `[batch, tokens, d_model]`, `target` `[batch, queries, d_model]`.
    pub fn forward(&self, source: Tensor<B, 3>, target: Tensor<B, 3>) -> Tensor<B, 3> {
        let memory = self
            .encoder
            .forward(TransformerEncoderInput::new(source));
        let memory = self.encoder_norm.forward(memory);

        let out = self
            .decoder
            .forward(TransformerDecoderInput::new(target, memory));
        self.decoder_norm.forward(out)
    }
}

#[derive(Module, Debug)]
pub struct Detr<B: Backend> {
    pub backbone: ResNet<B>,
    /// 1x1 projection from backbone channels to the transformer width.
    pub conv: Conv2d<B>,
    pub transformer: Transformer<B>,
    pub query_pos: Param<Tensor<B, 2>>,
    pub row_embed: Param<Tensor<B, 2>>,
    pub col_embed: Param<Tensor<B, 2>>,
    pub time_embed: Param<Tensor<B, 2>>,
    pub lin: Linear<B>,
}

impl<B: Backend> Detr<B> {
    /// `[batch, time, channels, height, width]` to `[batch, n_classes]` logits.
    ///
    /// Fails when the clip length or the feature map exceeds the learned
    /// position tables.
    pub fn forward(&self, clip: Tensor<B, 5>) -> crate::Result<Tensor<B, 2>> {
        let [batch, time, ..] = clip.dims();

        let features = self.backbone.forward(merge_time(clip));
        tracing::trace!(dims = ?features.dims(), "backbone");

        let h = self.conv.forward(features);
        let [_, d_model, height, width] = h.dims();
        tracing::trace!(time, height, width, "feature grid");

        let pos = self.positional_embedding(time, height, width)?;
        let tokens = time * height * width;

        // [batch * time, d, h, w] -> [batch, time * h * w, d], ordered (t, h, w)
        let h = h
            .reshape([batch, time, d_model, height, width])
            .permute([0, 1, 3, 4, 2])
            .reshape([batch, tokens, d_model]);
        let source = repeat_batch(pos.unsqueeze::<3>(), batch) + h.mul_scalar(0.5);
        tracing::trace!(dims = ?source.dims(), "transformer input");

        let query = repeat_batch(self.query_pos.val().unsqueeze::<3>(), batch);
        let out = self.transformer.forward(source, query);
        tracing::trace!(dims = ?out.dims(), "transformer output");

        let logits = self.lin.forward(out);
        let [_, _, n_classes] = logits.dims();
        Ok(logits.reshape([batch, n_classes]))
    }

    pub fn forward_frames(&self, frames: Vec<Tensor<B, 4>>) -> crate::Result<Tensor<B, 2>> {
        self.forward(stack_frames(frames)?)
    }

    /// Learned position of every `(t, row, col)` cell, `[time * height * width, d_model]`.
    ///
    /// Each row concatenates the time, column and row embeddings of its cell.
    pub fn positional_embedding(
        &self,
        time: usize,
        height: usize,
        width: usize,
    ) -> crate::Result<Tensor<B, 2>> {
        for (axis, len, table) in [
            ("time", time, &self.time_embed),
            ("height", height, &self.row_embed),
            ("width", width, &self.col_embed),
        ] {
            let [max, _] = table.dims();
            if len > max {
                return Err(Error::PositionOutOfRange { axis, len, max });
            }
        }

        let device = self.time_embed.device();
        let cells = time * height * width;
        let mut t_idx = Vec::with_capacity(cells);
        let mut row_idx = Vec::with_capacity(cells);
        let mut col_idx = Vec::with_capacity(cells);
        for t in 0..time {
            for row in 0..height {
                for col in 0..width {
                    t_idx.push(t as i64);
                    row_idx.push(row as i64);
                    col_idx.push(col as i64);
                }
            }
        }

        let lookup = |table: &Param<Tensor<B, 2>>, idx: Vec<i64>| {
            let idx = Tensor::<B, 1, Int>::from_data(TensorData::new(idx, [cells]), &device);
            table.val().select(0, idx)
        };

        Ok(Tensor::cat(
            vec![
                lookup(&self.time_embed, t_idx),
                lookup(&self.col_embed, col_idx),
                lookup(&self.row_embed, row_idx),
            ],
            1,
        ))
    }

    /// Longest clip and largest feature map the position tables cover.
    pub fn max_positions(&self) -> usize {
        self.time_embed.dims()[0]
    }
}

fn repeat_batch<B: Backend>(x: Tensor<B, 3>, batch: usize) -> Tensor<B, 3> {
    Tensor::cat(vec![x; batch], 0)
}

#[derive(Config, Debug)]
pub struct DetrConfig {
    #[config(default = "ResNetPreset::new(ResNetArch::ResNet34)")]
    pub backbone: ResNetPreset,
    #[config(default = 3)]
    pub n_in: usize,
    #[config(default = 30)]
    pub n_classes: usize,
    #[config(default = 256)]
    pub hidden_dim: usize,
    #[config(default = 4)]
    pub n_heads: usize,
    #[config(default = 4)]
    pub num_encoder_layers: usize,
    #[config(default = 4)]
    pub num_decoder_layers: usize,
    #[config(default = 2048)]
    pub d_ff: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 50)]
    pub max_positions: usize,
}

impl DetrConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Detr<B>> {
        let d_model = self.hidden_dim;
        let backbone = EncoderConfig::new()
            .with_backbone(self.backbone.clone())
            .with_n_in(self.n_in)
            .with_head(false)
            .init_body(device)?;

        let transformer = Transformer {
            encoder: TransformerEncoderConfig::new(
                d_model,
                self.d_ff,
                self.n_heads,
                self.num_encoder_layers,
            )
            .with_dropout(self.dropout)
            .init(device),
            encoder_norm: LayerNormConfig::new(d_model).init(device),
            decoder: TransformerDecoderConfig::new(
                d_model,
                self.d_ff,
                self.n_heads,
                self.num_decoder_layers,
            )
            .with_dropout(self.dropout)
            .init(device),
            decoder_norm: LayerNormConfig::new(d_model).init(device),
        };

        let uniform = Initializer::Uniform { min: 0.0, max: 1.0 };

        Ok(Detr {
            conv: Conv2dConfig::new([backbone.out_channels(), d_model], [1, 1]).init(device),
            backbone,
            transformer,
            query_pos: uniform.init([1, d_model], device),
            row_embed: uniform.init([self.max_positions, d_model / 4], device),
            col_embed: uniform.init([self.max_positions, d_model / 4], device),
            time_embed: uniform.init([self.max_positions, d_model - 2 * (d_model / 4)], device),
            lin: LinearConfig::new(d_model, self.n_classes).init(device),
        })
    }
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, tensor::Distribution};

    use super::*;
    use crate::encoder::resnet::Pretrained;

    type TestBackend = NdArray;

    fn config() -> DetrConfig {
        DetrConfig::new()
            .with_backbone(ResNetPreset::new(ResNetArch::ResNet18).with_weights(Pretrained::Random))
            .with_n_classes(6)
            .with_hidden_dim(32)
            .with_d_ff(64)
            .with_num_encoder_layers(1)
            .with_num_decoder_layers(1)
    }

    #[test]
    fn positional_embedding_covers_every_cell() {
        let device = Default::default();
        let detr = config().init::<TestBackend>(&device).unwrap();

        let pos = detr.positional_embedding(2, 3, 4).unwrap();
        assert_eq!(pos.dims(), [24, 32]);

        let pos = detr.positional_embedding(50, 50, 50).unwrap();
        assert_eq!(pos.dims(), [50 * 50 * 50, 32]);
    }

    #[test]
    fn positional_embedding_layout() {
        let device = Default::default();
        let detr = config().init::<TestBackend>(&device).unwrap();
        let (time, height, width) = (2, 3, 4);
        let pos = detr.positional_embedding(time, height, width).unwrap();

        // Cell (t=1, row=2, col=3) is the last one.
        let cell = pos.slice([23..24, 0..32]);
        let expected = Tensor::cat(
            vec![
                detr.time_embed.val().slice([1..2, 0..16]),
                detr.col_embed.val().slice([3..4, 0..8]),
                detr.row_embed.val().slice([2..3, 0..8]),
            ],
            1,
        );
        cell.into_data().assert_approx_eq(&expected.into_data(), 5);
    }

    #[test]
    fn positions_beyond_the_tables_fail() {
        let device = Default::default();
        let detr = config().init::<TestBackend>(&device).unwrap();

        for (dims, axis) in [
            ((51, 1, 1), "time"),
            ((1, 51, 1), "height"),
            ((1, 1, 51), "width"),
        ] {
            match detr.positional_embedding(dims.0, dims.1, dims.2) {
                Err(Error::PositionOutOfRange { axis: found, len, max }) => {
                    assert_eq!(found, axis);
                    assert_eq!(len, 51);
                    assert_eq!(max, 50);
                }
                other => panic!("expected an out-of-range error, got {other:?}"),
            }
        }
    }

    #[test]
    fn classifies_a_batch_of_clips() {
        let device = Default::default();
        let detr = config().init::<TestBackend>(&device).unwrap();
        let clip =
            Tensor::<TestBackend, 5>::random([2, 3, 3, 64, 64], Distribution::Default, &device);

        assert_eq!(detr.forward(clip).unwrap().dims(), [2, 6]);
    }

    #[test]
    fn long_clips_are_rejected() {
        let device = Default::default();
        let detr = config().with_max_positions(2).init::<TestBackend>(&device).unwrap();
        let clip = Tensor::<TestBackend, 5>::zeros([1, 3, 3, 32, 32], &device);

        assert!(matches!(
            detr.forward(clip),
            Err(Error::PositionOutOfRange { axis: "time", .. })
        ));
    }
}
