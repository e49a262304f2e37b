use burn::{
    nn::{BatchNorm, BatchNormConfig},
    prelude::*,
};

use crate::layers::{norm_features, LinBnDrop, LinBnDropConfig};

/// Global pooling, flatten and batch-norm, optionally followed by the
/// classifier layers.
#[derive(Module, Debug)]
pub struct PoolingHead<B: Backend> {
    concat_pool: bool,
    norm: BatchNorm<B, 1>,
    classifier: Vec<LinBnDrop<B>>,
    final_norm: Option<BatchNorm<B, 1>>,
}

impl<B: Backend> PoolingHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool(x);
        let x = norm_features(&self.norm, x);
        let x = self
            .classifier
            .iter()
            .fold(x, |x, layer| layer.forward(x));

        match &self.final_norm {
            Some(norm) => norm_features(norm, x),
            None => x,
        }
    }

    /// `[batch, channels, h, w]` to `[batch, channels]`, or twice the channels
    /// when max- and average-pooling are concatenated.
    fn pool(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let avg = x.clone().mean_dim(3).mean_dim(2).flatten::<2>(1, 3);
        if !self.concat_pool {
            return avg;
        }
        let max = x.max_dim(3).max_dim(2).flatten::<2>(1, 3);
        Tensor::cat(vec![max, avg], 1)
    }

    /// Keep only pooling, flatten and batch-norm.
    pub fn truncate(mut self) -> Self {
        self.classifier.clear();
        self.final_norm = None;
        self
    }

    pub fn has_classifier(&self) -> bool {
        !self.classifier.is_empty()
    }

    /// Whether `record` has as many classifier layers as this head.
    pub fn matches_record(&self, record: &PoolingHeadRecord<B>) -> bool {
        self.classifier.len() == record.classifier.len()
    }
}

#[derive(Config, Debug)]
pub struct PoolingHeadConfig {
    /// Channels of the backbone feature map.
    channels: usize,
    n_out: usize,
    #[config(default = true)]
    concat_pool: bool,
    #[config(default = "vec![512]")]
    lin_ftrs: Vec<usize>,
    #[config(default = 0.5)]
    ps: f64,
    #[config(default = false)]
    bn_final: bool,
    #[config(default = false)]
    lin_first: bool,
}

impl PoolingHeadConfig {
    pub fn num_features(&self) -> usize {
        if self.concat_pool {
            self.channels * 2
        } else {
            self.channels
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PoolingHead<B> {
        let widths: Vec<usize> = std::iter::once(self.num_features())
            .chain(self.lin_ftrs.iter().copied())
            .chain(std::iter::once(self.n_out))
            .collect();
        let last = widths.len() - 2;

        // The first layer's batch-norm lives in `norm` so it survives truncation
        let classifier = widths
            .windows(2)
            .enumerate()
            .map(|(idx, pair)| {
                let dropout = if idx == last { self.ps } else { self.ps / 2.0 };
                LinBnDropConfig::new(pair[0], pair[1])
                    .with_batch_norm(idx != 0)
                    .with_bias(Some(false))
                    .with_dropout(dropout)
                    .with_relu(idx != last)
                    .with_lin_first(self.lin_first)
                    .init(device)
            })
            .collect();

        PoolingHead {
            concat_pool: self.concat_pool,
            norm: BatchNormConfig::new(self.num_features()).init(device),
            classifier,
            final_norm: self
                .bn_final
                .then(|| BatchNormConfig::new(self.n_out).with_momentum(0.01).init(device)),
        }
    }
}
