use burn::{
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    prelude::*,
    tensor::activation::softmax,
};

/// Batch-norm over the feature axis of a `[batch, features]` tensor.
pub(crate) fn norm_features<B: Backend>(norm: &BatchNorm<B, 1>, x: Tensor<B, 2>) -> Tensor<B, 2> {
    norm.forward(x.unsqueeze_dim::<3>(2)).squeeze(2)
}

/// Linear layer wrapped with batch-norm, dropout and an optional ReLU.
///
/// Default order is `BatchNorm -> Dropout -> Linear -> ReLU`; with
/// `lin_first` it becomes `Linear -> ReLU -> BatchNorm -> Dropout`.
#[derive(Module, Debug)]
pub struct LinBnDrop<B: Backend> {
    norm: Option<BatchNorm<B, 1>>,
    dropout: Dropout,
    linear: Linear<B>,
    relu: Option<Relu>,
    lin_first: bool,
}

impl<B: Backend> LinBnDrop<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.lin_first {
            let x = self.activate(self.linear.forward(x));
            let x = self.normalize(x);
            self.dropout.forward(x)
        } else {
            let x = self.normalize(x);
            let x = self.dropout.forward(x);
            self.activate(self.linear.forward(x))
        }
    }

    fn normalize(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match &self.norm {
            Some(norm) => norm_features(norm, x),
            None => x,
        }
    }

    fn activate(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match &self.relu {
            Some(relu) => relu.forward(x),
            None => x,
        }
    }
}

#[derive(Config, Debug)]
pub struct LinBnDropConfig {
    d_input: usize,
    d_output: usize,
    #[config(default = true)]
    batch_norm: bool,
    #[config(default = 0.0)]
    dropout: f64,
    #[config(default = false)]
    relu: bool,
    #[config(default = false)]
    lin_first: bool,
    /// Defaults to a bias only when there is no batch-norm.
    bias: Option<bool>,
}

impl LinBnDropConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinBnDrop<B> {
        let norm_width = if self.lin_first {
            self.d_output
        } else {
            self.d_input
        };

        LinBnDrop {
            norm: self
                .batch_norm
                .then(|| BatchNormConfig::new(norm_width).init(device)),
            dropout: DropoutConfig::new(self.dropout).init(),
            linear: LinearConfig::new(self.d_input, self.d_output)
                .with_bias(self.bias.unwrap_or(!self.batch_norm))
                .init(device),
            relu: self.relu.then(Relu::new),
            lin_first: self.lin_first,
        }
    }
}

/// Learned soft attention over the time axis.
///
/// One score per step from a linear projection, softmax over time, then a
/// weighted sum. The weights of each batch element sum to one.
#[derive(Module, Debug)]
pub struct AttentionPool<B: Backend> {
    score: Linear<B>,
}

impl<B: Backend> AttentionPool<B> {
    /// `[batch, time, features]` to the pooled `[batch, features]` and the
    /// `[batch, time]` weights.
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, time, features] = x.dims();
        let scores = self.score.forward(x.clone()).reshape([batch, time]);
        let weights = softmax(scores, 1);

        let pooled = (x * weights.clone().unsqueeze_dim::<3>(2))
            .sum_dim(1)
            .reshape([batch, features]);

        (pooled, weights)
    }
}

#[derive(Config, Debug)]
pub struct AttentionPoolConfig {
    d_input: usize,
}

impl AttentionPoolConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttentionPool<B> {
        AttentionPool {
            score: LinearConfig::new(self.d_input, 1).init(device),
        }
    }
}
