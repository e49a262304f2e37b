use core::f64::consts::SQRT_2;

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::block::{LayerBlock, LayerBlockConfig};

/// ResNet body: everything up to, but excluding, global pooling and the classifier.
/// Derived from [torchivision.models.resnet.ResNet](https://github.com/pytorch/vision/blob/main/torchvision/models/resnet.py)
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
    layer4: LayerBlock<B>,
    out_channels: usize,
}

impl<B: Backend> ResNet<B> {
    /// Feature map of the last residual stage, `[batch, out_channels, h / 32, w / 32]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        // First block
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.relu.forward(x);
        let x = self.maxpool.forward(x);

        // Residual blocks
        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        self.layer4.forward(x)
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.conv1.weight.dims()[1]
    }

    /// Whether every stage of `record` has this network's block layout.
    pub fn matches_record(&self, record: &ResNetRecord<B>) -> bool {
        self.layer1.matches_record(&record.layer1)
            && self.layer2.matches_record(&record.layer2)
            && self.layer3.matches_record(&record.layer3)
            && self.layer4.matches_record(&record.layer4)
    }

    /// Rebuild the stem for `n_in` input channels from the RGB filters.
    ///
    /// A single channel gets the sum of the RGB filters. Any other count
    /// cycles through them and rescales by `3 / n_in`.
    pub fn with_input_channels(mut self, n_in: usize) -> Self {
        let rgb = self.in_channels();
        if n_in == rgb {
            return self;
        }

        let weight = self.conv1.weight.val();
        let [out_channels, _, kh, kw] = weight.dims();
        let weight = if n_in == 1 {
            weight.sum_dim(1)
        } else {
            let channels = (0..n_in)
                .map(|idx| {
                    let src = idx % rgb;
                    weight
                        .clone()
                        .slice([0..out_channels, src..src + 1, 0..kh, 0..kw])
                })
                .collect();
            Tensor::cat(channels, 1).mul_scalar(rgb as f64 / n_in as f64)
        };

        self.conv1.weight = Param::from_tensor(weight);
        self
    }
}

/// [ResNet](ResNet) configuration.
pub struct ResNetConfig {
    conv1: Conv2dConfig,
    bn1: BatchNormConfig,
    maxpool: MaxPool2dConfig,
    layer1: LayerBlockConfig,
    layer2: LayerBlockConfig,
    layer3: LayerBlockConfig,
    layer4: LayerBlockConfig,
    out_channels: usize,
}

impl ResNetConfig {
    /// Create a new instance of the ResNet [config](ResNetConfig).
    pub fn new(blocks: [usize; 4], expansion: usize, in_channels: usize) -> Self {
        // `new()` is private but still check just in case...
        assert!(
            expansion == 1 || expansion == 4,
            "ResNet module only supports expansion values [1, 4] for residual blocks"
        );

        // 7x7 conv, 64, /2
        let conv1 = Conv2dConfig::new([in_channels, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false);
        let bn1 = BatchNormConfig::new(64);

        // 3x3 maxpool, /2
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1));

        // Residual blocks
        let bottleneck = expansion > 1;
        let layer1 = LayerBlockConfig::new(blocks[0], 64, 64 * expansion, 1, bottleneck);
        let layer2 =
            LayerBlockConfig::new(blocks[1], 64 * expansion, 128 * expansion, 2, bottleneck);
        let layer3 =
            LayerBlockConfig::new(blocks[2], 128 * expansion, 256 * expansion, 2, bottleneck);
        let layer4 =
            LayerBlockConfig::new(blocks[3], 256 * expansion, 512 * expansion, 2, bottleneck);

        Self {
            conv1,
            bn1,
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            out_channels: 512 * expansion,
        }
    }

    /// Initialize a new [ResNet](ResNet) module.
    pub fn init<B: Backend>(self, device: &Device<B>) -> ResNet<B> {
        // Conv initializer
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2, // recommended value for ReLU
            fan_out_only: true,
        };

        ResNet {
            conv1: self.conv1.with_initializer(initializer).init(device),
            bn1: self.bn1.init(device),
            relu: Relu::new(),
            maxpool: self.maxpool.init(),
            layer1: self.layer1.init(device),
            layer2: self.layer2.init(device),
            layer3: self.layer3.init(device),
            layer4: self.layer4.init(device),
            out_channels: self.out_channels,
        }
    }
}
