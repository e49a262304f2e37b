use core::f64::consts::SQRT_2;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

fn conv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: true,
    }
}

/// 1x1 projection on the shortcut path when the block changes shape.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_bias(false)
                .with_initializer(conv_initializer())
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions (ResNet-18/34).
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));

        self.relu.forward(out + identity)
    }
}

/// 1x1 reduce, 3x3, 1x1 expand (ResNet-50 and deeper).
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.relu.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));

        self.relu.forward(out + identity)
    }
}

#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    Basic(BasicBlock<B>),
    Bottleneck(Bottleneck<B>),
}

impl<B: Backend> ResidualBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(x),
            Self::Bottleneck(block) => block.forward(x),
        }
    }
}

/// A stage of residual blocks sharing one output width.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(x, |x, block| block.forward(x))
    }

    /// Whether `record` has the same number and kind of blocks as this stage.
    pub fn matches_record(&self, record: &LayerBlockRecord<B>) -> bool {
        self.blocks.len() == record.blocks.len()
            && self.blocks.iter().zip(&record.blocks).all(|pair| {
                matches!(
                    pair,
                    (ResidualBlock::Basic(_), ResidualBlockRecord::Basic(_))
                        | (ResidualBlock::Bottleneck(_), ResidualBlockRecord::Bottleneck(_))
                )
            })
    }
}

#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    num_blocks: usize,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    bottleneck: bool,
}

impl LayerBlockConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> LayerBlock<B> {
        let blocks = (0..self.num_blocks)
            .map(|idx| {
                let (in_channels, stride) = if idx == 0 {
                    (self.in_channels, self.stride)
                } else {
                    (self.out_channels, 1)
                };
                if self.bottleneck {
                    ResidualBlock::Bottleneck(self.bottleneck_block(in_channels, stride, device))
                } else {
                    ResidualBlock::Basic(self.basic_block(in_channels, stride, device))
                }
            })
            .collect();

        LayerBlock { blocks }
    }

    fn basic_block<B: Backend>(
        &self,
        in_channels: usize,
        stride: usize,
        device: &Device<B>,
    ) -> BasicBlock<B> {
        let out_channels = self.out_channels;
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        BasicBlock {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    fn bottleneck_block<B: Backend>(
        &self,
        in_channels: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Bottleneck<B> {
        let out_channels = self.out_channels;
        // Expansion is fixed at 4 for bottleneck stages
        let width = out_channels / 4;
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Bottleneck {
            conv1: conv1x1(in_channels, width, device),
            bn1: BatchNormConfig::new(width).init(device),
            relu: Relu::new(),
            conv2: conv3x3(width, width, stride, device),
            bn2: BatchNormConfig::new(width).init(device),
            conv3: conv1x1(width, out_channels, device),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }
}

fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &Device<B>,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .with_initializer(conv_initializer())
        .init(device)
}

fn conv1x1<B: Backend>(in_channels: usize, out_channels: usize, device: &Device<B>) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [1, 1])
        .with_padding(PaddingConfig2d::Explicit(0, 0))
        .with_bias(false)
        .with_initializer(conv_initializer())
        .init(device)
}
