use super::ResNetConfig;

/// ResNet depth variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ResNetArch {
    ResNet18,
    ResNet34,
    ResNet50,
    ResNet101,
    ResNet152,
}

/// Backbone initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Pretrained {
    /// Randomly initialised; nothing is downloaded.
    Random,
    /// torchvision weights closely reproducing the original paper.
    ImageNet1kV1,
    /// torchvision weights trained with the improved
    /// [recipe](https://pytorch.org/blog/how-to-train-state-of-the-art-models-using-torchvision-latest-primitives).
    /// Only published for ResNet-50 and deeper.
    ImageNet1kV2,
}

/// ResNet structure metadata.
pub struct ResNetStructure {
    pub(super) shape: [usize; 4],
    pub(super) expansion: usize,
}

impl ResNetStructure {
    pub fn to_config(&self, in_channels: usize) -> ResNetConfig {
        ResNetConfig::new(self.shape, self.expansion, in_channels)
    }
}

impl ResNetArch {
    pub fn structure(&self) -> ResNetStructure {
        let (shape, expansion) = match self {
            Self::ResNet18 => ([2, 2, 2, 2], 1),
            Self::ResNet34 => ([3, 4, 6, 3], 1),
            Self::ResNet50 => ([3, 4, 6, 3], 4),
            Self::ResNet101 => ([3, 4, 23, 3], 4),
            Self::ResNet152 => ([3, 8, 36, 3], 4),
        };
        ResNetStructure { shape, expansion }
    }

    /// Channel count of the last residual stage.
    pub fn out_channels(&self) -> usize {
        512 * self.structure().expansion
    }

    /// Download location of published weights, `None` when torchvision has none.
    ///
    /// Top-1 ImageNet accuracy for reference:
    /// 18 V1 69.758%, 34 V1 73.314%, 50 V1 76.130% / V2 80.858%,
    /// 101 V1 77.374% / V2 81.886%, 152 V1 78.312% / V2 82.284%.
    pub fn weights_url(&self, weights: Pretrained) -> Option<&'static str> {
        let url = match (self, weights) {
            (_, Pretrained::Random) => return None,
            (Self::ResNet18, Pretrained::ImageNet1kV1) => {
                "https://download.pytorch.org/models/resnet18-f37072fd.pth"
            }
            (Self::ResNet34, Pretrained::ImageNet1kV1) => {
                "https://download.pytorch.org/models/resnet34-b627a593.pth"
            }
            (Self::ResNet50, Pretrained::ImageNet1kV1) => {
                "https://download.pytorch.org/models/resnet50-0676ba61.pth"
            }
            (Self::ResNet50, Pretrained::ImageNet1kV2) => {
                "https://download.pytorch.org/models/resnet50-11ad3fa6.pth"
            }
            (Self::ResNet101, Pretrained::ImageNet1kV1) => {
                "https://download.pytorch.org/models/resnet101-63fe2227.pth"
            }
            (Self::ResNet101, Pretrained::ImageNet1kV2) => {
                "https://download.pytorch.org/models/resnet101-cd907fc2.pth"
            }
            (Self::ResNet152, Pretrained::ImageNet1kV1) => {
                "https://download.pytorch.org/models/resnet152-394f9c45.pth"
            }
            (Self::ResNet152, Pretrained::ImageNet1kV2) => {
                "https://download.pytorch.org/models/resnet152-f82ba261.pth"
            }
            (Self::ResNet18 | Self::ResNet34, Pretrained::ImageNet1kV2) => return None,
        };
        Some(url)
    }
}
