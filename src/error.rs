use std::path::PathBuf;

use crate::encoder::resnet::{Pretrained, ResNetArch};

/// Errors raised before work is handed to the tensor backend.
///
/// Shape mismatches inside tensor kernels remain backend panics; the
/// variants here cover what can be checked up front.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("clip contains no frames")]
    EmptyClip,

    #[error("frame {index} has shape {found:?}, expected {expected:?}")]
    FrameShape {
        index: usize,
        expected: [usize; 4],
        found: [usize; 4],
    },

    #[error("{axis} extent {len} exceeds the {max} learned positions")]
    PositionOutOfRange {
        axis: &'static str,
        len: usize,
        max: usize,
    },

    #[error("hidden state holds batch size {state} but the input has batch size {input}")]
    BatchSizeChanged { state: usize, input: usize },

    #[error("could not load weights from {}: {reason}", .path.display())]
    Weights { path: PathBuf, reason: String },

    #[error("could not download pretrained weights: {0}")]
    Download(#[from] std::io::Error),

    #[error("pretrained weights need the `pretrained` feature")]
    PretrainedUnavailable,

    #[error("{arch:?} has no {weights:?} weights")]
    UnsupportedWeights {
        arch: ResNetArch,
        weights: Pretrained,
    },
}

pub type Result<T> = core::result::Result<T, Error>;
