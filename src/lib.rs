#[cfg(feature = "pretrained")]
mod download;
#[cfg(feature = "pretrained")]
pub(crate) use download::download;

pub mod clip;
pub mod encoder;
pub mod error;
pub mod layers;
pub mod lstm;
pub mod splitter;

mod conv_lstm;
mod detr;
mod simple;

pub use conv_lstm::*;
pub use detr::*;
pub use error::{Error, Result};
pub use simple::*;
pub use splitter::{collect_param_ids, convlstm_splitter, detr_split, simple_splitter, ParamGroup};
