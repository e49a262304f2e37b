mod block;
mod presets;
mod resnet;
mod weights;

pub use presets::*;
pub use resnet::*;
pub use weights::*;
