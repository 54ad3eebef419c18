//! Loss function building blocks.

mod assignment;
mod cost;
mod dynamic_k;
mod ground_truth;
mod in_boxes;
mod loss;
mod reid;
mod target;

pub use assignment::*;
pub use cost::*;
pub use dynamic_k::*;
pub use ground_truth::*;
pub use in_boxes::*;
pub use loss::*;
pub use reid::*;
pub use target::*;
