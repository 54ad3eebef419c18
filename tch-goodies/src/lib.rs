//! Tensor utilities shared by the detection loss crates.

mod common;
pub mod compound_tensor;
pub mod detection;
pub mod tensor;
pub mod utils;

pub use compound_tensor::*;
pub use detection::*;
pub use tensor::*;
pub use utils::*;
