//! SimOTA label assignment and the YOLOX detection loss.

mod common;
pub mod config;
pub mod loss;
pub mod profiling;

pub use config::*;
pub use loss::*;
