//! Loss and decoding modules for dense detectors.

mod bce_with_logits_loss;
mod common;
mod cross_entropy;
mod detect_2d;
mod iou_loss;
mod l1_loss;
mod merge_detect_2d;

pub use bce_with_logits_loss::*;
pub use cross_entropy::*;
pub use detect_2d::*;
pub use iou_loss::*;
pub use l1_loss::*;
pub use merge_detect_2d::*;
