//! Batched box tensors and overlap metrics.

mod cxcywh;
mod tlbr;

pub use cxcywh::*;
pub use tlbr::*;

use crate::common::*;

/// The parameter layout of a `[batch, 4]` box tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoxFormat {
    /// `(min-x, min-y, max-x, max-y)`
    Xyxy,
    /// `(center-x, center-y, width, height)`
    CxCyWH,
}

/// Compute the `[n, m]` IoU matrix between `[n, 4]` and `[m, 4]` box tensors.
pub fn pairwise_iou(lhs: &Tensor, rhs: &Tensor, format: BoxFormat) -> Result<Tensor> {
    let to_tlbr = |tensor: &Tensor| -> Result<TLBRTensor> {
        match format {
            BoxFormat::Xyxy => TLBRTensor::from_xyxy(tensor),
            BoxFormat::CxCyWH => CxCyWHTensor::from_cxcywh(tensor)?.f_to_tlbr(),
        }
    };
    to_tlbr(lhs)?.f_pairwise_iou_with(&to_tlbr(rhs)?)
}
