use super::tlbr::TLBRTensor;
use crate::common::*;

/// Checked tensor of batched box parameters in CxCyWH (center-size) format.
#[derive(Debug, TensorLike, Getters)]
pub struct CxCyWHTensor {
    /// The center x parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cx: Tensor,
    /// The center y parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cy: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) w: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) h: Tensor,
}

impl CxCyWHTensor {
    /// Split a `[batch, 4]` tensor laid out as `(cx, cy, w, h)`.
    pub fn from_cxcywh(tensor: &Tensor) -> Result<Self> {
        let (_num, width) = tensor
            .size2()
            .map_err(|_| format_err!("expect a [batch, 4] box tensor, but get {:?}", tensor.size()))?;
        ensure!(
            width == 4,
            "expect a [batch, 4] box tensor, but get {:?}",
            tensor.size()
        );

        Ok(Self {
            cx: tensor.f_narrow(1, 0, 1)?,
            cy: tensor.f_narrow(1, 1, 1)?,
            w: tensor.f_narrow(1, 2, 1)?,
            h: tensor.f_narrow(1, 3, 1)?,
        })
    }

    pub fn f_to_tlbr(&self) -> Result<TLBRTensor> {
        self.try_into()
    }

    /// Compute the element-wise IoU score with the other box tensor.
    pub fn f_iou_with(&self, other: &Self) -> Result<Tensor> {
        self.f_to_tlbr()?.f_iou_with(&other.f_to_tlbr()?)
    }

    /// Compute the element-wise GIoU score with the other box tensor.
    pub fn f_giou_with(&self, other: &Self) -> Result<Tensor> {
        self.f_to_tlbr()?.f_giou_with(&other.f_to_tlbr()?)
    }

    /// Compute the `[self, other]` matrix of IoU scores.
    pub fn f_pairwise_iou_with(&self, other: &Self) -> Result<Tensor> {
        self.f_to_tlbr()?
            .f_pairwise_iou_with(&other.f_to_tlbr()?)
    }
}
