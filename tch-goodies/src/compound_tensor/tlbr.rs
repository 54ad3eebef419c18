use super::cxcywh::CxCyWHTensor;
use crate::{common::*, utils::EPSILON};

/// Checked tensor of batched box parameters in TLBR (corner) format.
///
/// Every parameter has shape `[batch, 1]`, or `[1, batch]` when transposed
/// for pairwise broadcasting.
#[derive(Debug, TensorLike, Getters)]
pub struct TLBRTensor {
    /// The top (min-y) parameter.
    #[get = "pub"]
    pub(crate) t: Tensor,
    /// The left (min-x) parameter.
    #[get = "pub"]
    pub(crate) l: Tensor,
    /// The bottom (max-y) parameter.
    #[get = "pub"]
    pub(crate) b: Tensor,
    /// The right (max-x) parameter.
    #[get = "pub"]
    pub(crate) r: Tensor,
}

impl TLBRTensor {
    /// Split a `[batch, 4]` tensor laid out as `(min-x, min-y, max-x, max-y)`.
    pub fn from_xyxy(tensor: &Tensor) -> Result<Self> {
        let (_num, width) = tensor
            .size2()
            .map_err(|_| format_err!("expect a [batch, 4] box tensor, but get {:?}", tensor.size()))?;
        ensure!(
            width == 4,
            "expect a [batch, 4] box tensor, but get {:?}",
            tensor.size()
        );

        Ok(Self {
            l: tensor.f_narrow(1, 0, 1)?,
            t: tensor.f_narrow(1, 1, 1)?,
            r: tensor.f_narrow(1, 2, 1)?,
            b: tensor.f_narrow(1, 3, 1)?,
        })
    }

    /// Concatenate parameters into a `[batch, 4]` tensor in `(min-x, min-y, max-x, max-y)` order.
    pub fn f_to_xyxy(&self) -> Result<Tensor> {
        let Self { t, l, b, r } = self;
        Ok(Tensor::f_cat(&[l, t, r, b], 1)?)
    }

    /// Swap the parameter layout between `[batch, 1]` and `[1, batch]`.
    pub fn f_transpose(&self) -> Result<Self> {
        let Self { t, l, b, r } = self;
        Ok(Self {
            t: t.f_transpose(0, 1)?,
            l: l.f_transpose(0, 1)?,
            b: b.f_transpose(0, 1)?,
            r: r.f_transpose(0, 1)?,
        })
    }

    /// Compute the box area.
    pub fn f_area(&self) -> Result<Tensor> {
        let Self { t, l, b, r } = self;
        let h = b.f_sub(t)?;
        let w = r.f_sub(l)?;
        Ok(h.f_mul(&w)?)
    }

    /// Compute the intersection area with the other box tensor.
    ///
    /// The extents are clamped to zero so that disjoint boxes have exactly
    /// zero intersection.
    pub fn f_intersect_area_with(&self, other: &Self) -> Result<Tensor> {
        let max_t = self.t.f_maximum(&other.t)?;
        let max_l = self.l.f_maximum(&other.l)?;
        let min_b = self.b.f_minimum(&other.b)?;
        let min_r = self.r.f_minimum(&other.r)?;

        let inner_h = min_b.f_sub(&max_t)?.f_clamp_min(0.0)?;
        let inner_w = min_r.f_sub(&max_l)?.f_clamp_min(0.0)?;

        Ok(inner_h.f_mul(&inner_w)?)
    }

    /// Compute the smallest enclosing box with the other box tensor.
    pub fn f_closure_with(&self, other: &Self) -> Result<Self> {
        Ok(Self {
            t: self.t.f_minimum(&other.t)?,
            l: self.l.f_minimum(&other.l)?,
            b: self.b.f_maximum(&other.b)?,
            r: self.r.f_maximum(&other.r)?,
        })
    }

    /// Compute the IoU score with the other box tensor.
    ///
    /// The shapes broadcast, so `[n, 1]` against `[n, 1]` is element-wise
    /// and `[n, 1]` against `[1, m]` is pairwise.
    pub fn f_iou_with(&self, other: &Self) -> Result<Tensor> {
        let inter_area = self.f_intersect_area_with(other)?;
        let union_area = self
            .f_area()?
            .f_add(&other.f_area()?)?
            .f_sub(&inter_area)?
            .f_add_scalar(EPSILON)?;
        Ok(inter_area.f_div(&union_area)?)
    }

    /// Compute the GIoU score with the other box tensor, clamped into `[-1, 1]`.
    pub fn f_giou_with(&self, other: &Self) -> Result<Tensor> {
        let inter_area = self.f_intersect_area_with(other)?;
        let union_area = self
            .f_area()?
            .f_add(&other.f_area()?)?
            .f_sub(&inter_area)?
            .f_add_scalar(EPSILON)?;
        let iou = inter_area.f_div(&union_area)?;

        let closure_area = self.f_closure_with(other)?.f_area()?.f_clamp_min(EPSILON)?;
        let excess = closure_area.f_sub(&union_area)?.f_div(&closure_area)?;
        let giou = iou.f_sub(&excess)?.f_clamp(-1.0, 1.0)?;
        Ok(giou)
    }

    /// Compute the `[self, other]` matrix of IoU scores.
    pub fn f_pairwise_iou_with(&self, other: &Self) -> Result<Tensor> {
        self.f_iou_with(&other.f_transpose()?)
    }
}

impl TryFrom<&CxCyWHTensor> for TLBRTensor {
    type Error = Error;

    fn try_from(from: &CxCyWHTensor) -> Result<Self, Self::Error> {
        let CxCyWHTensor { cx, cy, w, h } = from;

        let half_w = w.f_div_scalar(2.0)?;
        let half_h = h.f_div_scalar(2.0)?;

        Ok(Self {
            t: cy.f_sub(&half_h)?,
            l: cx.f_sub(&half_w)?,
            b: cy.f_add(&half_h)?,
            r: cx.f_add(&half_w)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn boxes(values: &[[f32; 4]]) -> Tensor {
        let flat: Vec<f32> = values.iter().flatten().cloned().collect();
        Tensor::of_slice(&flat).view([-1, 4])
    }

    #[test]
    fn reject_malformed_boxes() {
        let tensor = Tensor::zeros(&[3, 5], (Kind::Float, Device::Cpu));
        assert!(TLBRTensor::from_xyxy(&tensor).is_err());
        let tensor = Tensor::zeros(&[4], (Kind::Float, Device::Cpu));
        assert!(TLBRTensor::from_xyxy(&tensor).is_err());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() -> Result<()> {
        let lhs = TLBRTensor::from_xyxy(&boxes(&[[0.0, 0.0, 10.0, 10.0], [5.0, 5.0, 6.0, 7.0]]))?;
        let rhs = TLBRTensor::from_xyxy(&boxes(&[[0.0, 0.0, 10.0, 10.0], [6.0, 0.0, 9.0, 7.0]]))?;
        let iou: Vec<f32> = Vec::from(&lhs.f_iou_with(&rhs)?.view([-1]));

        assert_abs_diff_eq!(iou[0], 1.0, epsilon = 1e-6);
        // touching edges do not overlap
        assert_eq!(iou[1], 0.0);
        Ok(())
    }

    #[test]
    fn pairwise_iou_shape() -> Result<()> {
        let lhs = TLBRTensor::from_xyxy(&boxes(&[[0.0, 0.0, 2.0, 2.0], [1.0, 1.0, 3.0, 3.0]]))?;
        let rhs = TLBRTensor::from_xyxy(&boxes(&[
            [0.0, 0.0, 2.0, 2.0],
            [1.0, 1.0, 3.0, 3.0],
            [10.0, 10.0, 11.0, 11.0],
        ]))?;
        let iou = lhs.f_pairwise_iou_with(&rhs)?;
        ensure!(iou.size() == vec![2, 3]);

        let values: Vec<f32> = Vec::from(&iou.view([-1]));
        assert_abs_diff_eq!(values[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(values[1], 1.0 / 7.0, epsilon = 1e-6);
        assert_abs_diff_eq!(values[3], 1.0 / 7.0, epsilon = 1e-6);
        assert_eq!(values[2], 0.0);
        assert_eq!(values[5], 0.0);
        Ok(())
    }

    #[test]
    fn giou_bounded_by_iou() -> Result<()> {
        use rand::prelude::*;
        let mut rng = rand::thread_rng();

        let random_boxes = |rng: &mut ThreadRng| {
            let values: Vec<[f32; 4]> = (0..64)
                .map(|_| {
                    let x: f32 = rng.gen_range(0.0..50.0);
                    let y: f32 = rng.gen_range(0.0..50.0);
                    let w: f32 = rng.gen_range(0.5..20.0);
                    let h: f32 = rng.gen_range(0.5..20.0);
                    [x, y, x + w, y + h]
                })
                .collect();
            boxes(&values)
        };

        let lhs = TLBRTensor::from_xyxy(&random_boxes(&mut rng))?;
        let rhs = TLBRTensor::from_xyxy(&random_boxes(&mut rng))?;
        let iou = lhs.f_iou_with(&rhs)?;
        let giou = lhs.f_giou_with(&rhs)?;

        ensure!(bool::from(giou.le_tensor(&(&iou + 1e-6)).all()));
        ensure!(bool::from(giou.ge(-1.0).all()));
        Ok(())
    }

    #[test]
    fn giou_equals_iou_when_union_fills_closure() -> Result<()> {
        // the two boxes tile their enclosing box
        let lhs = TLBRTensor::from_xyxy(&boxes(&[[0.0, 0.0, 4.0, 2.0]]))?;
        let rhs = TLBRTensor::from_xyxy(&boxes(&[[0.0, 1.0, 4.0, 3.0]]))?;
        let iou = lhs.f_iou_with(&rhs)?.double_value(&[0, 0]);
        let giou = lhs.f_giou_with(&rhs)?.double_value(&[0, 0]);
        assert_abs_diff_eq!(iou, giou, epsilon = 1e-6);
        assert_abs_diff_eq!(iou, 4.0 / 12.0, epsilon = 1e-6);
        Ok(())
    }
}
