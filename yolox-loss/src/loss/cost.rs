use crate::common::*;

/// The weight of the IoU term in the matching cost.
pub const IOU_COST_WEIGHT: f64 = 3.0;
/// The cost added to pairs outside the box and center intersection.
pub const EXCLUSION_PENALTY: f64 = 100000.0;
const IOU_COST_EPSILON: f64 = 1e-8;

/// The `[object, candidate]` matching cost and pairwise IoU of one image.
#[derive(Debug, TensorLike, Getters)]
pub struct CostMatrix {
    #[get = "pub"]
    cost: Tensor,
    #[get = "pub"]
    pair_ious: Tensor,
}

#[derive(Debug, TensorLike)]
pub struct CostMatrixUnchecked {
    pub cost: Tensor,
    pub pair_ious: Tensor,
}

impl CostMatrix {
    pub fn num_objects(&self) -> i64 {
        let (num_objects, _) = self.cost.size2().unwrap();
        num_objects
    }

    pub fn num_candidates(&self) -> i64 {
        let (_, num_candidates) = self.cost.size2().unwrap();
        num_candidates
    }
}

impl TryFrom<CostMatrixUnchecked> for CostMatrix {
    type Error = Error;

    fn try_from(from: CostMatrixUnchecked) -> Result<Self, Self::Error> {
        let CostMatrixUnchecked { cost, pair_ious } = from;
        ensure!(
            cost.size2()? == pair_ious.size2()?,
            "cost and IoU matrices must have the same shape, but get {:?} and {:?}",
            cost.size(),
            pair_ious.size()
        );
        ensure!(cost.device() == pair_ious.device(), "device mismatch");
        Ok(Self { cost, pair_ious })
    }
}

/// The predictions of candidate anchors used to price each pairing.
#[derive(Debug, TensorLike)]
pub struct CandidatePrediction {
    /// `[candidate, 4]` as `(cx, cy, w, h)`
    pub bbox: Tensor,
    /// `[candidate, class]`
    pub class_logit: Tensor,
    /// `[candidate, 1]`
    pub obj_logit: Tensor,
}

/// Price every (ground truth, candidate) pair.
///
/// The computation is carried out in single precision with mixed precision
/// disabled, regardless of the prediction kind.
pub fn f_cost_matrix(
    gt_classes: &Tensor,
    gt_boxes: &Tensor,
    prediction: &CandidatePrediction,
    in_boxes_and_center: &Tensor,
    num_classes: usize,
) -> Result<CostMatrix> {
    let CandidatePrediction {
        bbox,
        class_logit,
        obj_logit,
    } = prediction;
    let num_objects = gt_classes.size1()?;
    let (num_candidates, _) = bbox.size2()?;
    ensure!(
        in_boxes_and_center.size2()? == (num_objects, num_candidates),
        "expect a [{}, {}] candidate matrix, but get {:?}",
        num_objects,
        num_candidates,
        in_boxes_and_center.size()
    );

    tch::autocast(false, || -> Result<_> {
        let gt_boxes = CxCyWHTensor::from_cxcywh(&gt_boxes.f_to_kind(Kind::Float)?)?;
        let pred_boxes = CxCyWHTensor::from_cxcywh(&bbox.f_to_kind(Kind::Float)?)?;
        let pair_ious = gt_boxes.f_pairwise_iou_with(&pred_boxes)?;
        let iou_cost = pair_ious.f_add_scalar(IOU_COST_EPSILON)?.f_log()?.f_neg()?;

        // [object, candidate, class]
        let gt_onehot = gt_classes
            .f_one_hot(num_classes as i64)?
            .f_to_kind(Kind::Float)?
            .f_unsqueeze(1)?
            .f_expand(&[num_objects, num_candidates, num_classes as i64], false)?;
        let pred_score = class_logit
            .f_to_kind(Kind::Float)?
            .f_sigmoid()?
            .f_mul(&obj_logit.f_to_kind(Kind::Float)?.f_sigmoid()?)?
            .f_sqrt()?
            .f_unsqueeze(0)?
            .f_expand(&[num_objects, num_candidates, num_classes as i64], false)?;
        let cls_cost = pred_score
            .f_binary_cross_entropy(&gt_onehot, None::<Tensor>, Reduction::None)?
            .f_sum_dim_intlist(&[-1], false, Kind::Float)?;

        let exclusion = in_boxes_and_center
            .f_logical_not()?
            .f_to_kind(Kind::Float)?
            .f_mul_scalar(EXCLUSION_PENALTY)?;

        let cost = cls_cost
            .f_add(&iou_cost.f_mul_scalar(IOU_COST_WEIGHT)?)?
            .f_add(&exclusion)?;

        Ok(CostMatrix { cost, pair_ious })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn cost_terms() -> Result<()> {
        let gt_classes = Tensor::of_slice(&[1i64]);
        let gt_boxes = Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0]).view([1, 4]);

        // zero logits give a score of sqrt(0.25) = 0.5 for every class
        let prediction = CandidatePrediction {
            bbox: Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 12.0, 10.0, 4.0, 4.0]).view([2, 4]),
            class_logit: Tensor::zeros(&[2, 3], (Kind::Float, Device::Cpu)),
            obj_logit: Tensor::zeros(&[2, 1], (Kind::Float, Device::Cpu)),
        };
        let fine = Tensor::of_slice(&[true, false]).view([1, 2]);

        let matrix = f_cost_matrix(&gt_classes, &gt_boxes, &prediction, &fine, 3)?;
        ensure!(matrix.cost().size() == vec![1, 2]);

        let cls_cost = 3.0 * 2f64.ln();
        let iou = 8.0 / 24.0;
        assert_abs_diff_eq!(
            matrix.pair_ious().double_value(&[0, 0]),
            1.0,
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(
            matrix.pair_ious().double_value(&[0, 1]),
            iou,
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(
            matrix.cost().double_value(&[0, 0]),
            cls_cost,
            epsilon = 1e-4
        );
        assert_abs_diff_eq!(
            matrix.cost().double_value(&[0, 1]),
            cls_cost - 3.0 * f64::ln(iou) + EXCLUSION_PENALTY,
            epsilon = 1e-1
        );
        Ok(())
    }

    #[test]
    fn confident_prediction_is_cheaper() -> Result<()> {
        let gt_classes = Tensor::of_slice(&[0i64]);
        let gt_boxes = Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0]).view([1, 4]);
        let prediction = CandidatePrediction {
            bbox: Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 10.0, 10.0, 4.0, 4.0]).view([2, 4]),
            class_logit: Tensor::of_slice(&[5f32, -5.0, -5.0, 5.0]).view([2, 2]),
            obj_logit: Tensor::of_slice(&[5f32, 5.0]).view([2, 1]),
        };
        let fine = Tensor::of_slice(&[true, true]).view([1, 2]);

        let matrix = f_cost_matrix(&gt_classes, &gt_boxes, &prediction, &fine, 2)?;
        ensure!(matrix.cost().double_value(&[0, 0]) < matrix.cost().double_value(&[0, 1]));
        Ok(())
    }

    #[test]
    fn cost_ignores_mixed_precision() -> Result<()> {
        let gt_classes = Tensor::of_slice(&[0i64, 1]);
        let gt_boxes =
            Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 30.0, 30.0, 8.0, 8.0]).view([2, 4]);
        let prediction = CandidatePrediction {
            bbox: Tensor::of_slice(&[11f32, 10.0, 4.0, 4.0, 29.0, 31.0, 6.0, 8.0]).view([2, 4]),
            class_logit: Tensor::of_slice(&[2f32, -1.0, -3.0, 4.0]).view([2, 2]),
            obj_logit: Tensor::of_slice(&[1f32, 3.0]).view([2, 1]),
        };
        let fine = Tensor::of_slice(&[true, false, false, true]).view([2, 2]);

        let plain = f_cost_matrix(&gt_classes, &gt_boxes, &prediction, &fine, 2)?;
        let mixed = tch::autocast(true, || {
            f_cost_matrix(&gt_classes, &gt_boxes, &prediction, &fine, 2)
        })?;

        ensure!(mixed.cost().kind() == Kind::Float);
        ensure!(mixed.pair_ious().kind() == Kind::Float);
        let diff = f64::from((mixed.cost() - plain.cost()).abs().max());
        assert_abs_diff_eq!(diff, 0.0, epsilon = 1e-6);
        Ok(())
    }
}
