use super::{assignment::Assignment, ground_truth::GroundTruth};
use crate::common::*;

const L1_TARGET_EPSILON: f64 = 1e-8;

/// The training targets of one image.
#[derive(Debug, TensorLike)]
pub struct ImageTargets {
    /// One-hot classes scaled by the matched IoU, `[fg, class]`.
    pub cls_target: Tensor,
    /// `[anchor, 1]`, one on foreground anchors.
    pub obj_target: Tensor,
    /// Matched boxes as `(cx, cy, w, h)`, `[fg, 4]`.
    pub reg_target: Tensor,
    /// Matched boxes encoded like the raw head output, `[fg, 4]`.
    pub l1_target: Option<Tensor>,
    /// Matched tracking ids, `[fg]` int64.
    pub reid_target: Option<Tensor>,
}

pub fn f_build_targets(
    ground_truth: &GroundTruth,
    assignment: &Assignment,
    anchor_points: &AnchorPointsTensor,
    num_classes: usize,
    use_l1: bool,
) -> Result<ImageTargets> {
    tch::no_grad(|| {
        let matched_gt_indexes = assignment.matched_gt_indexes();

        let cls_target = assignment
            .matched_classes()
            .f_one_hot(num_classes as i64)?
            .f_to_kind(Kind::Float)?
            .f_mul(&assignment.matched_ious().f_unsqueeze(1)?)?;
        let obj_target = assignment
            .fg_mask()
            .f_to_kind(Kind::Float)?
            .f_unsqueeze(1)?;
        let reg_target = ground_truth.boxes().f_index_select(0, matched_gt_indexes)?;

        let l1_target = if use_l1 {
            let points = anchor_points.index_select(assignment.fg_indexes());
            Some(f_l1_target(&reg_target, &points)?)
        } else {
            None
        };

        let reid_target = ground_truth
            .track_ids()
            .as_ref()
            .map(|track_ids| track_ids.f_index_select(0, matched_gt_indexes))
            .transpose()?;

        Ok(ImageTargets {
            cls_target,
            obj_target,
            reg_target,
            l1_target,
            reid_target,
        })
    })
}

/// Encode `(cx, cy, w, h)` boxes relative to the grid cells and strides of their anchors.
///
/// This inverts the decoding of head outputs, giving `cx / stride - grid_x`,
/// `cy / stride - grid_y`, `ln(w / stride)` and `ln(h / stride)`.
pub fn f_l1_target(boxes: &Tensor, anchor_points: &AnchorPointsTensor) -> Result<Tensor> {
    let boxes = CxCyWHTensor::from_cxcywh(boxes)?;
    let strides = anchor_points.strides().f_unsqueeze(1)?;
    let grid_x = anchor_points.grid_x().f_unsqueeze(1)?;
    let grid_y = anchor_points.grid_y().f_unsqueeze(1)?;

    let tx = boxes.cx().f_div(&strides)?.f_sub(&grid_x)?;
    let ty = boxes.cy().f_div(&strides)?.f_sub(&grid_y)?;
    let tw = boxes
        .w()
        .f_div(&strides)?
        .f_add_scalar(L1_TARGET_EPSILON)?
        .f_log()?;
    let th = boxes
        .h()
        .f_div(&strides)?
        .f_add_scalar(L1_TARGET_EPSILON)?
        .f_log()?;

    Ok(Tensor::f_cat(&[tx, ty, tw, th], 1)?)
}
