use crate::common::*;

pub const DEFAULT_CENTER_RADIUS: f64 = 2.5;

/// The geometric pre-selection of anchors for one image.
#[derive(Debug, TensorLike, Getters)]
pub struct CandidateAnchors {
    /// Anchors inside any ground truth box or any center region, `[anchor]` bool.
    #[get = "pub"]
    fg_mask: Tensor,
    /// The anchor indexes of true entries in `fg_mask`, `[candidate]` int64.
    #[get = "pub"]
    candidate_indexes: Tensor,
    /// Pairs that pass both the box and the center test, `[object, candidate]` bool.
    #[get = "pub"]
    in_boxes_and_center: Tensor,
}

impl CandidateAnchors {
    pub fn num_candidates(&self) -> i64 {
        self.candidate_indexes.size1().unwrap()
    }
}

/// Find candidate anchors whose centers lie inside ground truth boxes or center regions.
///
/// `gt_boxes` is a `[object, 4]` tensor in `(cx, cy, w, h)` format. The center region of
/// a ground truth spans `center_radius * stride` around its center for each anchor.
pub fn f_candidate_anchors(
    gt_boxes: &Tensor,
    anchor_points: &AnchorPointsTensor,
    center_radius: f64,
) -> Result<CandidateAnchors> {
    let is_in_boxes = f_in_boxes_matrix(gt_boxes, anchor_points)?;
    let is_in_centers = f_in_centers_matrix(gt_boxes, anchor_points, center_radius)?;

    let fg_mask = is_in_boxes
        .f_any_dim(0, false)?
        .f_logical_or(&is_in_centers.f_any_dim(0, false)?)?;
    let candidate_indexes = fg_mask.f_mask_to_indexes()?;

    let in_boxes_and_center = is_in_boxes
        .f_index_select(1, &candidate_indexes)?
        .f_logical_and(&is_in_centers.f_index_select(1, &candidate_indexes)?)?;

    Ok(CandidateAnchors {
        fg_mask,
        candidate_indexes,
        in_boxes_and_center,
    })
}

/// The `[object, anchor]` matrix of anchor centers strictly inside ground truth boxes.
pub fn f_in_boxes_matrix(gt_boxes: &Tensor, anchor_points: &AnchorPointsTensor) -> Result<Tensor> {
    let gt = CxCyWHTensor::from_cxcywh(gt_boxes)?;
    let half_w = gt.w().f_mul_scalar(0.5)?;
    let half_h = gt.h().f_mul_scalar(0.5)?;
    let left = gt.cx().f_sub(&half_w)?;
    let right = gt.cx().f_add(&half_w)?;
    let top = gt.cy().f_sub(&half_h)?;
    let bottom = gt.cy().f_add(&half_h)?;

    f_contains(&left, &top, &right, &bottom, anchor_points)
}

/// The `[object, anchor]` matrix of anchor centers strictly inside the center regions.
pub fn f_in_centers_matrix(
    gt_boxes: &Tensor,
    anchor_points: &AnchorPointsTensor,
    center_radius: f64,
) -> Result<Tensor> {
    let gt = CxCyWHTensor::from_cxcywh(gt_boxes)?;

    // [1, anchor]
    let radius = anchor_points
        .strides()
        .f_mul_scalar(center_radius)?
        .f_unsqueeze(0)?;
    let left = gt.cx().f_sub(&radius)?;
    let right = gt.cx().f_add(&radius)?;
    let top = gt.cy().f_sub(&radius)?;
    let bottom = gt.cy().f_add(&radius)?;

    f_contains(&left, &top, &right, &bottom, anchor_points)
}

fn f_contains(
    left: &Tensor,
    top: &Tensor,
    right: &Tensor,
    bottom: &Tensor,
    anchor_points: &AnchorPointsTensor,
) -> Result<Tensor> {
    let (center_x, center_y) = anchor_points.f_centers()?;
    let center_x = center_x.f_unsqueeze(0)?;
    let center_y = center_y.f_unsqueeze(0)?;

    let deltas = Tensor::f_stack(
        &[
            center_x.f_sub(left)?,
            center_y.f_sub(top)?,
            right.f_sub(&center_x)?,
            bottom.f_sub(&center_y)?,
        ],
        2,
    )?;
    let (min_delta, _) = deltas.f_min_dim(2, false)?;
    Ok(min_delta.f_gt(0.0)?)
}
