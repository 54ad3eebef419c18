use super::cost::CostMatrix;
use crate::common::*;

/// The maximum number of top IoU candidates summed into the dynamic k.
pub const CANDIDATE_TOPK: i64 = 10;

/// The result of dynamic-k matching on the candidate anchors of one image.
#[derive(Debug, TensorLike, Getters)]
pub struct DynamicKMatching {
    /// `[object, candidate]` of zeros and ones, with at most one 1 per column.
    #[get = "pub"]
    matching_matrix: Tensor,
    /// The k of each ground truth, `[object]` int64.
    #[get = "pub"]
    dynamic_ks: Tensor,
    /// Candidates matched to some ground truth, `[candidate]` bool.
    #[get = "pub"]
    fg_mask: Tensor,
    /// The ground truth index of each matched candidate, `[fg]` int64.
    #[get = "pub"]
    matched_gt_indexes: Tensor,
    /// The IoU of each matched pair, `[fg]`.
    #[get = "pub"]
    matched_ious: Tensor,
}

impl DynamicKMatching {
    pub fn num_fg(&self) -> i64 {
        self.matched_gt_indexes.size1().unwrap()
    }
}

/// Compute the number of anchors each ground truth receives.
///
/// The k of a ground truth is the floored sum of its top `min(10, candidates)`
/// IoUs, and is at least 1.
pub fn f_dynamic_ks(pair_ious: &Tensor) -> Result<Tensor> {
    let (_num_objects, num_candidates) = pair_ious.size2()?;
    let topk = CANDIDATE_TOPK.min(num_candidates);
    let (topk_ious, _) = pair_ious.f_topk(topk, 1, true, true)?;
    let dynamic_ks = topk_ious
        .f_sum_dim_intlist(&[1], false, Kind::Float)?
        .f_to_kind(Kind::Int64)?
        .f_clamp_min(1)?;
    Ok(dynamic_ks)
}

/// Assign each ground truth its k cheapest candidates, then give every
/// contested candidate to its cheapest ground truth.
pub fn f_dynamic_k_matching(cost_matrix: &CostMatrix) -> Result<DynamicKMatching> {
    let cost = cost_matrix.cost();
    let pair_ious = cost_matrix.pair_ious();
    let (num_objects, num_candidates) = cost.size2()?;
    let device = cost.device();

    let dynamic_ks = f_dynamic_ks(pair_ious)?;

    if num_candidates == 0 {
        return Ok(DynamicKMatching {
            matching_matrix: Tensor::f_zeros(&[num_objects, 0], (Kind::Float, device))?,
            dynamic_ks,
            fg_mask: Tensor::f_zeros(&[0], (Kind::Bool, device))?,
            matched_gt_indexes: Tensor::f_zeros(&[0], (Kind::Int64, device))?,
            matched_ious: Tensor::f_zeros(&[0], (Kind::Float, device))?,
        });
    }

    // rank of each candidate within its row, cheapest first
    let ranks = cost.f_argsort(1, false)?.f_argsort(1, false)?;
    let matching_matrix = ranks
        .f_lt_tensor(&dynamic_ks.f_unsqueeze(1)?)?
        .f_to_kind(Kind::Float)?;

    // resolve candidates claimed by multiple ground truths
    let num_claims = matching_matrix.f_sum_dim_intlist(&[0], false, Kind::Float)?;
    let is_contested = num_claims.f_gt(1.0)?;
    let matching_matrix = if bool::from(is_contested.f_any()?) {
        let cheapest_gt = cost.f_argmin(0, false)?;
        let resolved = cheapest_gt
            .f_one_hot(num_objects)?
            .f_transpose(0, 1)?
            .f_to_kind(Kind::Float)?;
        resolved.f_where_self(&is_contested.f_unsqueeze(0)?, &matching_matrix)?
    } else {
        matching_matrix
    };

    let fg_mask = matching_matrix
        .f_sum_dim_intlist(&[0], false, Kind::Float)?
        .f_gt(0.0)?;
    let fg_indexes = fg_mask.f_mask_to_indexes()?;
    let matched_gt_indexes = matching_matrix
        .f_index_select(1, &fg_indexes)?
        .f_argmax(0, false)?;
    let matched_ious = matching_matrix
        .f_mul(pair_ious)?
        .f_sum_dim_intlist(&[0], false, Kind::Float)?
        .f_index_select(0, &fg_indexes)?;

    Ok(DynamicKMatching {
        matching_matrix,
        dynamic_ks,
        fg_mask,
        matched_gt_indexes,
        matched_ious,
    })
}
