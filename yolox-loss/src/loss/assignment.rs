use super::{
    cost::{f_cost_matrix, CandidatePrediction},
    dynamic_k::f_dynamic_k_matching,
    ground_truth::GroundTruth,
    in_boxes::{f_candidate_anchors, DEFAULT_CENTER_RADIUS},
};
use crate::common::*;

/// Where the label assignment of one image is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// On the device of the predictions.
    Default,
    /// On the host memory, used after the default context runs out of memory.
    Constrained,
}

impl ExecutionContext {
    pub fn device(&self, primary: Device) -> Device {
        match self {
            Self::Default => primary,
            Self::Constrained => Device::Cpu,
        }
    }
}

/// The dense predictions of one image, with `anchor` spanning all scales.
#[derive(Debug, TensorLike)]
pub struct ImagePrediction {
    /// `[anchor, 4]` as `(cx, cy, w, h)` in pixel units.
    pub bbox: Tensor,
    /// `[anchor, class]`
    pub class_logit: Tensor,
    /// `[anchor, 1]`
    pub obj_logit: Tensor,
}

impl ImagePrediction {
    pub fn num_anchors(&self) -> i64 {
        let (num_anchors, _) = self.bbox.size2().unwrap();
        num_anchors
    }

    pub fn device(&self) -> Device {
        self.bbox.device()
    }
}

/// The foreground anchors of one image and their ground truths.
#[derive(Debug, TensorLike, Getters)]
pub struct Assignment {
    /// `[anchor]` bool
    #[get = "pub"]
    fg_mask: Tensor,
    /// The anchor index of each foreground anchor, `[fg]` int64.
    #[get = "pub"]
    fg_indexes: Tensor,
    /// `[fg]` int64
    #[get = "pub"]
    matched_gt_indexes: Tensor,
    /// `[fg]` int64
    #[get = "pub"]
    matched_classes: Tensor,
    /// `[fg]` float
    #[get = "pub"]
    matched_ious: Tensor,
}

impl Assignment {
    /// The assignment of an image without ground truths.
    pub fn f_empty(num_anchors: i64, device: Device) -> Result<Self> {
        Ok(Self {
            fg_mask: Tensor::f_zeros(&[num_anchors], (Kind::Bool, device))?,
            fg_indexes: Tensor::f_zeros(&[0], (Kind::Int64, device))?,
            matched_gt_indexes: Tensor::f_zeros(&[0], (Kind::Int64, device))?,
            matched_classes: Tensor::f_zeros(&[0], (Kind::Int64, device))?,
            matched_ious: Tensor::f_zeros(&[0], (Kind::Float, device))?,
        })
    }

    pub fn num_fg(&self) -> i64 {
        self.fg_indexes.size1().unwrap()
    }

    pub fn num_anchors(&self) -> i64 {
        self.fg_mask.size1().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct SimOtaAssignerInit {
    pub num_classes: usize,
    pub center_radius: f64,
}

impl SimOtaAssignerInit {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            center_radius: DEFAULT_CENTER_RADIUS,
        }
    }

    pub fn build(self) -> Result<SimOtaAssigner> {
        let Self {
            num_classes,
            center_radius,
        } = self;
        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(
            center_radius.is_finite() && center_radius > 0.0,
            "center_radius must be positive, but get {}",
            center_radius
        );

        Ok(SimOtaAssigner {
            num_classes,
            center_radius,
        })
    }
}

/// The SimOTA label assigner.
#[derive(Debug, Clone)]
pub struct SimOtaAssigner {
    num_classes: usize,
    center_radius: f64,
}

impl SimOtaAssigner {
    /// Assign ground truths to anchors of one image.
    ///
    /// The assignment is first computed on the device of the predictions. If that runs
    /// out of memory, it is computed once more in the constrained context and the result
    /// is moved back.
    pub fn assign(
        &self,
        ground_truth: &GroundTruth,
        prediction: &ImagePrediction,
        anchor_points: &AnchorPointsTensor,
    ) -> Result<Assignment> {
        let device = prediction.device();
        retry_out_of_memory(|context| {
            let assignment = self.assign_in(ground_truth, prediction, anchor_points, context)?;
            Ok(assignment.to_device(device))
        })
    }

    /// Assign ground truths to anchors of one image in the given context.
    ///
    /// The result stays on the device of the context.
    pub fn assign_in(
        &self,
        ground_truth: &GroundTruth,
        prediction: &ImagePrediction,
        anchor_points: &AnchorPointsTensor,
        context: ExecutionContext,
    ) -> Result<Assignment> {
        let num_anchors = prediction.num_anchors();
        ensure!(
            anchor_points.num_anchors() == num_anchors,
            "expect {} anchor points, but get {}",
            num_anchors,
            anchor_points.num_anchors()
        );

        let device = context.device(prediction.device());
        if ground_truth.is_empty() {
            return Assignment::f_empty(num_anchors, device);
        }

        tch::no_grad(|| {
            let ground_truth = ground_truth.to_device(device);
            let prediction = prediction.to_device(device);
            let anchor_points = anchor_points.to_device(device);
            let gt_boxes = ground_truth.boxes().f_to_kind(Kind::Float)?;

            let candidates = f_candidate_anchors(&gt_boxes, &anchor_points, self.center_radius)?;
            let candidate_indexes = candidates.candidate_indexes();

            let candidate_prediction = CandidatePrediction {
                bbox: prediction
                    .bbox
                    .f_index_select(0, candidate_indexes)?
                    .f_detach()?,
                class_logit: prediction
                    .class_logit
                    .f_index_select(0, candidate_indexes)?
                    .f_detach()?,
                obj_logit: prediction
                    .obj_logit
                    .f_index_select(0, candidate_indexes)?
                    .f_detach()?,
            };
            let cost_matrix = f_cost_matrix(
                ground_truth.classes(),
                &gt_boxes,
                &candidate_prediction,
                candidates.in_boxes_and_center(),
                self.num_classes,
            )?;
            let matching = f_dynamic_k_matching(&cost_matrix)?;
            debug!(
                "assigned {} anchors to {} objects out of {} candidates",
                matching.num_fg(),
                ground_truth.num_objects(),
                candidates.num_candidates()
            );

            // map candidates back to all anchors
            let fg_mask = candidates
                .fg_mask()
                .f_masked_scatter(candidates.fg_mask(), matching.fg_mask())?;
            let fg_indexes = candidate_indexes.f_masked_select(matching.fg_mask())?;
            let matched_gt_indexes = matching.matched_gt_indexes().shallow_clone();
            let matched_classes = ground_truth
                .classes()
                .f_index_select(0, &matched_gt_indexes)?;

            Ok(Assignment {
                fg_mask,
                fg_indexes,
                matched_gt_indexes,
                matched_classes,
                matched_ious: matching.matched_ious().shallow_clone(),
            })
        })
    }
}

/// Run the attempt in the default context, and once more in the constrained
/// context if the first attempt runs out of memory.
///
/// Errors other than memory exhaustion are returned without retrying.
pub fn retry_out_of_memory<T, F>(mut attempt: F) -> Result<T>
where
    F: FnMut(ExecutionContext) -> Result<T>,
{
    match attempt(ExecutionContext::Default) {
        Err(err) if is_out_of_memory(&err) => {
            warn!(
                "out of memory in {:?} context, retry in {:?} context: {:#}",
                ExecutionContext::Default,
                ExecutionContext::Constrained,
                err
            );
            attempt(ExecutionContext::Constrained)
        }
        result => result,
    }
}

/// Check whether the error is raised by an exhausted allocator.
pub fn is_out_of_memory(err: &Error) -> bool {
    err.chain()
        .any(|cause| match cause.downcast_ref::<TchError>() {
            Some(TchError::Torch(message)) => message.contains("out of memory"),
            _ => false,
        })
}
