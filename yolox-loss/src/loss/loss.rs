//! Defines loss for training.

use super::{
    assignment::{Assignment, ImagePrediction, SimOtaAssigner, SimOtaAssignerInit},
    ground_truth::split_ground_truths,
    in_boxes::DEFAULT_CENTER_RADIUS,
    reid::{ReidHead, ReidHeadInit},
    target::{f_build_targets, ImageTargets},
};
use crate::{common::*, profiling::Timing};

pub use yolox_loss::*;
pub use yolox_loss_output::*;

/// The weight of the IoU loss in the total loss.
pub const REG_WEIGHT: f64 = 5.0;

mod yolox_loss {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct YoloxLossInit {
        pub num_classes: usize,
        pub strides: Vec<i64>,
        pub reid_dim: Option<usize>,
        pub tracking_id_nums: Option<Vec<usize>>,
        pub use_l1: bool,
        pub iou_loss_kind: IoULossKind,
        pub center_radius: f64,
    }

    impl YoloxLossInit {
        pub fn new(num_classes: usize, strides: Vec<i64>) -> Self {
            Self {
                num_classes,
                strides,
                reid_dim: None,
                tracking_id_nums: None,
                use_l1: false,
                iou_loss_kind: IoULossKind::IoU,
                center_radius: DEFAULT_CENTER_RADIUS,
            }
        }

        pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<YoloxLoss> {
            let path = path.borrow();
            let Self {
                num_classes,
                strides,
                reid_dim,
                tracking_id_nums,
                use_l1,
                iou_loss_kind,
                center_radius,
            } = self;

            ensure!(num_classes > 0, "num_classes must be positive");
            ensure!(!strides.is_empty(), "at least one stride is required");
            ensure!(
                strides.iter().all(|&stride| stride > 0),
                "strides must be positive, but get {:?}",
                strides
            );

            let reid_head = match (reid_dim, tracking_id_nums) {
                (Some(reid_dim), Some(id_nums)) => Some(
                    ReidHeadInit {
                        num_classes,
                        reid_dim,
                        id_nums,
                    }
                    .build(path / "reid")?,
                ),
                (Some(_), None) => {
                    bail!("tracking_id_nums must be provided when reid_dim is set")
                }
                (None, Some(_)) => {
                    warn!("tracking_id_nums is ignored because reid_dim is not set");
                    None
                }
                (None, None) => None,
            };

            let detects: Vec<_> = strides
                .iter()
                .enumerate()
                .map(|(index, &stride)| {
                    Detect2DInit {
                        num_classes,
                        reid_dim,
                        stride,
                    }
                    .build(path / format!("detect_{}", index))
                })
                .try_collect()?;

            let assigner = SimOtaAssignerInit {
                num_classes,
                center_radius,
            }
            .build()?;

            let iou_loss = IoULossInit {
                reduction: Reduction::None,
                kind: iou_loss_kind,
            }
            .build();
            let bce_loss = BceWithLogitsLossInit::default(Reduction::None).build()?;

            Ok(YoloxLoss {
                num_classes,
                use_l1,
                detects,
                merge: MergeDetect2D::new(),
                assigner,
                iou_loss,
                bce_loss,
                l1_loss: L1Loss::new(Reduction::None),
                reid_head,
            })
        }
    }

    #[derive(Debug)]
    pub struct YoloxLoss {
        num_classes: usize,
        use_l1: bool,
        detects: Vec<Detect2D>,
        merge: MergeDetect2D,
        assigner: SimOtaAssigner,
        iou_loss: IoULoss,
        bce_loss: BceWithLogitsLoss,
        l1_loss: L1Loss,
        reid_head: Option<ReidHead>,
    }

    impl YoloxLoss {
        pub fn use_l1(&self) -> bool {
            self.use_l1
        }

        /// Enable or disable the auxiliary L1 loss, usually in the last epochs.
        pub fn set_use_l1(&mut self, use_l1: bool) {
            self.use_l1 = use_l1;
        }

        pub fn num_classes(&self) -> usize {
            self.num_classes
        }

        pub fn reid_dim(&self) -> Option<usize> {
            self.reid_head.as_ref().map(|head| head.reid_dim())
        }

        /// Compute the loss from raw head outputs.
        ///
        /// Each output has shape `[batch, 5 + num_classes (+ reid_dim), height, width]`,
        /// one per stride in order. `targets` is the zero-padded
        /// `[batch, max_objects, 5 or 6]` label tensor.
        pub fn forward(
            &mut self,
            outputs: &[Tensor],
            targets: &Tensor,
        ) -> Result<(YoloxLossOutput, YoloxLossAuxiliary)> {
            ensure!(
                outputs.len() == self.detects.len(),
                "expect {} scales, but get {}",
                self.detects.len(),
                outputs.len()
            );

            let detections: Vec<_> = self
                .detects
                .iter_mut()
                .zip(outputs)
                .map(|(detect, output)| detect.forward(output))
                .try_collect()?;
            let prediction = self.merge.forward(&detections)?;

            self.forward_merged(&prediction, targets)
        }

        /// Compute the loss from decoded predictions of all scales.
        pub fn forward_merged(
            &self,
            prediction: &MergedDenseDetection,
            targets: &Tensor,
        ) -> Result<(YoloxLossOutput, YoloxLossAuxiliary)> {
            let mut timing = Timing::new("yolox_loss");

            let batch_size = prediction.batch_size();
            let num_anchors = prediction.num_anchors();
            let num_classes = self.num_classes as i64;
            let device = prediction.device();
            let use_l1 = self.use_l1;

            ensure!(
                prediction.num_classes() == self.num_classes,
                "expect {} classes, but get {}",
                self.num_classes,
                prediction.num_classes()
            );
            ensure!(
                prediction.reid_dim() == self.reid_dim(),
                "expect reid_dim {:?}, but get {:?}",
                self.reid_dim(),
                prediction.reid_dim()
            );

            let ground_truths = split_ground_truths(targets, self.reid_head.is_some())?
                .into_iter()
                .map(|gt| gt.to_device(device))
                .collect_vec();
            ensure!(
                ground_truths.len() as i64 == batch_size,
                "expect targets of {} images, but get {}",
                batch_size,
                ground_truths.len()
            );
            timing.add_event("split_ground_truths");

            // assign and build targets per image
            let anchor_points = &prediction.anchor_points;
            let (assignments, image_targets): (Vec<Assignment>, Vec<ImageTargets>) =
                itertools::process_results(
                    ground_truths
                        .iter()
                        .enumerate()
                        .map(|(batch_index, gt)| -> Result<_> {
                            let batch_index = batch_index as i64;
                            let image_prediction = ImagePrediction {
                                bbox: prediction.bbox.f_select(0, batch_index)?,
                                class_logit: prediction.class_logit.f_select(0, batch_index)?,
                                obj_logit: prediction.obj_logit.f_select(0, batch_index)?,
                            };
                            let assignment =
                                self.assigner.assign(gt, &image_prediction, anchor_points)?;
                            let targets = f_build_targets(
                                gt,
                                &assignment,
                                anchor_points,
                                self.num_classes,
                                use_l1,
                            )?;
                            Ok((assignment, targets))
                        }),
                    |iter| iter.unzip(),
                )?;
            timing.add_event("assign");

            let num_gts: i64 = ground_truths.iter().map(|gt| gt.num_objects()).sum();
            let num_fg: i64 = assignments
                .iter()
                .map(|assignment| assignment.num_fg())
                .sum();
            let normalizer = num_fg.max(1) as f64;

            // concatenate targets of all images
            let (cls_targets, obj_targets, reg_targets, l1_targets, reid_targets) =
                tch::no_grad(|| -> Result<_> {
                    let cls_targets = Tensor::f_cat(
                        &image_targets.iter().map(|t| &t.cls_target).collect_vec(),
                        0,
                    )?;
                    let obj_targets = Tensor::f_cat(
                        &image_targets.iter().map(|t| &t.obj_target).collect_vec(),
                        0,
                    )?;
                    let reg_targets = Tensor::f_cat(
                        &image_targets.iter().map(|t| &t.reg_target).collect_vec(),
                        0,
                    )?;
                    let l1_targets = if use_l1 {
                        let l1_vec: Vec<_> = image_targets
                            .iter()
                            .map(|t| t.l1_target.as_ref())
                            .collect::<Option<_>>()
                            .ok_or_else(|| format_err!("missing L1 targets"))?;
                        Some(Tensor::f_cat(&l1_vec, 0)?)
                    } else {
                        None
                    };
                    let reid_targets = if self.reid_head.is_some() {
                        let reid_vec: Vec<_> = image_targets
                            .iter()
                            .map(|t| t.reid_target.as_ref())
                            .collect::<Option<_>>()
                            .ok_or_else(|| format_err!("missing tracking id targets"))?;
                        Some(Tensor::f_cat(&reid_vec, 0)?)
                    } else {
                        None
                    };
                    Ok((
                        cls_targets,
                        obj_targets,
                        reg_targets,
                        l1_targets,
                        reid_targets,
                    ))
                })?;
            let fg_indexes = {
                let flat_indexes = assignments
                    .iter()
                    .enumerate()
                    .map(|(batch_index, assignment)| {
                        assignment
                            .fg_indexes()
                            .f_add_scalar(batch_index as i64 * num_anchors)
                    })
                    .try_collect::<_, Vec<_>, _>()?;
                Tensor::f_cat(&flat_indexes, 0)?
            };
            timing.add_event("build_targets");

            // IoU loss
            let pred_bbox = prediction
                .bbox
                .f_reshape(&[-1, 4])?
                .f_index_select(0, &fg_indexes)?;
            let iou_loss = self
                .iou_loss
                .forward(&pred_bbox, &reg_targets.f_to_kind(pred_bbox.kind())?)?
                .f_sum(Kind::Float)?
                .f_div_scalar(normalizer)?;

            // objectness loss over all anchors
            let obj_loss = self
                .bce_loss
                .forward(&prediction.obj_logit.f_reshape(&[-1, 1])?, &obj_targets)?
                .f_sum(Kind::Float)?
                .f_div_scalar(normalizer)?;

            // classification loss over foreground anchors
            let pred_class = prediction
                .class_logit
                .f_reshape(&[-1, num_classes])?
                .f_index_select(0, &fg_indexes)?;
            let cls_loss = self
                .bce_loss
                .forward(&pred_class, &cls_targets)?
                .f_sum(Kind::Float)?
                .f_div_scalar(normalizer)?;
            timing.add_event("iou_obj_cls_loss");

            // auxiliary L1 loss
            let l1_loss = l1_targets
                .map(|l1_targets| -> Result<_> {
                    let pred_raw = prediction
                        .raw_bbox
                        .f_reshape(&[-1, 4])?
                        .f_index_select(0, &fg_indexes)?;
                    let loss = self
                        .l1_loss
                        .forward(&pred_raw, &l1_targets.f_to_kind(pred_raw.kind())?)?
                        .f_sum(Kind::Float)?
                        .f_div_scalar(normalizer)?;
                    Ok(loss)
                })
                .transpose()?;

            // re-identification loss
            let reid_loss = match (&self.reid_head, &prediction.reid_feature, reid_targets) {
                (Some(head), Some(reid_feature), Some(reid_targets)) => {
                    let reid_dim = head.reid_dim() as i64;
                    let features = reid_feature
                        .f_reshape(&[-1, reid_dim])?
                        .f_index_select(0, &fg_indexes)?;
                    let matched_classes = Tensor::f_cat(
                        &assignments
                            .iter()
                            .map(|assignment| assignment.matched_classes())
                            .collect_vec(),
                        0,
                    )?;
                    Some(head.forward(&features, &matched_classes, &reid_targets)?)
                }
                (None, _, _) => None,
                _ => bail!("reid features or tracking ids are missing"),
            };
            timing.add_event("l1_reid_loss");

            // weighted sum
            let total_loss = {
                let mut total_loss = iou_loss
                    .f_mul_scalar(REG_WEIGHT)?
                    .f_add(&obj_loss)?
                    .f_add(&cls_loss)?;
                if let Some(l1_loss) = &l1_loss {
                    total_loss = total_loss.f_add(l1_loss)?;
                }
                if let Some(reid_loss) = &reid_loss {
                    total_loss = total_loss.f_add(reid_loss)?;
                }
                total_loss
            };
            debug_assert!(!bool::from(total_loss.isnan().any()), "NaN detected");

            let fg_ratio = num_fg as f64 / num_gts.max(1) as f64;
            timing.add_event("sum_losses");
            timing.report();

            Ok((
                YoloxLossOutput {
                    total_loss,
                    iou_loss,
                    obj_loss,
                    cls_loss,
                    l1_loss,
                    reid_loss,
                    fg_ratio,
                },
                YoloxLossAuxiliary {
                    assignments,
                    num_gts,
                    num_fg,
                },
            ))
        }
    }

    /// Per-image assignments of a forward pass.
    #[derive(Debug)]
    pub struct YoloxLossAuxiliary {
        pub assignments: Vec<Assignment>,
        pub num_gts: i64,
        pub num_fg: i64,
    }

    impl YoloxLossAuxiliary {
        /// Stack the foreground masks into a `[batch, anchor]` tensor.
        pub fn fg_masks(&self) -> Result<Tensor> {
            let masks = self
                .assignments
                .iter()
                .map(|assignment| assignment.fg_mask())
                .collect_vec();
            Ok(Tensor::f_stack(&masks, 0)?)
        }
    }
}

mod yolox_loss_output {
    use super::*;

    /// The losses of a forward pass, each normalized by the foreground count.
    #[derive(Debug, TensorLike)]
    pub struct YoloxLossOutput {
        pub total_loss: Tensor,
        /// The unweighted IoU loss.
        pub iou_loss: Tensor,
        pub obj_loss: Tensor,
        pub cls_loss: Tensor,
        pub l1_loss: Option<Tensor>,
        pub reid_loss: Option<Tensor>,
        /// Foreground anchors per ground truth object.
        #[tensor_like(copy)]
        pub fg_ratio: f64,
    }

    impl YoloxLossOutput {
        /// Scalar values keyed by name, for logging.
        pub fn named_losses(&self) -> IndexMap<&'static str, f64> {
            let Self {
                total_loss,
                iou_loss,
                obj_loss,
                cls_loss,
                l1_loss,
                reid_loss,
                fg_ratio,
            } = self;

            let mut losses = IndexMap::new();
            losses.insert("loss", f64::from(total_loss));
            losses.insert("conf_loss", f64::from(obj_loss));
            losses.insert("cls_loss", f64::from(cls_loss));
            losses.insert("iou_loss", f64::from(iou_loss));
            if let Some(l1_loss) = l1_loss {
                losses.insert("l1_loss", f64::from(l1_loss));
            }
            if let Some(reid_loss) = reid_loss {
                losses.insert("reid_loss", f64::from(reid_loss));
            }
            losses.insert("fg_ratio", *fg_ratio);
            losses
        }

        pub fn weighted_mean<L>(iter: impl IntoIterator<Item = (L, f64)>) -> Result<Self>
        where
            L: Borrow<YoloxLossOutput>,
        {
            let (
                total_loss_vec,
                iou_loss_vec,
                obj_loss_vec,
                cls_loss_vec,
                l1_loss_vec,
                reid_loss_vec,
                weighted_fg_ratio_vec,
            ) = iter
                .into_iter()
                .map(|(loss, weight)| {
                    let YoloxLossOutput {
                        total_loss,
                        iou_loss,
                        obj_loss,
                        cls_loss,
                        l1_loss,
                        reid_loss,
                        fg_ratio,
                    } = loss.borrow().shallow_clone();

                    (
                        (total_loss, weight),
                        (iou_loss, weight),
                        (obj_loss, weight),
                        (cls_loss, weight),
                        l1_loss.map(|loss| (loss, weight)),
                        reid_loss.map(|loss| (loss, weight)),
                        (fg_ratio * weight, weight),
                    )
                })
                .unzip_n_vec();

            let optional_mean = |pairs: Vec<Option<(Tensor, f64)>>| -> Result<Option<Tensor>> {
                let num_pairs = pairs.len();
                let pairs: Vec<_> = pairs.into_iter().flatten().collect();
                match pairs.len() {
                    0 => Ok(None),
                    len if len == num_pairs => Ok(Some(Tensor::f_weighted_mean_tensors(pairs)?)),
                    _ => bail!("optional losses must be present in all or none of the outputs"),
                }
            };

            let total_weight: f64 = weighted_fg_ratio_vec.iter().map(|(_, weight)| weight).sum();
            ensure!(total_weight > 0.0, "the sum of weights must be positive");
            let fg_ratio = weighted_fg_ratio_vec
                .iter()
                .map(|(weighted, _)| weighted)
                .sum::<f64>()
                / total_weight;

            Ok(YoloxLossOutput {
                total_loss: Tensor::f_weighted_mean_tensors(total_loss_vec)?,
                iou_loss: Tensor::f_weighted_mean_tensors(iou_loss_vec)?,
                obj_loss: Tensor::f_weighted_mean_tensors(obj_loss_vec)?,
                cls_loss: Tensor::f_weighted_mean_tensors(cls_loss_vec)?,
                l1_loss: optional_mean(l1_loss_vec)?,
                reid_loss: optional_mean(reid_loss_vec)?,
                fg_ratio,
            })
        }
    }
}
