use super::{AnchorPointsTensor, DenseDetectionTensor, DenseDetectionTensorUnchecked};
use crate::common::*;
use std::ops::Range;

/// Dense predictions of all scales concatenated along the anchor dimension.
#[derive(Debug, TensorLike)]
pub struct MergedDenseDetection {
    inner: MergedDenseDetectionUnchecked,
}

#[derive(Debug, TensorLike)]
pub struct MergedDenseDetectionUnchecked {
    /// Decoded boxes in pixel units, `[batch, anchor, 4]` as `(cx, cy, w, h)`.
    pub bbox: Tensor,
    /// Box regression before decoding, `[batch, anchor, 4]`.
    pub raw_bbox: Tensor,
    /// `[batch, anchor, 1]`
    pub obj_logit: Tensor,
    /// `[batch, anchor, class]`
    pub class_logit: Tensor,
    /// `[batch, anchor, reid_dim]`
    pub reid_feature: Option<Tensor>,
    pub anchor_points: AnchorPointsTensor,
    #[tensor_like(clone)]
    pub info: Vec<DetectionInfo>,
}

/// The shape of one merged scale and its slice of the anchor dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionInfo {
    pub stride: i64,
    pub height: i64,
    pub width: i64,
    pub flat_index_range: Range<i64>,
}

/// The position of an anchor in the per-scale layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorIndex {
    pub layer_index: usize,
    pub grid_x: i64,
    pub grid_y: i64,
}

impl MergedDenseDetection {
    pub fn from_detection_tensors(
        tensors: impl IntoIterator<Item = impl Borrow<DenseDetectionTensor>>,
    ) -> Result<Self> {
        let tensors: Vec<_> = tensors.into_iter().collect();
        ensure!(!tensors.is_empty(), "at least one detection tensor is required");

        // ensure consistent sizes
        let (batch_size_set, num_classes_set, reid_dim_set): (
            HashSet<i64>,
            HashSet<usize>,
            HashSet<Option<usize>>,
        ) = tensors
            .iter()
            .map(|tensor| {
                let tensor = tensor.borrow();
                (tensor.batch_size(), tensor.num_classes(), tensor.reid_dim())
            })
            .unzip_n();
        ensure!(batch_size_set.len() == 1, "batch sizes of scales differ");
        ensure!(num_classes_set.len() == 1, "class counts of scales differ");
        ensure!(reid_dim_set.len() == 1, "reid feature dims of scales differ");
        let has_reid = reid_dim_set.into_iter().next().unwrap().is_some();

        // merge detections
        let (bbox_vec, raw_vec, obj_vec, class_vec, reid_vec, points_vec, info): (
            Vec<_>,
            Vec<_>,
            Vec<_>,
            Vec<_>,
            Vec<_>,
            Vec<_>,
            Vec<_>,
        ) = tensors
            .iter()
            .scan(0, |base_flat_index, detection| {
                let detection = detection.borrow();
                let DenseDetectionTensorUnchecked {
                    bbox,
                    raw_bbox,
                    obj_logit,
                    class_logit,
                    reid_feature,
                    stride,
                    height,
                    width,
                    ..
                } = &**detection;

                let info = {
                    let begin_flat_index = *base_flat_index;
                    *base_flat_index += detection.num_anchors();
                    let end_flat_index = *base_flat_index;

                    DetectionInfo {
                        stride: *stride,
                        height: *height,
                        width: *width,
                        flat_index_range: begin_flat_index..end_flat_index,
                    }
                };

                Some((
                    bbox.shallow_clone(),
                    raw_bbox.shallow_clone(),
                    obj_logit.shallow_clone(),
                    class_logit.shallow_clone(),
                    reid_feature.as_ref().map(|feature| feature.shallow_clone()),
                    detection.anchor_points(),
                    info,
                ))
            })
            .unzip_n();

        let points_vec: Vec<_> = points_vec.into_iter().try_collect()?;
        let reid_feature = if has_reid {
            let reid_vec: Vec<_> = reid_vec.into_iter().flatten().collect();
            Some(Tensor::f_cat(&reid_vec, 1)?)
        } else {
            None
        };

        Ok(Self {
            inner: MergedDenseDetectionUnchecked {
                bbox: Tensor::f_cat(&bbox_vec, 1)?,
                raw_bbox: Tensor::f_cat(&raw_vec, 1)?,
                obj_logit: Tensor::f_cat(&obj_vec, 1)?,
                class_logit: Tensor::f_cat(&class_vec, 1)?,
                reid_feature,
                anchor_points: AnchorPointsTensor::cat(points_vec)?,
                info,
            },
        })
    }

    pub fn batch_size(&self) -> i64 {
        let (batch_size, _, _) = self.inner.bbox.size3().unwrap();
        batch_size
    }

    pub fn num_anchors(&self) -> i64 {
        let (_, num_anchors, _) = self.inner.bbox.size3().unwrap();
        num_anchors
    }

    pub fn num_classes(&self) -> usize {
        let (_, _, num_classes) = self.inner.class_logit.size3().unwrap();
        num_classes as usize
    }

    pub fn reid_dim(&self) -> Option<usize> {
        self.inner.reid_feature.as_ref().map(|feature| {
            let (_, _, reid_dim) = feature.size3().unwrap();
            reid_dim as usize
        })
    }

    pub fn device(&self) -> Device {
        self.inner.bbox.device()
    }

    pub fn flat_to_anchor_index(&self, flat_index: i64) -> Option<AnchorIndex> {
        let (layer_index, info) = self
            .inner
            .info
            .iter()
            .enumerate()
            .find(|(_, info)| info.flat_index_range.contains(&flat_index))?;
        let offset = flat_index - info.flat_index_range.start;

        Some(AnchorIndex {
            layer_index,
            grid_x: offset % info.width,
            grid_y: offset / info.width,
        })
    }

    pub fn anchor_to_flat_index(&self, index: &AnchorIndex) -> Option<i64> {
        let AnchorIndex {
            layer_index,
            grid_x,
            grid_y,
        } = *index;
        let info = self.inner.info.get(layer_index)?;

        if !(0..info.width).contains(&grid_x) || !(0..info.height).contains(&grid_y) {
            return None;
        }

        Some(info.flat_index_range.start + grid_y * info.width + grid_x)
    }
}

impl TryFrom<MergedDenseDetectionUnchecked> for MergedDenseDetection {
    type Error = Error;

    fn try_from(from: MergedDenseDetectionUnchecked) -> Result<Self, Self::Error> {
        let MergedDenseDetectionUnchecked {
            ref bbox,
            ref raw_bbox,
            ref obj_logit,
            ref class_logit,
            ref reid_feature,
            ref anchor_points,
            ref info,
        } = from;

        let (batch_size, num_anchors, entries) = bbox.size3()?;
        ensure!(entries == 4, "expect 4 box parameters, but get {}", entries);
        ensure!(raw_bbox.size() == bbox.size(), "raw_bbox shape mismatch");
        ensure!(
            obj_logit.size3()? == (batch_size, num_anchors, 1),
            "obj_logit shape mismatch"
        );
        let (class_batch, class_anchors, _) = class_logit.size3()?;
        ensure!(
            class_batch == batch_size && class_anchors == num_anchors,
            "class_logit shape mismatch"
        );
        if let Some(feature) = reid_feature {
            let (feature_batch, feature_anchors, _) = feature.size3()?;
            ensure!(
                feature_batch == batch_size && feature_anchors == num_anchors,
                "reid_feature shape mismatch"
            );
        }
        ensure!(
            anchor_points.num_anchors() == num_anchors,
            "anchor point count mismatch"
        );
        ensure!(
            info.iter()
                .map(|info| info.flat_index_range.end - info.flat_index_range.start)
                .sum::<i64>()
                == num_anchors,
            "scale info does not cover all anchors"
        );

        Ok(Self { inner: from })
    }
}

impl From<MergedDenseDetection> for MergedDenseDetectionUnchecked {
    fn from(from: MergedDenseDetection) -> Self {
        from.inner
    }
}

impl Deref for MergedDenseDetection {
    type Target = MergedDenseDetectionUnchecked;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
