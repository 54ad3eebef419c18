use super::AnchorPointsTensor;
use crate::common::*;

/// The decoded output of one feature scale.
///
/// Anchors are laid out row-major over the feature map, so the anchor at
/// grid position `(x, y)` has index `y * width + x`.
#[derive(Debug, TensorLike)]
pub struct DenseDetectionTensor {
    inner: DenseDetectionTensorUnchecked,
}

#[derive(Debug, TensorLike)]
pub struct DenseDetectionTensorUnchecked {
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
    /// Grid coordinates `(x, y)` of each anchor, `[anchor, 2]`.
    pub grid: Tensor,
    #[tensor_like(copy)]
    pub stride: i64,
    #[tensor_like(copy)]
    pub height: i64,
    #[tensor_like(copy)]
    pub width: i64,
}

impl DenseDetectionTensor {
    pub fn batch_size(&self) -> i64 {
        let (batch_size, _, _) = self.inner.bbox.size3().unwrap();
        batch_size
    }

    pub fn num_anchors(&self) -> i64 {
        self.inner.height * self.inner.width
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

    /// Per-anchor grid coordinates and stride of this scale.
    pub fn anchor_points(&self) -> Result<AnchorPointsTensor> {
        let DenseDetectionTensorUnchecked {
            grid,
            stride,
            ..
        } = &self.inner;
        let grid = grid.f_to_kind(Kind::Float)?;
        let num_anchors = self.num_anchors();

        Ok(AnchorPointsTensor {
            grid_x: grid.f_select(1, 0)?,
            grid_y: grid.f_select(1, 1)?,
            strides: Tensor::f_full(
                &[num_anchors],
                *stride as f64,
                (Kind::Float, grid.device()),
            )?,
        })
    }
}

impl TryFrom<DenseDetectionTensorUnchecked> for DenseDetectionTensor {
    type Error = Error;

    fn try_from(from: DenseDetectionTensorUnchecked) -> Result<Self, Self::Error> {
        let DenseDetectionTensorUnchecked {
            ref bbox,
            ref raw_bbox,
            ref obj_logit,
            ref class_logit,
            ref reid_feature,
            ref grid,
            stride,
            height,
            width,
        } = from;

        ensure!(stride > 0, "stride must be positive, but get {}", stride);
        ensure!(
            height > 0 && width > 0,
            "invalid feature size {}x{}",
            height,
            width
        );

        let num_anchors = height * width;
        let (batch_size, bbox_anchors, bbox_entries) = bbox.size3()?;
        ensure!(
            bbox_anchors == num_anchors && bbox_entries == 4,
            "expect bbox shape [{}, {}, 4], but get {:?}",
            batch_size,
            num_anchors,
            bbox.size()
        );
        ensure!(raw_bbox.size() == bbox.size(), "raw_bbox shape mismatch");
        ensure!(
            obj_logit.size3()? == (batch_size, num_anchors, 1),
            "obj_logit shape mismatch"
        );

        let (class_batch, class_anchors, _num_classes) = class_logit.size3()?;
        ensure!(
            class_batch == batch_size && class_anchors == num_anchors,
            "class_logit shape mismatch"
        );

        if let Some(feature) = reid_feature {
            let (feature_batch, feature_anchors, _reid_dim) = feature.size3()?;
            ensure!(
                feature_batch == batch_size && feature_anchors == num_anchors,
                "reid_feature shape mismatch"
            );
        }

        ensure!(
            grid.size2()? == (num_anchors, 2),
            "expect grid shape [{}, 2], but get {:?}",
            num_anchors,
            grid.size()
        );

        let devices: HashSet<_> = [bbox, raw_bbox, obj_logit, class_logit, grid]
            .into_iter()
            .chain(reid_feature.as_ref())
            .map(|tensor| tensor.device())
            .collect();
        ensure!(devices.len() == 1, "device mismatch");

        Ok(Self { inner: from })
    }
}

impl From<DenseDetectionTensor> for DenseDetectionTensorUnchecked {
    fn from(from: DenseDetectionTensor) -> Self {
        from.inner
    }
}

impl Deref for DenseDetectionTensor {
    type Target = DenseDetectionTensorUnchecked;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
