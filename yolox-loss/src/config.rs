use crate::{common::*, loss::YoloxLossInit};

/// The loss function configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The number of object classes.
    pub num_classes: usize,
    /// The strides of prediction scales, in the same order as the head outputs.
    pub strides: Vec<i64>,
    /// The dimension of identity embeddings. Zero or absent disables the re-identification loss.
    #[serde(default)]
    pub reid_dim: Option<usize>,
    /// The number of tracking ids per class.
    #[serde(default)]
    pub tracking_id_nums: Option<Vec<usize>>,
    /// Enable the auxiliary L1 regression loss.
    #[serde(default)]
    pub use_l1: bool,
    /// The choice of box regression loss.
    #[serde(default)]
    pub iou_loss_kind: IoULossKind,
    /// The radius of center sampling region in stride units.
    #[serde(default)]
    pub center_radius: Option<R64>,
}

impl Config {
    pub fn yolox_loss_init(&self) -> YoloxLossInit {
        let Self {
            num_classes,
            ref strides,
            reid_dim,
            ref tracking_id_nums,
            use_l1,
            iou_loss_kind,
            center_radius,
        } = *self;

        let mut init = YoloxLossInit {
            reid_dim: reid_dim.filter(|&dim| dim > 0),
            tracking_id_nums: tracking_id_nums.clone(),
            use_l1,
            iou_loss_kind,
            ..YoloxLossInit::new(num_classes, strides.clone())
        };

        if let Some(center_radius) = center_radius {
            init.center_radius = center_radius.raw();
        }

        init
    }
}
