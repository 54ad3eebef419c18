pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use getset::Getters;
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    convert::{TryFrom, TryInto},
    iter,
    time::{Duration, Instant},
};
pub use tch::{nn, Device, IndexOp, Kind, Reduction, TchError, Tensor};
pub use tch_goodies::{
    AnchorPointsTensor, CxCyWHTensor, DenseDetectionTensor, MergedDenseDetection, TensorExt as _,
};
pub use tch_modules::{
    BceWithLogitsLoss, BceWithLogitsLossInit, CrossEntropyLoss, Detect2D, Detect2DInit, IoULoss,
    IoULossInit, IoULossKind, L1Loss, MergeDetect2D,
};
pub use tch_tensor_like::TensorLike;

#[cfg(feature = "profiling")]
pub use lazy_static::lazy_static;

unzip_n::unzip_n!(pub 2);
unzip_n::unzip_n!(pub 3);
unzip_n::unzip_n!(pub 4);
unzip_n::unzip_n!(pub 7);
