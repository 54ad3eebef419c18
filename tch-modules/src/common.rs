pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use itertools::Itertools;
pub use log::info;
pub use serde::{Deserialize, Serialize};
pub use std::borrow::Borrow;
pub use strum::AsRefStr;
pub use tch::{nn, Device, IndexOp, Kind, Reduction, Tensor};
pub use tch_goodies::{
    CxCyWHTensor, DenseDetectionTensor, DenseDetectionTensorUnchecked, MergedDenseDetection,
    TensorExt,
};
pub use tch_tensor_like::TensorLike;
