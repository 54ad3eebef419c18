use crate::common::*;

/// Per-anchor stride and grid coordinates.
///
/// Each tensor has shape `[anchor]` in float kind.
#[derive(Debug, TensorLike, Getters)]
pub struct AnchorPointsTensor {
    #[get = "pub"]
    pub(crate) grid_x: Tensor,
    #[get = "pub"]
    pub(crate) grid_y: Tensor,
    #[get = "pub"]
    pub(crate) strides: Tensor,
}

#[derive(Debug, TensorLike)]
pub struct AnchorPointsTensorUnchecked {
    pub grid_x: Tensor,
    pub grid_y: Tensor,
    pub strides: Tensor,
}

impl AnchorPointsTensor {
    pub fn num_anchors(&self) -> i64 {
        self.grid_x.size1().unwrap()
    }

    pub fn device(&self) -> Device {
        self.grid_x.device()
    }

    /// Anchor centers in pixel units, `(grid + 0.5) * stride`.
    pub fn f_centers(&self) -> Result<(Tensor, Tensor)> {
        let Self {
            grid_x,
            grid_y,
            strides,
        } = self;
        let center_x = grid_x.f_add_scalar(0.5)?.f_mul(strides)?;
        let center_y = grid_y.f_add_scalar(0.5)?.f_mul(strides)?;
        Ok((center_x, center_y))
    }

    pub fn index_select(&self, indexes: &Tensor) -> Self {
        let Self {
            grid_x,
            grid_y,
            strides,
        } = self;
        Self {
            grid_x: grid_x.index_select(0, indexes),
            grid_y: grid_y.index_select(0, indexes),
            strides: strides.index_select(0, indexes),
        }
    }

    pub fn cat<T>(iter: impl IntoIterator<Item = T>) -> Result<Self>
    where
        T: Borrow<Self>,
    {
        let (grid_x_vec, grid_y_vec, strides_vec) = iter
            .into_iter()
            .map(|points| {
                let Self {
                    grid_x,
                    grid_y,
                    strides,
                } = points.borrow().shallow_clone();
                (grid_x, grid_y, strides)
            })
            .unzip_n_vec();
        ensure!(!grid_x_vec.is_empty(), "the input iterator must not be empty");

        Ok(Self {
            grid_x: Tensor::f_cat(&grid_x_vec, 0)?,
            grid_y: Tensor::f_cat(&grid_y_vec, 0)?,
            strides: Tensor::f_cat(&strides_vec, 0)?,
        })
    }
}

impl TryFrom<AnchorPointsTensorUnchecked> for AnchorPointsTensor {
    type Error = Error;

    fn try_from(from: AnchorPointsTensorUnchecked) -> Result<Self, Self::Error> {
        let AnchorPointsTensorUnchecked {
            grid_x,
            grid_y,
            strides,
        } = from;

        let num_anchors = grid_x.size1()?;
        ensure!(
            grid_y.size1()? == num_anchors && strides.size1()? == num_anchors,
            "size mismatch"
        );
        ensure!(
            hashset! {
                grid_x.device(),
                grid_y.device(),
                strides.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );
        ensure!(
            bool::from(strides.gt(0.0).all()),
            "strides must be positive"
        );

        Ok(Self {
            grid_x,
            grid_y,
            strides,
        })
    }
}

impl From<AnchorPointsTensor> for AnchorPointsTensorUnchecked {
    fn from(from: AnchorPointsTensor) -> Self {
        let AnchorPointsTensor {
            grid_x,
            grid_y,
            strides,
        } = from;
        Self {
            grid_x,
            grid_y,
            strides,
        }
    }
}
