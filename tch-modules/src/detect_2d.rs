use crate::common::*;

#[derive(Debug, Clone)]
pub struct Detect2DInit {
    pub num_classes: usize,
    pub reid_dim: Option<usize>,
    pub stride: i64,
}

impl Detect2DInit {
    pub fn build<'p, P>(self, path: P) -> Result<Detect2D>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let device = path.device();

        let Self {
            num_classes,
            reid_dim,
            stride,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(stride > 0, "stride must be positive, but get {}", stride);
        ensure!(
            reid_dim.map(|dim| dim > 0).unwrap_or(true),
            "reid_dim must be positive if set"
        );

        Ok(Detect2D {
            num_classes,
            reid_dim,
            stride,
            device,
            cache: None,
        })
    }
}

/// Decodes one scale of raw head outputs into pixel-space predictions.
///
/// The input has shape `[batch, 5 + num_classes (+ reid_dim), height, width]`
/// where the channels are 4 box offsets, 1 objectness logit, class logits and
/// the optional embedding in this order.
#[derive(Debug)]
pub struct Detect2D {
    num_classes: usize,
    reid_dim: Option<usize>,
    stride: i64,
    device: Device,
    cache: Option<Cache>,
}

impl Detect2D {
    pub fn forward(&mut self, tensor: &Tensor) -> Result<DenseDetectionTensor> {
        let Self {
            num_classes,
            reid_dim,
            stride,
            ..
        } = *self;
        let (batch_size, channels, feature_h, feature_w) = tensor.size4()?;
        let num_classes = num_classes as i64;
        let num_entries = 5 + num_classes + reid_dim.unwrap_or(0) as i64;
        ensure!(
            channels == num_entries,
            "expect {} channels, but get {}",
            num_entries,
            channels
        );

        // load cached data
        let Cache { grid, .. } = self.cache(tensor)?.shallow_clone();

        // convert shape to [batch_size, height * width, n_entries]
        let outputs = tensor
            .f_permute(&[0, 2, 3, 1])?
            .f_reshape(&[batch_size, feature_h * feature_w, num_entries])?;

        let raw_bbox = outputs.f_narrow(2, 0, 4)?;
        let obj_logit = outputs.f_narrow(2, 4, 1)?;
        let class_logit = outputs.f_narrow(2, 5, num_classes)?;
        let reid_feature = reid_dim
            .map(|dim| outputs.f_narrow(2, 5 + num_classes, dim as i64))
            .transpose()?;

        // positions and sizes in pixel units
        let grid_xy = grid.f_to_kind(outputs.kind())?.f_unsqueeze(0)?;
        let xy = raw_bbox
            .f_narrow(2, 0, 2)?
            .f_add(&grid_xy)?
            .f_mul_scalar(stride as f64)?;
        let wh = raw_bbox
            .f_narrow(2, 2, 2)?
            .f_exp()?
            .f_mul_scalar(stride as f64)?;
        let bbox = Tensor::f_cat(&[xy, wh], 2)?;

        DenseDetectionTensorUnchecked {
            bbox,
            raw_bbox,
            obj_logit,
            class_logit,
            reid_feature,
            grid,
            stride,
            height: feature_h,
            width: feature_w,
        }
        .try_into()
    }

    pub fn stride(&self) -> i64 {
        self.stride
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn reid_dim(&self) -> Option<usize> {
        self.reid_dim
    }

    fn cache(&mut self, tensor: &Tensor) -> Result<&Cache> {
        tch::no_grad(move || -> Result<_> {
            let Self {
                stride,
                ref mut device,
                ref mut cache,
                ..
            } = *self;

            let (_b, _c, feature_h, feature_w) = tensor.size4()?;
            *device = tensor.device();

            let is_hit = cache
                .as_ref()
                .map(|cache| {
                    cache.height == feature_h && cache.width == feature_w && cache.device == *device
                })
                .unwrap_or(false);

            if !is_hit {
                info!(
                    "build grid for Detect2D, stride {}, feature size {}x{}",
                    stride, feature_h, feature_w
                );

                let ys = Tensor::f_arange(feature_h, (Kind::Int64, *device))?
                    .f_view([feature_h, 1])?
                    .f_expand(&[feature_h, feature_w], false)?;
                let xs = Tensor::f_arange(feature_w, (Kind::Int64, *device))?
                    .f_view([1, feature_w])?
                    .f_expand(&[feature_h, feature_w], false)?;

                // (x, y) pairs in row-major order
                let grid = Tensor::f_stack(&[xs.f_reshape(&[-1])?, ys.f_reshape(&[-1])?], 1)?
                    .set_requires_grad(false);

                *cache = Some(Cache {
                    height: feature_h,
                    width: feature_w,
                    device: *device,
                    grid,
                });
            }

            let cache = cache
                .as_ref()
                .ok_or_else(|| format_err!("grid cache is not initialized"))?;
            Ok(cache)
        })
    }
}

#[derive(Debug, TensorLike)]
struct Cache {
    #[tensor_like(copy)]
    height: i64,
    #[tensor_like(copy)]
    width: i64,
    #[tensor_like(copy)]
    device: Device,
    grid: Tensor,
}
