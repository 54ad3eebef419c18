use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
pub enum IoULossKind {
    /// `1 - iou²`
    IoU,
    /// `1 - giou`
    GIoU,
}

impl Default for IoULossKind {
    fn default() -> Self {
        Self::IoU
    }
}

#[derive(Debug, Clone)]
pub struct IoULossInit {
    pub reduction: Reduction,
    pub kind: IoULossKind,
}

impl Default for IoULossInit {
    fn default() -> Self {
        Self {
            reduction: Reduction::None,
            kind: IoULossKind::IoU,
        }
    }
}

impl IoULossInit {
    pub fn build(self) -> IoULoss {
        let Self { reduction, kind } = self;
        IoULoss { reduction, kind }
    }
}

/// Box regression loss over paired `(cx, cy, w, h)` boxes.
#[derive(Debug)]
pub struct IoULoss {
    reduction: Reduction,
    kind: IoULossKind,
}

impl IoULoss {
    pub fn kind(&self) -> IoULossKind {
        self.kind
    }

    /// Compute the loss of `[num, 4]` predicted boxes against `[num, 4]` target boxes.
    ///
    /// The unreduced output has shape `[num]`.
    pub fn forward(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        ensure!(
            pred.size() == target.size(),
            "prediction and target shape mismatch, {:?} vs {:?}",
            pred.size(),
            target.size()
        );

        if pred.is_empty() && self.reduction == Reduction::Mean {
            return Ok(Tensor::zeros(&[], (Kind::Float, pred.device())).set_requires_grad(false));
        }

        let pred = CxCyWHTensor::from_cxcywh(pred)?;
        let target = CxCyWHTensor::from_cxcywh(target)?;

        let loss = match self.kind {
            IoULossKind::IoU => {
                let iou = pred.f_iou_with(&target)?;
                iou.f_square()?.f_neg()?.f_add_scalar(1.0)?
            }
            IoULossKind::GIoU => {
                let giou = pred.f_giou_with(&target)?;
                giou.f_neg()?.f_add_scalar(1.0)?
            }
        }
        .f_view([-1])?;

        let loss = match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.f_sum(Kind::Float)?,
            Reduction::Mean => loss.f_mean(Kind::Float)?,
            Reduction::Other(_) => bail!("unsupported reduction"),
        };
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_loss_of_matched_and_shifted_boxes() -> Result<()> {
        let pred = Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 10.0, 10.0, 4.0, 4.0]).view([2, 4]);
        let target = Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 12.0, 10.0, 4.0, 4.0]).view([2, 4]);

        let loss = IoULossInit::default().build().forward(&pred, &target)?;
        let values: Vec<f32> = Vec::from(&loss);
        ensure!(values.len() == 2);

        // shifted by half width, iou = 8 / 24
        let iou = 8.0 / 24.0;
        assert_abs_diff_eq!(values[0], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(values[1], 1.0 - iou * iou, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn giou_loss_penalizes_distant_boxes() -> Result<()> {
        let loss_fn = IoULossInit {
            reduction: Reduction::None,
            kind: IoULossKind::GIoU,
        }
        .build();

        let pred = Tensor::of_slice(&[0f32, 0.0, 2.0, 2.0, 0.0, 0.0, 2.0, 2.0]).view([2, 4]);
        let target = Tensor::of_slice(&[4f32, 0.0, 2.0, 2.0, 10.0, 0.0, 2.0, 2.0]).view([2, 4]);
        let values: Vec<f32> = Vec::from(&loss_fn.forward(&pred, &target)?);

        // both pairs are disjoint, the farther one has the larger loss
        ensure!(values[0] > 1.0 && values[1] > values[0] && values[1] <= 2.0);
        Ok(())
    }

    #[test]
    fn iou_loss_reductions() -> Result<()> {
        let pred = Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 0.0, 0.0, 1.0, 1.0]).view([2, 4]);
        let target = Tensor::of_slice(&[10f32, 10.0, 4.0, 4.0, 50.0, 50.0, 1.0, 1.0]).view([2, 4]);

        let sum = f64::from(
            IoULossInit {
                reduction: Reduction::Sum,
                kind: IoULossKind::IoU,
            }
            .build()
            .forward(&pred, &target)?,
        );
        let mean = f64::from(
            IoULossInit {
                reduction: Reduction::Mean,
                kind: IoULossKind::IoU,
            }
            .build()
            .forward(&pred, &target)?,
        );
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(mean, 0.5, epsilon = 1e-5);

        let empty = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        let loss = IoULossInit {
            reduction: Reduction::Mean,
            kind: IoULossKind::IoU,
        }
        .build()
        .forward(&empty, &empty)?;
        ensure!(f64::from(loss) == 0.0);
        Ok(())
    }
}
