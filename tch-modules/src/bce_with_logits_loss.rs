use crate::common::*;

#[derive(Debug, Clone)]
pub struct BceWithLogitsLossInit {
    pub reduction: Reduction,
}

impl BceWithLogitsLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn build(self) -> Result<BceWithLogitsLoss> {
        let Self { reduction } = self;

        if let Reduction::Other(_) = reduction {
            bail!("unsupported reduction");
        }

        Ok(BceWithLogitsLoss { reduction })
    }
}

/// Binary cross entropy on logits against soft targets in `[0, 1]`.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        ensure!(
            input.size() == target.size(),
            "input and target shape mismatch, {:?} vs {:?}",
            input.size(),
            target.size()
        );
        debug_assert!(
            bool::from(target.ge(0.0).logical_and(&target.le(1.0)).all()),
            "target values must be in range of [0.0, 1.0]"
        );

        // the mean of nothing is zero
        if input.is_empty() && self.reduction == Reduction::Mean {
            return Ok(Tensor::f_zeros(&[], (Kind::Float, input.device()))?);
        }

        let loss = input.f_binary_cross_entropy_with_logits(
            target,
            None::<&Tensor>,
            None::<&Tensor>,
            self.reduction,
        )?;
        Ok(loss)
    }
}
