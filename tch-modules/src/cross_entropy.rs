use crate::common::*;

/// Softmax cross entropy over sparse class targets.
///
/// Targets equal to the ignore index contribute nothing, and the mean
/// reduction averages over the remaining targets only.
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
    ignore_index: Option<i64>,
}

impl CrossEntropyLoss {
    pub fn new(ignore_index: Option<i64>, reduction: Reduction) -> Self {
        Self {
            reduction,
            ignore_index,
        }
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        // assume [batch_size, n_classes] input shape
        let (batch_size, num_classes) = input.size2()?;
        ensure!(
            target.kind() == Kind::Int64 && target.size1()? == batch_size,
            "expect target a [{}] int64 tensor",
            batch_size
        );
        debug_assert!(
            {
                let valid = match self.ignore_index {
                    Some(ignore) => target.ne(ignore),
                    None => target.ones_like().to_kind(Kind::Bool),
                };
                let in_range = target.ge(0).logical_and(&target.lt(num_classes));
                bool::from(in_range.logical_or(&valid.logical_not()).all())
            },
            "target values must be in range of [0, {})",
            num_classes
        );

        let device = input.device();

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.is_empty() && self.reduction == Reduction::Mean {
            return Ok(Tensor::zeros(&[], (Kind::Float, device)).set_requires_grad(false));
        }

        // a negative ignore index never matches a valid class
        let ignore_index = self.ignore_index.unwrap_or(-100);
        let loss = input.f_log_softmax(1, Kind::Float)?.f_nll_loss(
            target,
            None::<Tensor>,
            Reduction::None,
            ignore_index,
        )?;

        let loss = match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.f_sum(Kind::Float)?,
            Reduction::Mean => {
                let num_valid = match self.ignore_index {
                    Some(ignore) => i64::from(target.f_ne(ignore)?.f_sum(Kind::Int64)?),
                    None => batch_size,
                };
                loss.f_sum(Kind::Float)?
                    .f_div_scalar(num_valid.max(1) as f64)?
            }
            Reduction::Other(_) => bail!("unsupported reduction"),
        };

        Ok(loss)
    }
}
