use crate::common::*;

#[derive(Debug)]
pub struct L1Loss {
    reduction: Reduction,
}

impl L1Loss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        ensure!(
            input.size() == target.size(),
            "input and target shape mismatch, {:?} vs {:?}",
            input.size(),
            target.size()
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.is_empty() && self.reduction == Reduction::Mean {
            return Ok(Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false));
        }

        let loss = input.f_sub(target)?.f_abs()?;

        let loss = match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.f_sum(Kind::Float)?,
            Reduction::Mean => loss.f_mean(Kind::Float)?,
            Reduction::Other(_) => bail!("unsupported reduction"),
        };
        Ok(loss)
    }
}
