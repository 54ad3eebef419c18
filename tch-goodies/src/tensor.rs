use crate::common::*;

pub trait TensorExt {
    fn is_empty(&self) -> bool;

    /// Convert a 1-D boolean mask to the int64 indexes of its true entries.
    fn f_mask_to_indexes(&self) -> Result<Tensor>;

    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let mut iter = tensors.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| format_err!("the input iterator must not be empty"))?
            .borrow()
            .shallow_clone();
        let sum = iter.try_fold(first, |lhs, rhs| lhs.f_add(rhs.borrow()))?;
        Ok(sum)
    }

    fn f_weighted_mean_tensors<T>(pairs: impl IntoIterator<Item = (T, f64)>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let weighted_pairs: Vec<_> = pairs
            .into_iter()
            .map(|(tensor, weight)| Fallible::Ok((tensor.borrow().f_mul_scalar(weight)?, weight)))
            .try_collect()?;
        let (tensors, weights) = weighted_pairs.into_iter().unzip_n_vec();
        let sum_tensors = Self::f_sum_tensors(tensors)?;
        let sum_weights: f64 = weights.iter().cloned().sum();
        ensure!(sum_weights > 0.0, "the sum of weights must be positive");
        let mean_tensors = sum_tensors.f_div_scalar(sum_weights)?;
        Ok(mean_tensors)
    }
}

impl TensorExt for Tensor {
    fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    fn f_mask_to_indexes(&self) -> Result<Tensor> {
        ensure!(
            self.kind() == Kind::Bool && self.dim() == 1,
            "expect a 1-D bool tensor, but get {:?} with shape {:?}",
            self.kind(),
            self.size()
        );
        let indexes = self.f_nonzero()?.f_view([-1])?;
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_to_indexes_test() -> Result<()> {
        let mask = Tensor::of_slice(&[false, true, true, false, true]);
        let indexes: Vec<i64> = Vec::from(&mask.f_mask_to_indexes()?);
        ensure!(indexes == vec![1, 2, 4]);

        let empty = Tensor::of_slice(&[false, false]).f_mask_to_indexes()?;
        ensure!(empty.is_empty());

        let not_bool = Tensor::of_slice(&[0i64, 1]);
        ensure!(not_bool.f_mask_to_indexes().is_err());
        Ok(())
    }

    #[test]
    fn weighted_mean_test() -> Result<()> {
        let lhs = Tensor::from(1.0);
        let rhs = Tensor::from(4.0);
        let mean = Tensor::f_weighted_mean_tensors([(&lhs, 1.0), (&rhs, 2.0)])?;
        approx::assert_abs_diff_eq!(f64::from(&mean), 3.0, epsilon = 1e-9);
        Ok(())
    }
}
