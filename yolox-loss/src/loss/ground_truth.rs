use crate::common::*;

/// The ground truth objects of one image.
#[derive(Debug, TensorLike, Getters)]
pub struct GroundTruth {
    /// Class indexes in shape `[object]`.
    #[get = "pub"]
    classes: Tensor,
    /// Boxes in shape `[object, 4]` as `(cx, cy, w, h)` in pixel units.
    #[get = "pub"]
    boxes: Tensor,
    /// Tracking ids in shape `[object]`, where `-1` marks an unknown id.
    #[get = "pub"]
    track_ids: Option<Tensor>,
}

impl GroundTruth {
    pub fn num_objects(&self) -> i64 {
        self.classes.size1().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.num_objects() == 0
    }

    pub fn device(&self) -> Device {
        self.boxes.device()
    }
}

/// Split a zero-padded `[batch, max_objects, 5 or 6]` label tensor into per-image ground truths.
///
/// The columns are `[class, cx, cy, w, h]` followed by the optional tracking id.
/// Rows whose values sum to zero are padding and must come after all valid rows.
pub fn split_ground_truths(targets: &Tensor, with_track_ids: bool) -> Result<Vec<GroundTruth>> {
    let (batch_size, _max_objects, num_columns) = targets.size3().map_err(|_| {
        format_err!(
            "expect a [batch, max_objects, 5 or 6] target tensor, but get {:?}",
            targets.size()
        )
    })?;
    if with_track_ids {
        ensure!(
            num_columns == 6,
            "expect 6 target columns with tracking ids, but get {}",
            num_columns
        );
    } else {
        ensure!(
            num_columns == 5 || num_columns == 6,
            "expect 5 or 6 target columns, but get {}",
            num_columns
        );
    }

    tch::no_grad(|| {
        let targets = targets.f_to_kind(Kind::Float)?.f_detach()?;
        let num_objects_vec: Vec<i64> = Vec::from(
            &targets
                .f_sum_dim_intlist(&[2], false, Kind::Float)?
                .f_gt(0.0)?
                .f_sum_dim_intlist(&[1], false, Kind::Int64)?,
        );

        (0..batch_size)
            .zip(num_objects_vec)
            .map(|(batch_index, num_objects)| -> Result<_> {
                let labels = targets
                    .f_select(0, batch_index)?
                    .f_narrow(0, 0, num_objects)?;

                let classes = labels.f_select(1, 0)?.f_to_kind(Kind::Int64)?;
                let boxes = labels.f_narrow(1, 1, 4)?;
                let track_ids = if with_track_ids {
                    Some(labels.f_select(1, 5)?.f_to_kind(Kind::Int64)?)
                } else {
                    None
                };

                let num_degenerate = i64::from(
                    boxes
                        .f_narrow(1, 2, 2)?
                        .f_le(0.0)?
                        .f_any_dim(1, false)?
                        .f_sum(Kind::Int64)?,
                );
                if num_degenerate > 0 {
                    warn!(
                        "image {} has {} ground truth boxes with non-positive size",
                        batch_index, num_degenerate
                    );
                }

                Ok(GroundTruth {
                    classes,
                    boxes,
                    track_ids,
                })
            })
            .try_collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_padded_targets() -> Result<()> {
        #[rustfmt::skip]
        let values = [
            // image 0
            1f32, 10.0, 10.0, 4.0, 4.0, 7.0,
            0.0, 20.0, 30.0, 2.0, 6.0, -1.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            // image 1
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let targets = Tensor::of_slice(&values).view([2, 3, 6]);
        let gts = split_ground_truths(&targets, true)?;

        ensure!(gts.len() == 2);
        ensure!(gts[0].num_objects() == 2);
        ensure!(gts[1].is_empty());
        ensure!(Vec::<i64>::from(gts[0].classes()) == vec![1, 0]);
        ensure!(Vec::<i64>::from(gts[0].track_ids().as_ref().unwrap()) == vec![7, -1]);
        ensure!(gts[0].boxes().size() == vec![2, 4]);
        ensure!(gts[0].boxes().double_value(&[1, 1]) == 30.0);
        Ok(())
    }

    #[test]
    fn reject_bad_target_columns() {
        let targets = Tensor::zeros(&[1, 2, 5], (Kind::Float, Device::Cpu));
        assert!(split_ground_truths(&targets, false).is_ok());
        assert!(split_ground_truths(&targets, true).is_err());

        let targets = Tensor::zeros(&[1, 2, 4], (Kind::Float, Device::Cpu));
        assert!(split_ground_truths(&targets, false).is_err());
    }
}
