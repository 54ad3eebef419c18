use crate::common::*;
use tch::nn::Module as _;

const NORMALIZE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct ReidHeadInit {
    pub num_classes: usize,
    pub reid_dim: usize,
    /// The number of tracking ids of each class.
    pub id_nums: Vec<usize>,
}

impl ReidHeadInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<ReidHead> {
        let path = path.borrow();
        let Self {
            num_classes,
            reid_dim,
            id_nums,
        } = self;

        ensure!(reid_dim > 0, "reid_dim must be positive");
        ensure!(
            id_nums.len() == num_classes,
            "num_classes={}, which is different from the length {} of tracking id numbers",
            num_classes,
            id_nums.len()
        );
        ensure!(
            id_nums.iter().all(|&id_num| id_num >= 2),
            "every class must have at least 2 tracking ids, but get {:?}",
            id_nums
        );

        let (classifiers, emb_scales) = id_nums
            .iter()
            .enumerate()
            .map(|(class, &id_num)| {
                info!(
                    "class {}, tracking id number: {}, feature dim: {}",
                    class, id_num, reid_dim
                );
                let classifier = nn::linear(
                    path / format!("classifier_{}", class),
                    reid_dim as i64,
                    id_num as i64,
                    Default::default(),
                );
                let emb_scale = 2f64.sqrt() * ((id_num - 1) as f64).ln();
                if id_num == 2 {
                    warn!(
                        "class {} has only 2 tracking ids, its embeddings are scaled to zero",
                        class
                    );
                }
                (classifier, emb_scale)
            })
            .unzip_n_vec();

        Ok(ReidHead {
            reid_dim,
            classifiers,
            emb_scales,
            cross_entropy: CrossEntropyLoss::new(Some(-1), Reduction::Mean),
        })
    }
}

/// Per-class identity classifiers over the embeddings of foreground anchors.
#[derive(Debug)]
pub struct ReidHead {
    reid_dim: usize,
    classifiers: Vec<nn::Linear>,
    emb_scales: Vec<f64>,
    cross_entropy: CrossEntropyLoss,
}

impl ReidHead {
    pub fn reid_dim(&self) -> usize {
        self.reid_dim
    }

    pub fn emb_scales(&self) -> &[f64] {
        &self.emb_scales
    }

    /// Sum the identity classification loss of every class with matched anchors.
    ///
    /// `features` is `[fg, reid_dim]`, and `classes` and `track_ids` are `[fg]` int64.
    pub fn forward(
        &self,
        features: &Tensor,
        classes: &Tensor,
        track_ids: &Tensor,
    ) -> Result<Tensor> {
        let (num_fg, reid_dim) = features.size2()?;
        ensure!(
            reid_dim == self.reid_dim as i64,
            "expect {} feature channels, but get {}",
            self.reid_dim,
            reid_dim
        );
        ensure!(
            classes.size1()? == num_fg && track_ids.size1()? == num_fg,
            "classes and tracking ids must have {} entries",
            num_fg
        );

        let init = Tensor::f_zeros(&[], (Kind::Float, features.device()))?;
        let loss = self
            .classifiers
            .iter()
            .zip(&self.emb_scales)
            .enumerate()
            .try_fold(
                init,
                |loss, (class, (classifier, &emb_scale))| -> Result<_> {
                    let indexes = classes.f_eq(class as i64)?.f_mask_to_indexes()?;
                    if indexes.is_empty() {
                        return Ok(loss);
                    }

                    let feature = features.f_index_select(0, &indexes)?;
                    let norm = feature
                        .f_square()?
                        .f_sum_dim_intlist(&[1], true, Kind::Float)?
                        .f_sqrt()?
                        .f_clamp_min(NORMALIZE_EPSILON)?;
                    let feature = feature.f_div(&norm)?.f_mul_scalar(emb_scale)?;
                    let logits = classifier.forward(&feature);
                    let targets = track_ids.f_index_select(0, &indexes)?;

                    let class_loss = self.cross_entropy.forward(&logits, &targets)?;
                    Ok(loss.f_add(&class_loss)?)
                },
            )?;

        Ok(loss)
    }
}
