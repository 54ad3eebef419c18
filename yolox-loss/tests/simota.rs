use anyhow::{ensure, Result};
use approx::assert_abs_diff_eq;
use tch::{nn, Device, Kind, Tensor};
use yolox_loss::{YoloxLossInit, YoloxLossOutput};

const STRIDE: i64 = 8;

/// Raw head output of a 4x4 map where every anchor predicts a box of one
/// stride centered on itself, with zero objectness and class logits.
fn centered_output(batch_size: i64, channels: i64) -> Tensor {
    let output = Tensor::zeros(&[batch_size, channels, 4, 4], (Kind::Float, Device::Cpu));
    let _ = output.narrow(1, 0, 2).fill_(0.5);
    output
}

fn set_raw_box(output: &Tensor, x: i64, y: i64, raw: [f64; 4]) {
    for (channel, value) in raw.into_iter().enumerate() {
        let _ = output
            .narrow(1, channel as i64, 1)
            .narrow(2, y, 1)
            .narrow(3, x, 1)
            .fill_(value);
    }
}

#[test]
fn single_object_on_anchor_cell() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit::new(2, vec![STRIDE]).build(&vs.root())?;

    let output = centered_output(1, 7).set_requires_grad(true);
    let targets = Tensor::of_slice(&[1f32, 20.0, 20.0, 8.0, 8.0]).view([1, 1, 5]);

    let (loss, aux) = loss_fn.forward(&[output.shallow_clone()], &targets)?;

    // only anchor (2, 2) is foreground
    ensure!(aux.num_fg == 1 && aux.num_gts == 1);
    let assignment = &aux.assignments[0];
    ensure!(Vec::<i64>::from(assignment.fg_indexes()) == vec![2 * 4 + 2]);
    ensure!(Vec::<i64>::from(assignment.matched_classes()) == vec![1]);
    assert_abs_diff_eq!(
        assignment.matched_ious().double_value(&[0]),
        1.0,
        epsilon = 1e-5
    );
    let fg_mask: Vec<bool> = Vec::from(&aux.fg_masks()?.view([-1]));
    ensure!(fg_mask.iter().filter(|&&fg| fg).count() == 1 && fg_mask[10]);

    // zero logits everywhere, normalized by one foreground anchor
    let ln2 = 2f64.ln();
    assert_abs_diff_eq!(f64::from(&loss.iou_loss), 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(f64::from(&loss.obj_loss), 16.0 * ln2, epsilon = 1e-4);
    assert_abs_diff_eq!(f64::from(&loss.cls_loss), 2.0 * ln2, epsilon = 1e-4);
    assert_abs_diff_eq!(f64::from(&loss.total_loss), 18.0 * ln2, epsilon = 1e-3);
    assert_abs_diff_eq!(loss.fg_ratio, 1.0);
    ensure!(loss.l1_loss.is_none() && loss.reid_loss.is_none());

    loss.total_loss.backward();
    ensure!(output.grad().defined());
    Ok(())
}

#[test]
fn contested_anchor_goes_to_cheaper_object() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit::new(1, vec![STRIDE]).build(&vs.root())?;

    // shrink every predicted box to a dot
    let output = centered_output(1, 6);
    let _ = output.narrow(1, 2, 2).fill_(0.01f64.ln());
    // anchor (2, 1) predicts exactly the second object
    set_raw_box(&output, 2, 1, [1.5, 0.5, 2.5f64.ln(), 0.0]);

    // both boxes contain the center (20, 12) of anchor (2, 1)
    #[rustfmt::skip]
    let targets = Tensor::of_slice(&[
        0f32, 12.0, 12.0, 20.0, 8.0,
        0.0, 28.0, 12.0, 20.0, 8.0,
    ])
    .view([1, 2, 5]);

    let (_loss, aux) = loss_fn.forward(&[output], &targets)?;
    let assignment = &aux.assignments[0];

    let fg_indexes: Vec<i64> = Vec::from(assignment.fg_indexes());
    let matched_gts: Vec<i64> = Vec::from(assignment.matched_gt_indexes());
    let shared = fg_indexes
        .iter()
        .position(|&index| index == 4 + 2)
        .ok_or_else(|| anyhow::format_err!("the shared anchor is not foreground"))?;
    ensure!(matched_gts[shared] == 1);

    // no anchor is assigned twice
    let unique: std::collections::HashSet<_> = fg_indexes.iter().collect();
    ensure!(unique.len() == fg_indexes.len());
    Ok(())
}

#[test]
fn batch_without_objects() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit::new(3, vec![STRIDE]).build(&vs.root())?;

    let output = Tensor::randn(&[2, 8, 4, 4], (Kind::Float, Device::Cpu));
    let targets = Tensor::zeros(&[2, 4, 5], (Kind::Float, Device::Cpu));
    let (loss, aux) = loss_fn.forward(&[output], &targets)?;

    ensure!(aux.num_fg == 0 && aux.num_gts == 0);
    ensure!(!bool::from(aux.fg_masks()?.any()));
    ensure!(f64::from(&loss.iou_loss) == 0.0);
    ensure!(f64::from(&loss.cls_loss) == 0.0);
    assert_abs_diff_eq!(
        f64::from(&loss.total_loss),
        f64::from(&loss.obj_loss),
        epsilon = 1e-6
    );
    ensure!(loss.fg_ratio == 0.0);
    ensure!(f64::from(&loss.total_loss).is_finite());
    Ok(())
}

#[test]
fn multi_scale_batch() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit::new(2, vec![8, 16]).build(&vs.root())?;

    let outputs = [
        Tensor::randn(&[2, 7, 8, 8], (Kind::Float, Device::Cpu)) * 0.1,
        Tensor::randn(&[2, 7, 4, 4], (Kind::Float, Device::Cpu)) * 0.1,
    ];
    #[rustfmt::skip]
    let targets = Tensor::of_slice(&[
        // image 0
        0f32, 20.0, 24.0, 16.0, 20.0,
        1.0, 44.0, 40.0, 30.0, 24.0,
        // image 1
        1.0, 32.0, 32.0, 40.0, 40.0,
        0.0, 0.0, 0.0, 0.0, 0.0,
    ])
    .view([2, 2, 5]);

    let (loss, aux) = loss_fn.forward(&outputs, &targets)?;
    ensure!(aux.num_gts == 3);
    ensure!(aux.num_fg > 0);
    ensure!(aux.fg_masks()?.size() == vec![2, 64 + 16]);

    for assignment in &aux.assignments {
        let classes: Vec<i64> = Vec::from(assignment.matched_classes());
        ensure!(classes.iter().all(|&class| class == 0 || class == 1));
        ensure!(bool::from(assignment.matched_ious().ge(0.0).all()));
    }
    let expect_ratio = aux.num_fg as f64 / 3.0;
    assert_abs_diff_eq!(loss.fg_ratio, expect_ratio);

    let total = f64::from(&loss.total_loss);
    let expect =
        5.0 * f64::from(&loss.iou_loss) + f64::from(&loss.obj_loss) + f64::from(&loss.cls_loss);
    assert_abs_diff_eq!(total, expect, epsilon = 1e-4);
    Ok(())
}

#[test]
fn toggle_l1_loss() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit::new(2, vec![STRIDE]).build(&vs.root())?;
    let targets = Tensor::of_slice(&[0f32, 20.0, 20.0, 8.0, 8.0]).view([1, 1, 5]);

    let (loss, _) = loss_fn.forward(&[centered_output(1, 7)], &targets)?;
    ensure!(!loss.named_losses().contains_key("l1_loss"));

    loss_fn.set_use_l1(true);
    ensure!(loss_fn.use_l1());

    // the raw output already encodes the object, so the L1 loss vanishes
    let (loss, _) = loss_fn.forward(&[centered_output(1, 7)], &targets)?;
    let named = loss.named_losses();
    let keys: Vec<_> = named.keys().cloned().collect();
    ensure!(
        keys == vec![
            "loss",
            "conf_loss",
            "cls_loss",
            "iou_loss",
            "l1_loss",
            "fg_ratio"
        ]
    );
    assert_abs_diff_eq!(named["l1_loss"], 0.0, epsilon = 1e-5);

    // a shifted prediction is penalized by its raw offset
    let shifted = centered_output(1, 7);
    set_raw_box(&shifted, 2, 2, [0.75, 0.5, 0.0, 0.0]);
    let (loss, _) = loss_fn.forward(&[shifted], &targets)?;
    assert_abs_diff_eq!(
        f64::from(loss.l1_loss.as_ref().unwrap()),
        0.25,
        epsilon = 1e-5
    );
    Ok(())
}

#[test]
fn reid_loss_on_matched_classes() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit {
        reid_dim: Some(4),
        tracking_id_nums: Some(vec![5, 6]),
        ..YoloxLossInit::new(2, vec![STRIDE])
    }
    .build(&vs.root())?;
    ensure!(loss_fn.reid_dim() == Some(4));

    let output = centered_output(1, 11);
    let _ = output
        .narrow(1, 7, 4)
        .copy_(&Tensor::randn(&[1, 4, 4, 4], (Kind::Float, Device::Cpu)));

    // only class 1 has an object, with tracking id 3
    let targets = Tensor::of_slice(&[1f32, 20.0, 20.0, 8.0, 8.0, 3.0]).view([1, 1, 6]);
    let (loss, _) = loss_fn.forward(&[output.shallow_clone()], &targets)?;
    let reid_loss = f64::from(loss.reid_loss.as_ref().unwrap());
    ensure!(reid_loss.is_finite() && reid_loss > 0.0);

    // unknown tracking ids are ignored
    let targets = Tensor::of_slice(&[1f32, 20.0, 20.0, 8.0, 8.0, -1.0]).view([1, 1, 6]);
    let (loss, _) = loss_fn.forward(&[output.shallow_clone()], &targets)?;
    ensure!(f64::from(loss.reid_loss.as_ref().unwrap()) == 0.0);

    // targets without tracking ids are rejected
    let targets = Tensor::of_slice(&[1f32, 20.0, 20.0, 8.0, 8.0]).view([1, 1, 5]);
    ensure!(loss_fn.forward(&[output], &targets).is_err());
    Ok(())
}

#[test]
fn reject_invalid_configuration() {
    let vs = nn::VarStore::new(Device::Cpu);
    let root = vs.root();

    let missing_ids = YoloxLossInit {
        reid_dim: Some(8),
        ..YoloxLossInit::new(2, vec![8, 16, 32])
    };
    assert!(missing_ids.build(&root / "missing_ids").is_err());

    let wrong_len = YoloxLossInit {
        reid_dim: Some(8),
        tracking_id_nums: Some(vec![10]),
        ..YoloxLossInit::new(2, vec![8, 16, 32])
    };
    assert!(wrong_len.build(&root / "wrong_len").is_err());

    assert!(YoloxLossInit::new(2, vec![])
        .build(&root / "no_strides")
        .is_err());
    assert!(YoloxLossInit::new(0, vec![8])
        .build(&root / "no_classes")
        .is_err());
}

#[test]
fn weighted_mean_of_outputs() -> Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mut loss_fn = YoloxLossInit::new(2, vec![STRIDE]).build(&vs.root())?;

    let one_object = Tensor::of_slice(&[0f32, 20.0, 20.0, 8.0, 8.0]).view([1, 1, 5]);
    let no_object = Tensor::zeros(&[1, 1, 5], (Kind::Float, Device::Cpu));
    let (lhs, _) = loss_fn.forward(&[centered_output(1, 7)], &one_object)?;
    let (rhs, _) = loss_fn.forward(&[centered_output(1, 7)], &no_object)?;

    let mean = YoloxLossOutput::weighted_mean([(&lhs, 1.0), (&rhs, 3.0)])?;
    let expect = (f64::from(&lhs.obj_loss) + 3.0 * f64::from(&rhs.obj_loss)) / 4.0;
    assert_abs_diff_eq!(f64::from(&mean.obj_loss), expect, epsilon = 1e-5);
    assert_abs_diff_eq!(mean.fg_ratio, 0.25, epsilon = 1e-9);
    ensure!(mean.l1_loss.is_none());
    Ok(())
}
