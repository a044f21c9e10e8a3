use std::{collections::BTreeSet, fs, path::Path};

use generative_models::{
    dataset::Dataset,
    models::{GenerativeModel, PixelCnn, PixelCnnConfig, Vae, VaeConfig, VaeGan, VaeGanConfig},
    optimization::OptimizerConfig,
    persist::{FINAL_MODEL_DIR, MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE, OPTIMIZER_FILE, TRAINING_CONFIG_FILE},
    pipeline::TrainingPipeline,
    training::{Checkpoint, Trainer, TrainerState, TrainingConfig},
};
use ndarray::{Array, ArrayD, IxDyn};
use rand::{SeedableRng, rngs::StdRng};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn data(len: usize) -> ArrayD<f32> {
    Array::from_shape_fn(IxDyn(&[len, 2, 3]), |i| ((i[0] + i[1] * 3 + i[2]) % 5) as f32 / 5.)
}

fn vae() -> Vae {
    Vae::build(VaeConfig::new(vec![2, 3], 2), &mut StdRng::seed_from_u64(0)).unwrap()
}

fn config(dir: &Path) -> TrainingConfig {
    TrainingConfig {
        num_epochs: 5,
        batch_size: 4,
        learning_rate: 1e-3,
        steps_saving: Some(2),
        ..TrainingConfig::new(dir)
    }
}

fn entries(dir: &Path) -> anyhow::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        names.insert(entry?.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn train_step_updates_and_eval_step_preserves_weights() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let mut trainer = Trainer::new(
        vae(),
        config(dir.path()),
        Dataset::new(data(6))?,
        Some(Dataset::new(data(3))?),
    )?;

    let before = trainer.model().params().values().to_vec();
    let loss = trainer.train_step(1)?;
    assert!(loss.is_finite());

    let trained = trainer.model().params().values().to_vec();
    assert_ne!(before, trained);

    let eval_loss = trainer.eval_step(1)?;
    assert!(eval_loss.is_some());
    assert_eq!(trainer.model().params().values(), &trained[..]);

    Ok(())
}

#[test]
fn checkpoints_are_saved_every_steps_saving_epochs() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let initial = vae();
    let mut trainer = Trainer::new(
        initial.clone(),
        config(dir.path()),
        Dataset::new(data(6))?,
        None,
    )?
    .with_signature("run");

    trainer.train()?;
    assert_eq!(trainer.state(), TrainerState::Finished);

    let run_dir = dir.path().join("VAE_training_run");
    assert_eq!(
        entries(&run_dir)?,
        set(&["checkpoint_epoch_2", "checkpoint_epoch_4", FINAL_MODEL_DIR])
    );

    for epoch in [2, 4] {
        let checkpoint_dir = run_dir.join(format!("checkpoint_epoch_{epoch}"));
        assert_eq!(
            entries(&checkpoint_dir)?,
            set(&[MODEL_WEIGHTS_FILE, MODEL_CONFIG_FILE, OPTIMIZER_FILE, TRAINING_CONFIG_FILE])
        );

        let saved = Vae::load_from_folder(&checkpoint_dir)?;
        assert_ne!(saved.params().values(), initial.params().values());
    }

    Ok(())
}

#[test]
fn final_model_holds_the_best_model() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let mut trainer = Trainer::new(
        vae(),
        config(dir.path()),
        Dataset::new(data(6))?,
        Some(Dataset::new(data(4))?),
    )?;

    let final_dir = trainer.train()?;
    assert_eq!(final_dir, trainer.run_dir().join(FINAL_MODEL_DIR));
    assert_eq!(
        entries(&final_dir)?,
        set(&[MODEL_WEIGHTS_FILE, MODEL_CONFIG_FILE, TRAINING_CONFIG_FILE])
    );

    let reloaded = Vae::load_from_folder(&final_dir)?;
    assert_eq!(
        reloaded.params().state_dict(),
        trainer.best_model().params().state_dict()
    );
    assert_eq!(&TrainingConfig::load(&final_dir)?, trainer.config());

    Ok(())
}

#[test]
fn checkpoints_reload_model_and_optimizer() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let mut trainer = Trainer::new(vae(), config(dir.path()), Dataset::new(data(6))?, None)?;

    trainer.train_step(1)?;
    trainer.train_step(2)?;
    let checkpoint_dir = trainer.save_checkpoint(2)?;
    assert_eq!(trainer.state(), TrainerState::Checkpointing { epoch: 2 });

    let checkpoint = Checkpoint::<Vae>::load(&checkpoint_dir)?;
    assert_eq!(
        checkpoint.model.params().state_dict(),
        trainer.model().params().state_dict()
    );
    assert_eq!(checkpoint.optimizer, trainer.optimizer_state());
    // Two epochs of two batches each.
    assert_eq!(checkpoint.optimizer.step, 4);
    assert_eq!(&checkpoint.training_config, trainer.config());

    let mut resumed = Trainer::new(
        checkpoint.model,
        checkpoint.training_config,
        Dataset::new(data(6))?,
        None,
    )?;
    resumed.load_optimizer_state(&checkpoint.optimizer)?;
    assert_eq!(resumed.optimizer_state(), trainer.optimizer_state());

    Ok(())
}

#[test]
fn pipeline_trains_a_pixel_cnn() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let model_config = PixelCnnConfig {
        n_embeddings: 4,
        hidden_channels: 4,
        ..PixelCnnConfig::new(vec![1, 4, 4], 2, 3)?
    };
    let training_config = TrainingConfig {
        num_epochs: 2,
        batch_size: 3,
        learning_rate: 1e-2,
        steps_saving: None,
        ..TrainingConfig::new(dir.path())
    };

    let pipeline = TrainingPipeline::<PixelCnn>::from_config(model_config, training_config.clone())?
        .with_signature("pipeline");
    assert_eq!(pipeline.training_config(), &training_config);

    let pixels = Array::from_shape_fn(IxDyn(&[5, 1, 4, 4]), |i| ((i[0] + i[2] + i[3]) % 4) as f32);
    let trainer = pipeline.run(pixels.clone(), Some(pixels))?;

    let run_dir = dir.path().join("PixelCNN_training_pipeline");
    assert_eq!(trainer.run_dir(), run_dir);
    assert_eq!(entries(&run_dir)?, set(&[FINAL_MODEL_DIR]));
    assert_eq!(trainer.history().len(), 2);

    let reloaded = PixelCnn::load_from_folder(&run_dir.join(FINAL_MODEL_DIR))?;
    assert_eq!(
        reloaded.params().state_dict(),
        trainer.best_model().params().state_dict()
    );

    Ok(())
}

#[test]
fn vae_gan_trains_with_gating() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let model = VaeGan::build(VaeGanConfig::new(vec![2, 3], 2), &mut StdRng::seed_from_u64(1))?;
    let training_config = TrainingConfig {
        num_epochs: 2,
        batch_size: 3,
        learning_rate: 1e-3,
        optimizer: OptimizerConfig::GradientDescentWithMomentum { mu: 0.5 },
        ..TrainingConfig::new(dir.path())
    };

    let trainer = TrainingPipeline::new(model, training_config)?.run(data(6), None)?;

    assert_eq!(trainer.state(), TrainerState::Finished);
    assert!(trainer.history().iter().all(|s| s.train_loss.is_finite()));
    assert!(trainer.run_dir().join(FINAL_MODEL_DIR).is_dir());

    Ok(())
}

#[test]
fn frozen_networks_leave_the_momentum_untouched() -> anyhow::Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    // Discriminator costs always exceed the band, so only the decoder is held back.
    let model_config = VaeGanConfig {
        margin: 0.,
        equilibrium: 1e-3,
        ..VaeGanConfig::new(vec![2, 3], 2)
    };
    let model = VaeGan::build(model_config, &mut StdRng::seed_from_u64(1))?;
    let decoder = model
        .params()
        .prefix_range("decoder.")
        .ok_or_else(|| anyhow::anyhow!("no decoder parameters"))?;
    let discriminator = model
        .params()
        .prefix_range("discriminator.")
        .ok_or_else(|| anyhow::anyhow!("no discriminator parameters"))?;

    let training_config = TrainingConfig {
        learning_rate: 1e-2,
        optimizer: OptimizerConfig::GradientDescentWithMomentum { mu: 0.9 },
        ..TrainingConfig::new(dir.path())
    };
    let mut trainer = Trainer::new(model, training_config, Dataset::new(data(4))?, None)?;

    let before = trainer.model().params().values().to_vec();
    trainer.train_batch(data(4).view())?;
    let after = trainer.model().params().values();

    assert_eq!(decoder.slice(after), decoder.slice(&before));
    assert_ne!(discriminator.slice(after), discriminator.slice(&before));

    let state = trainer.optimizer_state();
    let velocity = &state.state["momentum_buffer"];
    assert!(decoder.slice(velocity).iter().all(|&v| v == 0.));
    assert!(discriminator.slice(velocity).iter().any(|&v| v != 0.));

    Ok(())
}
