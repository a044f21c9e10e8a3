use std::{fs, path::Path};

use generative_models::{
    ErrorKind, GenErr,
    models::{Ae, AeConfig, GenerativeModel, PixelCnn, PixelCnnConfig, Vae, VaeConfig, VaeGan, VaeGanConfig},
    persist::{self, MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE},
};
use rand::{SeedableRng, rngs::StdRng};

fn assert_reloads<M: GenerativeModel>(model: &M, dir: &Path) -> anyhow::Result<()> {
    model.save(dir)?;

    let files: Vec<_> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    assert!(files.contains(&MODEL_WEIGHTS_FILE.to_string()));
    assert!(files.contains(&MODEL_CONFIG_FILE.to_string()));

    let reloaded = M::load_from_folder(dir)?;
    assert_eq!(reloaded.config(), model.config());
    assert_eq!(reloaded.params().state_dict(), model.params().state_dict());

    Ok(())
}

#[test]
fn every_model_reloads_identically() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(11);

    let ae = Ae::build(AeConfig::new(vec![1, 2, 3], 4), &mut rng)?;
    assert_reloads(&ae, &dir.path().join("ae"))?;

    let vae = Vae::build(VaeConfig::new(vec![5], 2), &mut rng)?;
    assert_reloads(&vae, &dir.path().join("vae"))?;

    let vae_gan = VaeGan::build(VaeGanConfig::new(vec![2, 2], 3), &mut rng)?;
    assert_reloads(&vae_gan, &dir.path().join("vae_gan"))?;

    let config = PixelCnnConfig {
        n_embeddings: 8,
        hidden_channels: 4,
        ..PixelCnnConfig::new(vec![1, 4, 4], 2, 3)?
    };
    let pixel_cnn = PixelCnn::build(config, &mut rng)?;
    assert_reloads(&pixel_cnn, &dir.path().join("pixel_cnn"))?;

    Ok(())
}

#[test]
fn reloaded_models_compute_the_same_outputs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let vae = Vae::build(VaeConfig::new(vec![4], 2), &mut StdRng::seed_from_u64(0))?;
    vae.save(dir.path())?;
    let reloaded = Vae::load_from_folder(dir.path())?;

    let x = ndarray::Array::from_elem(ndarray::IxDyn(&[3, 4]), 0.5);
    let a = vae.forward(x.view(), &mut StdRng::seed_from_u64(4))?;
    let b = reloaded.forward(x.view(), &mut StdRng::seed_from_u64(4))?;

    assert_eq!(a.recon_x, b.recon_x);
    assert_eq!(a.loss, b.loss);
    Ok(())
}

#[test]
fn missing_weights_file_is_named() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ae = Ae::build(AeConfig::new(vec![3], 2), &mut StdRng::seed_from_u64(0))?;
    ae.save(dir.path())?;
    fs::remove_file(dir.path().join(MODEL_WEIGHTS_FILE))?;

    let err = Ae::load_from_folder(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, GenErr::MissingFile { file: MODEL_WEIGHTS_FILE, .. }));
    assert!(err.to_string().contains("model.pt"));

    Ok(())
}

#[test]
fn missing_config_file_is_named() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let vae = Vae::build(VaeConfig::new(vec![3], 2), &mut StdRng::seed_from_u64(0))?;
    vae.save(dir.path())?;
    fs::remove_file(dir.path().join(MODEL_CONFIG_FILE))?;

    let err = Vae::load_from_folder(dir.path()).unwrap_err();
    assert!(matches!(err, GenErr::MissingFile { file: MODEL_CONFIG_FILE, .. }));

    Ok(())
}

#[test]
fn weights_under_another_key_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ae = Ae::build(AeConfig::new(vec![3], 2), &mut StdRng::seed_from_u64(0))?;
    ae.save(dir.path())?;

    let path = dir.path().join(MODEL_WEIGHTS_FILE);
    persist::write_state_dict(&path, "weights", &ae.params().state_dict(), None)?;

    let err = Ae::load_from_folder(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Key);

    Ok(())
}

#[test]
fn weights_of_another_architecture_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ae = Ae::build(AeConfig::new(vec![3], 2), &mut StdRng::seed_from_u64(0))?;
    ae.save(dir.path())?;

    // Same config file, weights of a wider model.
    let wide = Ae::build(AeConfig::new(vec![4], 2), &mut StdRng::seed_from_u64(0))?;
    persist::save_weights(dir.path(), &wide.params().state_dict())?;

    let err = Ae::load_from_folder(dir.path()).unwrap_err();
    assert!(matches!(err, GenErr::ShapeMismatch { .. }));

    Ok(())
}

#[test]
fn saving_over_a_regular_file_is_an_io_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("occupied");
    fs::write(&path, b"not a directory")?;

    let ae = Ae::build(AeConfig::new(vec![3], 2), &mut StdRng::seed_from_u64(0))?;
    let err = ae.save(&path).unwrap_err();
    assert!(matches!(err, GenErr::Io(_)));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(fs::read(&path)?, b"not a directory");

    Ok(())
}
