use std::io::Write;

use burn::backend::{Autodiff, NdArray};
use burn::optim::AdamWConfig;
use dugong::model::Seq2SeqModel;
use dugong::{EpochTrainer, Seq2SeqTrainer, SetupOptions, TrainingArgs, run_epochs, setup};
use indicatif::ProgressBar;
use tempfile::NamedTempFile;

type TrainBackend = Autodiff<NdArray>;

fn split(records: &[(&str, &str)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for (en, fr) in records {
        writeln!(file, "{}", serde_json::json!({ "en": en, "fr": fr })).unwrap();
    }
    file
}

#[test]
fn one_trainer_runs_every_epoch_and_rotates_checkpoints() {
    let train = split(&[
        ("The cat sleeps.", "Le chat dort."),
        ("I like apples.", "J'aime les pommes."),
        ("Good morning!", "Bonjour !"),
    ]);
    let test = split(&[("Thank you.", "Merci.")]);
    let pretrained = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let options = SetupOptions {
        pretrained_dir: pretrained.path().to_path_buf(),
        allow_random_init: true,
        max_source_length: 16,
        max_target_length: 16,
    };
    let args = TrainingArgs::new()
        .with_output_dir(output.path().display().to_string())
        .with_per_device_train_batch_size(2)
        .with_per_device_eval_batch_size(2)
        .with_save_total_limit(1)
        .with_generation_max_length(3)
        .with_num_workers(1);

    let device = Default::default();
    let bundle = setup::<TrainBackend>(train.path(), test.path(), "en", "fr", "tiny", &options, &device)
        .unwrap();
    let optim = AdamWConfig::new()
        .with_weight_decay(args.weight_decay)
        .init::<TrainBackend, Seq2SeqModel<TrainBackend>>();
    let mut trainer = Seq2SeqTrainer::new(bundle, args, optim, device).unwrap();

    let train_metrics = trainer.train(0).unwrap();
    assert!(train_metrics.get("train_loss").unwrap().is_finite());
    assert_eq!(trainer.global_step(), 2);

    let eval_metrics = trainer.evaluate(0).unwrap();
    for name in [
        "eval_loss",
        "eval_bleu",
        "eval_gen_len",
        "eval_runtime",
        "eval_samples_per_second",
        "eval_steps_per_second",
        "epoch",
    ] {
        assert!(eval_metrics.get(name).is_some(), "missing {name}");
    }
    assert!(eval_metrics.get("eval_gen_len").unwrap() <= 3.0);

    let mut out = Vec::new();
    run_epochs(&mut trainer, 1, &ProgressBar::hidden(), &mut out).unwrap();
    assert_eq!(trainer.global_step(), 4);
    assert!(String::from_utf8(out).unwrap().contains("eval_bleu"));

    let checkpoints = trainer.checkpoints();
    assert_eq!(checkpoints.saved_steps(), vec![4]);
    assert!(checkpoints.path_for(4).is_file());
    assert!(!checkpoints.path_for(2).exists());
    assert!(output.path().join("config.json").is_file());
    assert!(output.path().join("model.json").is_file());
}
