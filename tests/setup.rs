use std::io::Write;

use burn::backend::NdArray;
use burn::data::dataset::Dataset;
use dugong::{SetupOptions, setup};
use tempfile::NamedTempFile;

fn split(records: &[(&str, &str)]) -> NamedTempFile {
    let rows = records
        .iter()
        .map(|(en, fr)| serde_json::json!({ "translation": { "en": en, "fr": fr } }))
        .collect::<Vec<_>>();
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", serde_json::Value::Array(rows)).unwrap();
    file
}

fn options(pretrained_dir: &std::path::Path) -> SetupOptions {
    SetupOptions {
        pretrained_dir: pretrained_dir.to_path_buf(),
        allow_random_init: true,
        ..Default::default()
    }
}

#[test]
fn setup_builds_datasets_for_each_split() {
    let train = split(&[
        ("The cat sleeps.", "Le chat dort."),
        ("I like apples.", "J'aime les pommes."),
        ("Good morning!", "Bonjour !"),
    ]);
    let test = split(&[("Thank you.", "Merci."), ("See you soon.", "A bientot.")]);
    let pretrained = tempfile::tempdir().unwrap();

    let device = Default::default();
    let bundle = setup::<NdArray>(
        train.path(),
        test.path(),
        "en",
        "fr",
        "tiny",
        &options(pretrained.path()),
        &device,
    )
    .unwrap();

    assert_eq!(bundle.train_dataset.len(), 3);
    assert_eq!(bundle.test_dataset.len(), 2);
    assert_eq!(bundle.checkpoint.id(), "t5-tiny-en-fr");

    let item = bundle.train_dataset.get(0).unwrap();
    assert_eq!(item.input_ids.len(), item.attention_mask.len());
    assert!(item.labels.contains(&bundle.tokenizer.eos_token_id()));
}

#[test]
fn missing_weights_are_an_error_without_random_init() {
    let train = split(&[("Hello.", "Salut.")]);
    let test = split(&[("Bye.", "Au revoir.")]);
    let pretrained = tempfile::tempdir().unwrap();
    let options = SetupOptions {
        allow_random_init: false,
        ..options(pretrained.path())
    };

    let device = Default::default();
    let result = setup::<NdArray>(train.path(), test.path(), "en", "fr", "tiny", &options, &device);
    let err = result.err().unwrap();
    assert!(err.to_string().contains("t5-tiny-en-fr"), "{err}");
}

#[test]
fn unknown_language_is_rejected() {
    let train = split(&[("Hello.", "Salut.")]);
    let test = split(&[("Bye.", "Au revoir.")]);
    let pretrained = tempfile::tempdir().unwrap();

    let device = Default::default();
    let result = setup::<NdArray>(
        train.path(),
        test.path(),
        "en",
        "xx",
        "tiny",
        &options(pretrained.path()),
        &device,
    );
    assert!(result.is_err());
}

#[test]
fn lengths_beyond_the_position_table_are_rejected() {
    let long_source = vec!["word"; 700].join(" ");
    let train = split(&[(long_source.as_str(), "Mot.")]);
    let test = split(&[("Bye.", "Au revoir.")]);
    let pretrained = tempfile::tempdir().unwrap();
    let device = Default::default();

    let too_long = SetupOptions {
        max_source_length: 1024,
        ..options(pretrained.path())
    };
    let err = setup::<NdArray>(train.path(), test.path(), "en", "fr", "tiny", &too_long, &device)
        .err()
        .unwrap();
    let message = err.to_string();
    assert!(message.contains("1024") && message.contains("512"), "{message}");

    let too_long = SetupOptions {
        max_target_length: 513,
        ..options(pretrained.path())
    };
    assert!(setup::<NdArray>(train.path(), test.path(), "en", "fr", "tiny", &too_long, &device).is_err());

    let bundle = setup::<NdArray>(
        train.path(),
        test.path(),
        "en",
        "fr",
        "tiny",
        &options(pretrained.path()),
        &device,
    )
    .unwrap();
    let item = bundle.train_dataset.get(0).unwrap();
    assert_eq!(item.input_ids.len(), 128);
}
