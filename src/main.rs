use std::path::Path;

use dugong::{SetupOptions, TrainBackend, TrainingArgs};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let device = Default::default();
    let options = SetupOptions {
        allow_random_init: true,
        ..Default::default()
    };

    dugong::train::<TrainBackend>(
        Path::new("dugong/t5_train.json"),
        Path::new("dugong/t5_test.json"),
        "en",
        "fr",
        "small",
        &options,
        TrainingArgs::new(),
        device,
    )
}
