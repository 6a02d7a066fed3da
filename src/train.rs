use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use burn::{
    config::Config,
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, cast::ToElement},
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    checkpoint::CheckpointManager,
    dataset::{BatchEncodingDataset, Seq2SeqBatch, Seq2SeqCollator},
    evaluate::{Evaluator, Metrics, round4},
    model::{Seq2SeqModel, generate_greedy},
    report::render_metrics,
    setup::{SetupOptions, TrainingSetup, setup},
    tokenizer::TranslationTokenizer,
};

#[derive(Config, Debug)]
pub struct TrainingArgs {
    #[config(default = "\"dugong/models\".to_string()")]
    pub output_dir: String,
    #[config(default = 2e-5)]
    pub learning_rate: f64,
    #[config(default = 4)]
    pub per_device_train_batch_size: usize,
    #[config(default = 4)]
    pub per_device_eval_batch_size: usize,
    #[config(default = 0.01)]
    pub weight_decay: f32,
    /// 0 keeps every checkpoint.
    #[config(default = 3)]
    pub save_total_limit: usize,
    #[config(default = 2)]
    pub num_train_epochs: usize,
    /// Score greedy generations instead of teacher-forced argmax.
    #[config(default = true)]
    pub predict_with_generate: bool,
    #[config(default = 128)]
    pub generation_max_length: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1)]
    pub num_workers: usize,
}

/// One training pass and one evaluation pass per call, driven by [`run_epochs`].
pub trait EpochTrainer {
    fn train(&mut self, epoch: usize) -> Result<Metrics>;
    fn evaluate(&mut self, epoch: usize) -> Result<Metrics>;
}

pub struct Seq2SeqTrainer<B: AutodiffBackend, O: Optimizer<Seq2SeqModel<B>, B>> {
    model: Seq2SeqModel<B>,
    optim: O,
    args: TrainingArgs,
    dataloader_train: Arc<dyn DataLoader<B, Seq2SeqBatch<B>>>,
    test_dataset: BatchEncodingDataset,
    collator: Seq2SeqCollator,
    tokenizer: TranslationTokenizer,
    evaluator: Evaluator,
    checkpoints: CheckpointManager,
    device: B::Device,
    global_step: usize,
}

impl<B: AutodiffBackend, O: Optimizer<Seq2SeqModel<B>, B>> Seq2SeqTrainer<B, O> {
    pub fn new(bundle: TrainingSetup<B>, args: TrainingArgs, optim: O, device: B::Device) -> Result<Self> {
        std::fs::create_dir_all(&args.output_dir)
            .with_context(|| format!("failed to create {}", args.output_dir))?;
        args.save(format!("{}/config.json", args.output_dir))
            .context("failed to save training config")?;
        bundle
            .model_config
            .save(format!("{}/model.json", args.output_dir))
            .context("failed to save model config")?;

        let dataloader_train: Arc<dyn DataLoader<B, Seq2SeqBatch<B>>> =
            DataLoaderBuilder::new(bundle.data_collator.clone())
                .batch_size(args.per_device_train_batch_size)
                .shuffle(args.seed)
                .num_workers(args.num_workers)
                .build(bundle.train_dataset);

        let checkpoints = CheckpointManager::new(&args.output_dir, args.save_total_limit);

        Ok(Self {
            model: bundle.model,
            optim,
            args,
            dataloader_train,
            test_dataset: bundle.test_dataset,
            collator: bundle.data_collator,
            tokenizer: bundle.tokenizer,
            evaluator: bundle.evaluator,
            checkpoints,
            device,
            global_step: 0,
        })
    }

    pub fn model(&self) -> &Seq2SeqModel<B> {
        &self.model
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }
}

impl<B: AutodiffBackend, O: Optimizer<Seq2SeqModel<B>, B>> EpochTrainer for Seq2SeqTrainer<B, O> {
    fn train(&mut self, epoch: usize) -> Result<Metrics> {
        let mut loss_sum = 0.0;
        let mut batches = 0usize;

        for batch in self.dataloader_train.iter() {
            let (loss, _) = self.model.forward_loss(&batch);
            loss_sum += loss.clone().into_scalar().to_f64();
            batches += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self
                .optim
                .step(self.args.learning_rate, self.model.clone(), grads);
            self.global_step += 1;
        }

        let train_loss = if batches > 0 {
            loss_sum / batches as f64
        } else {
            f64::NAN
        };
        tracing::info!(
            "Epoch {}: train_loss={train_loss:.4} over {batches} batches (step {})",
            epoch + 1,
            self.global_step
        );

        self.checkpoints.save(&self.model, self.global_step)?;

        Ok(Metrics::from_iter([
            ("train_loss", round4(train_loss)),
            ("epoch", (epoch + 1) as f64),
        ]))
    }

    fn evaluate(&mut self, epoch: usize) -> Result<Metrics> {
        let started = Instant::now();
        let model = self.model.valid();
        let n_items = self.test_dataset.len();
        let batch_size = self.args.per_device_eval_batch_size.max(1);

        let mut loss_sum = 0.0;
        let mut steps = 0usize;
        let mut predictions = Vec::with_capacity(n_items);
        let mut labels = Vec::with_capacity(n_items);

        for start in (0..n_items).step_by(batch_size) {
            let items = (start..(start + batch_size).min(n_items))
                .filter_map(|index| self.test_dataset.get(index))
                .collect::<Vec<_>>();
            labels.extend(items.iter().map(|item| item.labels.clone()));

            let batch = self.collator.collate::<B::InnerBackend>(items, &self.device);
            let (loss, logits) = model.forward_loss(&batch);
            loss_sum += loss.into_scalar().to_f64();
            steps += 1;

            if self.args.predict_with_generate {
                predictions.extend(generate_greedy(
                    &model,
                    batch.input_ids,
                    batch.attention_mask,
                    self.tokenizer.decoder_start_token_id(),
                    self.tokenizer.eos_token_id(),
                    self.args.generation_max_length,
                ));
            } else {
                predictions.extend(self.evaluator.argmax_predictions(logits));
            }
        }

        let scores = self.evaluator.compute_metrics(&predictions, &labels)?;
        let runtime = started.elapsed().as_secs_f64();

        let mut metrics = Metrics::new();
        metrics.insert(
            "eval_loss",
            round4(if steps > 0 { loss_sum / steps as f64 } else { f64::NAN }),
        );
        for (name, value) in scores.with_prefix("eval_").iter() {
            metrics.insert(name, value);
        }
        metrics.insert("eval_runtime", round4(runtime));
        metrics.insert("eval_samples_per_second", per_second(n_items, runtime));
        metrics.insert("eval_steps_per_second", per_second(steps, runtime));
        metrics.insert("epoch", (epoch + 1) as f64);

        tracing::info!("Epoch {}: {metrics}", epoch + 1);
        Ok(metrics)
    }
}

/// Items per second, 0 when nothing measurable elapsed.
fn per_second(count: usize, runtime: f64) -> f64 {
    if runtime > 0.0 {
        round4(count as f64 / runtime)
    } else {
        0.0
    }
}

/// Runs exactly `num_epochs` train/evaluate cycles, advancing `progress` after each
/// training pass and writing one metrics table per epoch to `out`.
pub fn run_epochs<T: EpochTrainer, W: Write>(
    trainer: &mut T,
    num_epochs: usize,
    progress: &ProgressBar,
    out: &mut W,
) -> Result<()> {
    for epoch in 0..num_epochs {
        trainer.train(epoch)?;
        progress.inc(1);

        let metrics = trainer.evaluate(epoch)?;
        let table = render_metrics("Evaluation Metrics", &metrics);
        progress.suspend(|| writeln!(out, "{table}"))?;
    }
    Ok(())
}

pub fn epoch_progress(num_epochs: usize) -> ProgressBar {
    let progress = ProgressBar::new(num_epochs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} epochs [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#*-"),
    );
    progress.set_message("Training...");
    progress
}

/// Builds the setup bundle, then trains and evaluates for `args.num_train_epochs`.
pub fn train<B: AutodiffBackend>(
    train_path: &Path,
    test_path: &Path,
    source_lang: &str,
    target_lang: &str,
    size: &str,
    options: &SetupOptions,
    args: TrainingArgs,
    device: B::Device,
) -> Result<()> {
    B::seed(args.seed);

    let bundle = setup::<B>(
        train_path,
        test_path,
        source_lang,
        target_lang,
        size,
        options,
        &device,
    )?;
    tracing::info!(
        "Train dataset size: {}, test dataset size: {}, checkpoint: {}",
        bundle.train_dataset.len(),
        bundle.test_dataset.len(),
        bundle.checkpoint
    );

    let optim = AdamWConfig::new()
        .with_weight_decay(args.weight_decay)
        .init::<B, Seq2SeqModel<B>>();
    let num_epochs = args.num_train_epochs;
    let mut trainer = Seq2SeqTrainer::new(bundle, args, optim, device)?;

    let progress = epoch_progress(num_epochs);
    run_epochs(&mut trainer, num_epochs, &progress, &mut std::io::stdout())?;
    progress.finish();

    println!("Training complete!");
    Ok(())
}
