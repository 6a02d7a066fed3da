pub mod attention;
mod backend;
pub mod bleu;
pub mod checkpoint;
pub mod dataset;
pub mod evaluate;
pub mod model;
pub mod preprocess;
pub mod report;
pub mod setup;
pub mod tokenizer;
pub mod train;

pub use backend::TrainBackend;
pub use dataset::{BatchEncoding, BatchEncodingDataset, Seq2SeqCollator};
pub use evaluate::{Evaluator, Metrics};
pub use preprocess::{PreprocessConfig, Preprocessor};
pub use setup::{SetupOptions, TrainingSetup, setup};
pub use train::{EpochTrainer, Seq2SeqTrainer, TrainingArgs, run_epochs, train};
