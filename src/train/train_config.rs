use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};

use crate::data::normalize::Normalizer;
use crate::data::partition::SplitRequest;
use crate::error::{Error, Result};
use crate::model::variant::ArchitectureConfig;
use crate::tracking::jsonl::JsonlSink;
use crate::tracking::live::LiveSink;
use crate::tracking::sink::{MemorySink, TrackingSink};

/// Where run metrics go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingConfig {
    /// One JSON object per line at `path`.
    Jsonl { path: PathBuf },
    /// HTTP server with a live event stream, e.g. `127.0.0.1:7878`.
    Live { addr: String },
    /// Discarded when the run ends.
    Memory,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig::Jsonl { path: PathBuf::from("runs/metrics.jsonl") }
    }
}

impl TrackingConfig {
    pub fn open(&self) -> Result<Box<dyn TrackingSink>> {
        Ok(match self {
            TrackingConfig::Jsonl { path } => Box::new(JsonlSink::create(path)?),
            TrackingConfig::Live { addr } => Box::new(LiveSink::bind(addr)?),
            TrackingConfig::Memory => Box::new(MemorySink::new()),
        })
    }
}

/// Everything needed to start a training run. Only `data_dir` and
/// `learning_rate` are required in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_train_size")]
    pub train_size: f64,
    #[serde(default = "default_val_size")]
    pub val_size: f64,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_tracking_project")]
    pub tracking_project: String,
    #[serde(default)]
    pub tracking_entity: Option<String>,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default = "default_partitions_id")]
    pub partitions_id: String,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Classes counted in each chip's proportion vector.
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_val_sample_size")]
    pub val_sample_size: usize,
    #[serde(default)]
    pub normalizer: Normalizer,
    #[serde(default)]
    pub architecture: ArchitectureConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

fn default_batch_size() -> usize { 32 }
fn default_train_size() -> f64 { 0.7 }
fn default_val_size() -> f64 { 0.2 }
fn default_test_size() -> f64 { 0.1 }
fn default_tracking_project() -> String { "qm4labelproportions".to_owned() }
fn default_tags() -> Vec<String> { vec!["segmentation".to_owned()] }
fn default_partitions_id() -> String { "aschips".to_owned() }
fn default_cache_size() -> usize { 10000 }
fn default_shuffle() -> bool { true }
fn default_num_classes() -> usize { 3 }
fn default_epochs() -> usize { 10 }
fn default_val_sample_size() -> usize { 10 }

impl RunConfig {
    pub fn new(data_dir: impl Into<PathBuf>, learning_rate: f64) -> RunConfig {
        RunConfig {
            data_dir: data_dir.into(),
            learning_rate,
            batch_size: default_batch_size(),
            train_size: default_train_size(),
            val_size: default_val_size(),
            test_size: default_test_size(),
            tracking_project: default_tracking_project(),
            tracking_entity: None,
            tags: default_tags(),
            partitions_id: default_partitions_id(),
            cache_size: default_cache_size(),
            shuffle: default_shuffle(),
            seed: None,
            num_classes: default_num_classes(),
            epochs: default_epochs(),
            val_sample_size: default_val_sample_size(),
            normalizer: Normalizer::default(),
            architecture: ArchitectureConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }

    /// The request handed to the data generator at run init.
    pub fn split_request(&self) -> SplitRequest {
        SplitRequest {
            basedir: self.data_dir.clone(),
            partitions_id: self.partitions_id.clone(),
            batch_size: self.batch_size,
            train_size: self.train_size,
            val_size: self.val_size,
            test_size: self.test_size,
            cache_size: self.cache_size,
            shuffle: self.shuffle,
            seed: self.seed,
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<RunConfig> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
        let config: RunConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                config.learning_rate
            )));
        }
        Ok(config)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }
}
