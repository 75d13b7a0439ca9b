use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};

/// Configuration record attached to a run when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
    /// Requested split proportions.
    pub train_size: f64,
    pub val_size: f64,
    pub test_size: f64,
}

/// Everything a sink learns about a run at `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub project: String,
    pub entity: Option<String>,
    pub name: String,
    pub tags: Vec<String>,
    pub config: RunSummary,
}

/// One logged scalar. `step` counts `log` calls, starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub step: u64,
    pub name: String,
    /// Non-finite values are written as JSON `null`.
    pub value: f64,
}

/// Destination for run metadata and scalar metrics.
///
/// A sink is owned by one run: `init` once, any number of `log` calls, then
/// `finish`. Each `log` call is one step.
pub trait TrackingSink {
    fn init(&mut self, run: &RunInfo) -> Result<()>;

    fn log(&mut self, metrics: &[(&str, f64)]) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: TrackingSink + ?Sized> TrackingSink for Box<S> {
    fn init(&mut self, run: &RunInfo) -> Result<()> {
        (**self).init(run)
    }

    fn log(&mut self, metrics: &[(&str, f64)]) -> Result<()> {
        (**self).log(metrics)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Keeps everything in memory; useful for tests and short experiments.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub run: Option<RunInfo>,
    pub records: Vec<MetricRecord>,
    pub finished: bool,
    steps: u64,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// Values logged under `name`, in order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records.iter().filter(|r| r.name == name).map(|r| r.value).collect()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl TrackingSink for MemorySink {
    fn init(&mut self, run: &RunInfo) -> Result<()> {
        if self.run.is_some() {
            return Err(Error::Tracking("run already initialized".to_owned()));
        }
        self.run = Some(run.clone());
        Ok(())
    }

    fn log(&mut self, metrics: &[(&str, f64)]) -> Result<()> {
        if self.run.is_none() {
            return Err(Error::Tracking("log called before init".to_owned()));
        }
        let step = self.steps;
        self.records.extend(metrics.iter().map(|&(name, value)| MetricRecord {
            step,
            name: name.to_owned(),
            value,
        }));
        self.steps += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_run() -> RunInfo {
    RunInfo {
        project: "qm4labelproportions".to_owned(),
        entity: None,
        name: "custom_unet-20240101[1200]".to_owned(),
        tags: vec!["segmentation".to_owned()],
        config: RunSummary {
            learning_rate: 1e-3,
            batch_size: 32,
            trainable_params: 10,
            non_trainable_params: 0,
            train_size: 0.7,
            val_size: 0.2,
            test_size: 0.1,
        },
    }
}
