use chrono::Local;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::data::batch::Batch;
use crate::data::normalize::Normalizer;
use crate::data::partition::{BatchCursor, DataGenerator, Partition};
use crate::error::{Error, Result};
use crate::metrics::iou::iou;
use crate::model::contract::ModelContract;
use crate::network::unet::UnetModel;
use crate::optim::adam::Adam;
use crate::tracking::sink::{RunInfo, RunSummary, TrackingSink};
use crate::train::epoch_stats::EpochStats;
use crate::train::train_config::RunConfig;
use crate::train::val_sample::{EvalReport, Split, ValSample};

/// Threshold applied to predictions before IoU.
const IOU_THRESHOLD: f64 = 0.5;

/// Lifecycle of a run. A run that has not been initialized has no `Trainer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initialized,
    Training,
    Completed,
}

/// Owns one training run: the model, its optimizer, the three dataset
/// partitions and the tracking sink.
///
/// `fit` can be called repeatedly to keep training; every call walks the
/// training partition once per epoch and, after each step, draws one
/// validation batch from a stream that restarts whenever it runs out.
pub struct Trainer<M, P, S> {
    contract: M,
    model: UnetModel,
    optimizer: Adam,
    normalizer: Normalizer,
    run: RunInfo,
    train: P,
    val: P,
    test: P,
    sink: S,
    state: TrainerState,
}

impl<M, P, S> Trainer<M, P, S>
where
    M: ModelContract,
    P: Partition,
    S: TrackingSink,
{
    /// Builds the model and optimizer, requests the dataset splits and
    /// opens the tracking run. Errors from `generator` are returned as is.
    pub fn init_run<G>(contract: M, generator: &G, mut sink: S, config: &RunConfig) -> Result<Self>
    where
        G: DataGenerator<Partition = P>,
    {
        let name = contract.get_name()?;
        let run_name = format!("{}-{}", name, Local::now().format("%Y%m%d[%H%M]"));

        let model = contract.get_model()?;
        let optimizer = Adam::new(config.learning_rate);
        let counts = model.param_counts();

        let splits = generator.split(&config.split_request())?;

        let run = RunInfo {
            project: config.tracking_project.clone(),
            entity: config.tracking_entity.clone(),
            name: run_name,
            tags: config.tags.clone(),
            config: RunSummary {
                learning_rate: optimizer.learning_rate,
                batch_size: splits.train.batch_size(),
                trainable_params: counts.trainable,
                non_trainable_params: counts.non_trainable,
                train_size: config.train_size,
                val_size: config.val_size,
                test_size: config.test_size,
            },
        };
        sink.init(&run)?;
        info!(
            run = %run.name,
            trainable = counts.trainable,
            non_trainable = counts.non_trainable,
            train_batches = splits.train.num_batches(),
            val_batches = splits.val.num_batches(),
            test_batches = splits.test.num_batches(),
            "run initialized"
        );

        Ok(Trainer {
            contract,
            model,
            optimizer,
            normalizer: config.normalizer,
            run,
            train: splits.train,
            val: splits.val,
            test: splits.test,
            sink,
            state: TrainerState::Initialized,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn run_info(&self) -> &RunInfo {
        &self.run
    }

    pub fn run_name(&self) -> &str {
        &self.run.name
    }

    pub fn contract(&self) -> &M {
        &self.contract
    }

    pub fn model(&self) -> &UnetModel {
        &self.model
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn partition(&self, split: Split) -> &P {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.val,
            Split::Test => &self.test,
        }
    }

    /// Trains for `epochs` passes over the training partition, logging
    /// `train/loss` and `val/loss` once per step.
    pub fn fit(&mut self, epochs: usize) -> Result<Vec<EpochStats>> {
        let mut history = Vec::with_capacity(epochs);
        let mut val_cursor = BatchCursor::new();

        for epoch in 1..=epochs {
            self.state = TrainerState::Training;
            let started = Instant::now();
            let (mut train_total, mut val_total, mut steps) = (0.0, 0.0, 0usize);

            let mut cursor = BatchCursor::new();
            while let Some(batch) = cursor.next(&mut self.train)? {
                let train_loss = self.train_step(&batch)?;
                self.log_scalar("train/loss", train_loss)?;

                let val_batch = self.next_val_batch(&mut val_cursor)?;
                let val_loss = self.batch_loss(&val_batch)?;
                self.log_scalar("val/loss", val_loss)?;

                steps += 1;
                train_total += train_loss;
                val_total += val_loss;
                debug!(epoch, step = steps, train_loss, val_loss, "step");
            }
            self.train.on_epoch_end();

            let stats = EpochStats {
                epoch,
                total_epochs: epochs,
                steps,
                train_loss: train_total / steps.max(1) as f64,
                val_loss: val_total / steps.max(1) as f64,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            info!(
                epoch,
                epochs,
                steps,
                train_loss = stats.train_loss,
                val_loss = stats.val_loss,
                elapsed_ms = stats.elapsed_ms,
                "epoch finished"
            );
            history.push(stats);
        }

        self.state = TrainerState::Completed;
        Ok(history)
    }

    /// One optimizer update on `batch`; returns the loss before the update.
    fn train_step(&mut self, batch: &Batch) -> Result<f64> {
        let (images, labels) = self.normalizer.normalize(&batch.images, &batch.labels)?;

        self.model.zero_grad();
        self.model.set_training(true);
        let prediction = self.contract.predict(&mut self.model, &images);
        self.model.set_training(false);
        let prediction = prediction?;

        let loss = self.contract.get_loss(&prediction, &batch.proportions, &labels)?;
        let grad = self.contract.get_loss_gradient(&prediction, &batch.proportions, &labels)?;
        self.contract.backpropagate(&mut self.model, &grad)?;
        self.optimizer.step(&mut self.model);
        Ok(loss)
    }

    /// Loss of the current model on `batch`, without updating it.
    fn batch_loss(&mut self, batch: &Batch) -> Result<f64> {
        let (images, labels) = self.normalizer.normalize(&batch.images, &batch.labels)?;
        let prediction = self.contract.predict(&mut self.model, &images)?;
        self.contract.get_loss(&prediction, &batch.proportions, &labels)
    }

    /// Next batch of the cyclic validation stream.
    fn next_val_batch(&mut self, cursor: &mut BatchCursor) -> Result<Batch> {
        if let Some(batch) = cursor.next(&mut self.val)? {
            return Ok(batch);
        }
        debug!(after = cursor.position(), "validation stream exhausted, restarting");
        *cursor = BatchCursor::new();
        cursor.next(&mut self.val)?.ok_or(Error::EmptyPartition("validation"))
    }

    fn log_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            warn!(metric = name, value, "non-finite metric");
        }
        self.sink.log(&[(name, value)])
    }

    /// Draws one batch of `n` validation samples, reshuffling the partition
    /// before and after. The partition's batch size is restored even when
    /// drawing fails.
    pub fn get_val_sample(&mut self, n: usize) -> Result<ValSample> {
        if n == 0 {
            return Err(Error::Config("validation sample size must be at least 1".to_owned()));
        }
        let batch_size = self.val.batch_size();
        self.val.set_batch_size(n);
        self.val.on_epoch_end();

        let sample = self.draw_val_sample();
        self.model.clear_cache();

        self.val.set_batch_size(batch_size);
        self.val.on_epoch_end();
        sample
    }

    fn draw_val_sample(&mut self) -> Result<ValSample> {
        let batch = BatchCursor::new()
            .next(&mut self.val)?
            .ok_or(Error::EmptyPartition("validation"))?;
        let (images, labels) = self.normalizer.normalize(&batch.images, &batch.labels)?;
        let prediction = self.contract.predict(&mut self.model, &images)?;
        Ok(ValSample { images, proportions: batch.proportions, labels, prediction })
    }

    /// Loss and target-class IoU over one whole partition.
    pub fn evaluate(&mut self, split: Split) -> Result<EvalReport> {
        let Trainer { contract, model, normalizer, train, val, test, .. } = self;
        let partition = match split {
            Split::Train => train,
            Split::Validation => val,
            Split::Test => test,
        };

        let (mut batches, mut samples) = (0usize, 0usize);
        let (mut loss_total, mut iou_total) = (0.0, 0.0);
        let mut cursor = BatchCursor::new();
        while let Some(batch) = cursor.next(partition)? {
            let (images, labels) = normalizer.normalize(&batch.images, &batch.labels)?;
            let prediction = contract.predict(model, &images)?;
            let loss = contract.get_loss(&prediction, &batch.proportions, &labels)?;
            let scores = iou(
                1,
                &labels.threshold(IOU_THRESHOLD),
                &prediction.threshold(IOU_THRESHOLD),
            )?;

            batches += 1;
            samples += batch.len();
            loss_total += loss * batch.len() as f64;
            iou_total += scores.iter().sum::<f64>();
        }
        model.clear_cache();

        let report = EvalReport {
            split,
            batches,
            samples,
            mean_loss: loss_total / samples as f64,
            mean_iou: iou_total / samples as f64,
        };
        if samples == 0 {
            warn!(split = split.name(), "evaluated an empty partition");
        } else {
            info!(
                split = split.name(),
                samples,
                mean_loss = report.mean_loss,
                mean_iou = report.mean_iou,
                "evaluation finished"
            );
        }
        Ok(report)
    }

    /// Logs arbitrary scalars to the run, as one step.
    pub fn log(&mut self, metrics: &[(&str, f64)]) -> Result<()> {
        for &(name, value) in metrics {
            if !value.is_finite() {
                warn!(metric = name, value, "non-finite metric");
            }
        }
        self.sink.log(metrics)
    }

    /// Closes the tracking run and hands the sink back.
    pub fn finish(mut self) -> Result<S> {
        self.sink.finish()?;
        info!(run = %self.run.name, steps = self.optimizer.iterations(), "run finished");
        Ok(self.sink)
    }
}

impl<M, P, S> std::fmt::Debug for Trainer<M, P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("run", &self.run.name)
            .field("model", &self.model.name())
            .field("state", &self.state)
            .finish()
    }
}
