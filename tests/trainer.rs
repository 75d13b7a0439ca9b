use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chipseg::data::{ChipPartition, DataGenerator, Partition, Proportions, SplitRequest, Splits};
use chipseg::model::BackboneKeywords;
use chipseg::network::backbone::lookup;
use chipseg::{
    BackboneUnet, Chip, Error, GenericUnet, InMemoryGenerator, MaskBatch, MemorySink,
    ModelContract, RunConfig, Split, Trainer, TrainerState, UnetModel,
};

/// 12×12 chips crop to 8×8, which the three-level `vgg-s` encoder accepts.
fn chips(n: usize) -> Vec<Chip> {
    (0..n)
        .map(|i| {
            let labels: Vec<i32> = (0..144).map(|c| ((c / 12 + i) % 3) as i32).collect();
            let rgb = labels.iter().flat_map(|&l| [l as u8 * 100, 30, i as u8]).collect();
            Chip::new(12, 12, rgb, labels).unwrap()
        })
        .collect()
}

fn config() -> RunConfig {
    let mut config = RunConfig::new("unused", 1e-3);
    config.batch_size = 2;
    config.train_size = 0.6;
    config.val_size = 0.2;
    config.test_size = 0.2;
    config.seed = Some(17);
    config
}

fn backbone(freeze: bool) -> BackboneUnet {
    BackboneUnet::new(BackboneKeywords {
        encoder_freeze: freeze,
        seed: Some(1),
        ..BackboneKeywords::new("vgg-s")
    })
}

type TestTrainer = Trainer<BackboneUnet, chipseg::data::ChipPartition, MemorySink>;

fn trainer(freeze: bool) -> TestTrainer {
    let generator = InMemoryGenerator::new(chips(10), 3);
    Trainer::init_run(backbone(freeze), &generator, MemorySink::new(), &config()).unwrap()
}

#[test]
fn init_run_records_run_metadata() {
    let trainer = trainer(false);
    assert_eq!(trainer.state(), TrainerState::Initialized);

    let name = trainer.run_name();
    assert!(name.starts_with("vgg-s_unet-"), "{}", name);
    assert_eq!(name.len(), "vgg-s_unet-".len() + "20240101[1200]".len());
    assert!(name.ends_with(']'));

    let run = trainer.sink().run.as_ref().unwrap();
    assert_eq!(run.project, "qm4labelproportions");
    assert_eq!(run.tags, vec!["segmentation".to_owned()]);
    assert_eq!(run.config.batch_size, 2);
    assert_eq!(run.config.learning_rate, 1e-3);
    let counts = trainer.model().param_counts();
    assert_eq!(run.config.trainable_params, counts.trainable);
    assert_eq!(run.config.non_trainable_params, 0);
    assert_eq!(
        (run.config.train_size, run.config.val_size, run.config.test_size),
        (0.6, 0.2, 0.2)
    );
    assert!(trainer.sink().records.is_empty());
}

#[test]
fn fit_cycles_the_validation_stream() {
    let mut trainer = trainer(false);
    // three training batches per epoch against a single validation batch
    assert_eq!(trainer.partition(Split::Train).num_batches(), 3);
    assert_eq!(trainer.partition(Split::Validation).num_batches(), 1);

    let history = trainer.fit(2).unwrap();
    assert_eq!(trainer.state(), TrainerState::Completed);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| s.steps == 3 && s.total_epochs == 2));

    let sink = trainer.sink();
    assert_eq!(sink.values("train/loss").len(), 6);
    assert_eq!(sink.values("val/loss").len(), 6);
    assert_eq!(sink.steps(), 12);
    assert_eq!(sink.records[0].name, "train/loss");
    assert_eq!(sink.records[1].name, "val/loss");
    assert_eq!(trainer.optimizer().iterations(), 6);

    // fit can be resumed
    trainer.fit(1).unwrap();
    assert_eq!(trainer.sink().values("train/loss").len(), 9);
}

/// Chip partition that remembers which batch indices were requested.
struct RecordingPartition {
    inner: ChipPartition,
    requests: Rc<RefCell<Vec<usize>>>,
}

impl Partition for RecordingPartition {
    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn set_batch_size(&mut self, batch_size: usize) {
        self.inner.set_batch_size(batch_size)
    }

    fn num_batches(&self) -> usize {
        self.inner.num_batches()
    }

    fn get_batch(&mut self, index: usize) -> chipseg::Result<chipseg::Batch> {
        self.requests.borrow_mut().push(index);
        self.inner.get_batch(index)
    }

    fn on_epoch_end(&mut self) {
        self.inner.on_epoch_end()
    }
}

/// Records batch requests made against the validation split.
struct RecordingGenerator {
    inner: InMemoryGenerator,
    val_requests: Rc<RefCell<Vec<usize>>>,
}

impl DataGenerator for RecordingGenerator {
    type Partition = RecordingPartition;

    fn split(&self, request: &SplitRequest) -> chipseg::Result<Splits<RecordingPartition>> {
        let splits = self.inner.split(request)?;
        Ok(Splits {
            train: RecordingPartition { inner: splits.train, requests: Rc::default() },
            val: RecordingPartition { inner: splits.val, requests: self.val_requests.clone() },
            test: RecordingPartition { inner: splits.test, requests: Rc::default() },
        })
    }
}

#[test]
fn validation_stream_wraps_around_several_batches() {
    let val_requests = Rc::new(RefCell::new(Vec::new()));
    let generator = RecordingGenerator {
        inner: InMemoryGenerator::new(chips(20), 3),
        val_requests: val_requests.clone(),
    };
    let mut config = config();
    config.train_size = 0.5;
    config.val_size = 0.3;
    config.test_size = 0.2;
    let mut trainer = Trainer::init_run(backbone(false), &generator, MemorySink::new(), &config).unwrap();
    assert_eq!(trainer.partition(Split::Train).num_batches(), 5);
    assert_eq!(trainer.partition(Split::Validation).num_batches(), 3);

    trainer.fit(2).unwrap();
    // ten steps walk the three validation batches in order, restarting at 0
    assert_eq!(*val_requests.borrow(), vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(trainer.sink().values("val/loss").len(), 10);

    val_requests.borrow_mut().clear();
    let sample = trainer.get_val_sample(4).unwrap();
    assert_eq!(sample.len(), 4);
    assert_eq!(*val_requests.borrow(), vec![0]);
    assert_eq!(trainer.partition(Split::Validation).batch_size(), 2);
    assert_eq!(trainer.partition(Split::Validation).num_batches(), 3);
}

#[test]
fn validation_loss_changes_as_the_model_learns() {
    let mut trainer = trainer(false);
    trainer.fit(1).unwrap();
    let val = trainer.sink().values("val/loss");
    // same validation batch every step, different weights each time
    assert_ne!(val[0], val[2]);
    assert!(val.iter().all(|v| v.is_finite()));
}

#[test]
fn val_sample_restores_batch_size() {
    let mut trainer = trainer(false);
    let sample = trainer.get_val_sample(1).unwrap();
    assert_eq!(sample.len(), 1);
    assert_eq!((sample.labels.height, sample.labels.width), (8, 8));
    assert_eq!(sample.images.shape, [1, 8, 8, 3]);
    assert!(sample.labels.data.iter().all(|&v| v == 0.0 || v == 1.0));
    assert!(sample.prediction.data.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(trainer.partition(Split::Validation).batch_size(), 2);

    let ious = sample.ious(0.5, &[0, 1]).unwrap();
    assert!(ious.iter().all(|v| (0.0..=1.0).contains(v)));

    assert!(trainer.get_val_sample(0).is_err());
    assert_eq!(trainer.partition(Split::Validation).batch_size(), 2);

    // larger than the partition: one short batch
    assert_eq!(trainer.get_val_sample(50).unwrap().len(), 2);
    assert_eq!(trainer.partition(Split::Validation).batch_size(), 2);
}

#[test]
fn evaluate_covers_the_whole_partition() {
    let mut trainer = trainer(false);
    let report = trainer.evaluate(Split::Test).unwrap();
    assert_eq!(report.split, Split::Test);
    assert_eq!(report.samples, 2);
    assert_eq!(report.batches, 1);
    assert!(report.mean_loss.is_finite());
    assert!((0.0..=1.0).contains(&report.mean_iou));

    let train = trainer.evaluate(Split::Train).unwrap();
    assert_eq!((train.batches, train.samples), (3, 6));
}

#[test]
fn frozen_encoder_is_left_alone() {
    let mut trainer = trainer(true);
    let encoder = trainer.model().encoder[0].conv_a.weights.value.clone();
    let head = trainer.model().head.weights.value.clone();
    assert!(trainer.sink().run.as_ref().unwrap().config.non_trainable_params > 0);

    trainer.fit(1).unwrap();
    assert_eq!(trainer.model().encoder[0].conv_a.weights.value, encoder);
    assert_ne!(trainer.model().head.weights.value, head);
}

#[test]
fn finish_returns_the_sink() {
    let mut trainer = trainer(false);
    trainer.fit(1).unwrap();
    let sink = trainer.finish().unwrap();
    assert!(sink.finished);
    assert_eq!(sink.steps(), 6);
}

#[test]
fn bare_contract_cannot_start_a_run() {
    let generator = InMemoryGenerator::new(chips(10), 3);
    let err = Trainer::init_run(GenericUnet, &generator, MemorySink::new(), &config()).unwrap_err();
    assert!(matches!(err, Error::NotImplemented("get_name")));
}

#[test]
fn data_errors_surface_unchanged() {
    let mut bad = config();
    bad.test_size = 0.5;
    let generator = InMemoryGenerator::new(chips(10), 3);
    let err = Trainer::init_run(backbone(false), &generator, MemorySink::new(), &bad).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let tiny = InMemoryGenerator::new(chips(1), 3);
    let err = Trainer::init_run(backbone(false), &tiny, MemorySink::new(), &config()).unwrap_err();
    assert!(matches!(err, Error::EmptyPartition("validation")));
}

/// A contract with its own loss that checks proportions reach it.
#[derive(Default)]
struct CountingUnet {
    loss_calls: Cell<usize>,
}

impl ModelContract for CountingUnet {
    fn get_name(&self) -> chipseg::Result<String> {
        Ok("counting_unet".to_owned())
    }

    fn get_model(&self) -> chipseg::Result<UnetModel> {
        UnetModel::new(lookup("vgg-s")?.unet_spec(1, Some(3)))
    }

    fn get_loss(&self, prediction: &MaskBatch, proportions: &Proportions, labels: &MaskBatch) -> chipseg::Result<f64> {
        assert_eq!(proportions.len(), prediction.batch);
        assert!(proportions.iter().all(|p| p.len() == 3));
        self.loss_calls.set(self.loss_calls.get() + 1);
        let n = prediction.data.len() as f64;
        Ok(prediction.data.iter().zip(&labels.data).map(|(p, l)| (p - l).abs()).sum::<f64>() / n)
    }

    fn get_loss_gradient(
        &self,
        prediction: &MaskBatch,
        _: &Proportions,
        labels: &MaskBatch,
    ) -> chipseg::Result<MaskBatch> {
        let n = prediction.data.len() as f64;
        let grad = prediction.data.iter().zip(&labels.data).map(|(p, l)| (p - l).signum() / n).collect();
        MaskBatch::new(prediction.batch, prediction.height, prediction.width, grad)
    }
}

#[test]
fn custom_contracts_plug_into_the_loop() {
    let generator = InMemoryGenerator::new(chips(10), 3);
    let mut trainer =
        Trainer::init_run(CountingUnet::default(), &generator, MemorySink::new(), &config()).unwrap();
    assert!(trainer.run_name().starts_with("counting_unet-"));
    trainer.fit(1).unwrap();
    // one training and one validation loss per step
    assert_eq!(trainer.contract().loss_calls.get(), 6);
}
