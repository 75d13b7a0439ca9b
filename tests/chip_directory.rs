use std::path::Path;

use chipseg::data::{DataGenerator, Partition, SplitRequest};
use chipseg::model::BackboneKeywords;
use chipseg::train::TrackingConfig;
use chipseg::{ArchitectureConfig, ChipDirectoryGenerator, Error, RunConfig, Split, Trainer, UnetVariant};

/// Writes `<root>/aschips/tile<g>/chip<c>_{rgb,label}.png` for `groups`
/// tiles of two 12×12 chips each; the label of tile `g` is a diagonal band
/// of class 2 over class `g % 2`.
fn write_dataset(root: &Path, groups: u8) {
    for g in 0..groups {
        let dir = root.join("aschips").join(format!("tile{:02}", g));
        std::fs::create_dir_all(&dir).unwrap();
        for c in 0..2u8 {
            let labels = image::GrayImage::from_fn(12, 12, |x, y| {
                image::Luma([if x.abs_diff(y) < 3 { 2 } else { g % 2 }])
            });
            let rgb = image::RgbImage::from_fn(12, 12, |x, y| {
                let v = labels.get_pixel(x, y)[0];
                image::Rgb([v * 100, 20 * c, g])
            });
            rgb.save(dir.join(format!("chip{}_rgb.png", c))).unwrap();
            labels.save(dir.join(format!("chip{}_label.png", c))).unwrap();
        }
    }
}

fn run_config(root: &Path) -> RunConfig {
    let mut config = RunConfig::new(root, 5e-3);
    config.batch_size = 2;
    config.train_size = 0.6;
    config.val_size = 0.2;
    config.test_size = 0.2;
    config.seed = Some(21);
    config.architecture = ArchitectureConfig::Backbone(BackboneKeywords {
        seed: Some(8),
        ..BackboneKeywords::new("vgg-s")
    });
    config.tracking = TrackingConfig::Jsonl { path: root.join("runs").join("metrics.jsonl") };
    config
}

#[test]
fn trains_from_a_chip_directory() {
    let tmp = tempfile::tempdir().unwrap();
    write_dataset(tmp.path(), 5);
    let config = run_config(tmp.path());
    config.save_json(tmp.path().join("run.json")).unwrap();
    let config = RunConfig::load_json(tmp.path().join("run.json")).unwrap();

    let generator = ChipDirectoryGenerator::new(config.num_classes);
    let sink = config.tracking.open().unwrap();
    let variant = UnetVariant::from(config.architecture.clone());
    let mut trainer = Trainer::init_run(variant, &generator, sink, &config).unwrap();

    assert_eq!(trainer.partition(Split::Train).num_batches(), 3);
    let history = trainer.fit(1).unwrap();
    assert_eq!(history[0].steps, 3);

    let sample = trainer.get_val_sample(2).unwrap();
    assert_eq!(sample.len(), 2);
    assert!(sample.labels.data.contains(&1.0));
    let report = trainer.evaluate(Split::Test).unwrap();
    assert_eq!(report.samples, 2);
    trainer.log(&[("test/loss", report.mean_loss), ("test/iou", report.mean_iou)]).unwrap();
    trainer.finish().unwrap();

    let log = std::fs::read_to_string(tmp.path().join("runs").join("metrics.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines[0]["event"], "run");
    assert!(lines[0]["name"].as_str().unwrap().starts_with("vgg-s_unet-"));
    let named = |name: &str| lines.iter().filter(|l| l["name"] == name).count();
    assert_eq!(named("train/loss"), 3);
    assert_eq!(named("val/loss"), 3);
    assert_eq!(named("test/iou"), 1);
    assert_eq!(lines.last().unwrap()["event"], "finish");
    assert_eq!(lines.last().unwrap()["steps"], 7);
}

#[test]
fn shuffled_group_assignment_is_reproducible() {
    let tmp = tempfile::tempdir().unwrap();
    write_dataset(tmp.path(), 10);
    let request = SplitRequest { seed: Some(4), ..run_config(tmp.path()).split_request() };
    let generator = ChipDirectoryGenerator::new(3);

    let test_blues = |request: &SplitRequest| {
        let mut splits = generator.split(request).unwrap();
        let mut blues = Vec::new();
        for i in 0..splits.test.num_batches() {
            let batch = splits.test.get_batch(i).unwrap();
            blues.extend((0..batch.len()).map(|n| batch.images.get(n, 0, 0, 2)));
        }
        blues.sort_by(|a, b| a.partial_cmp(b).unwrap());
        blues
    };
    let a = test_blues(&request);
    assert_eq!(a, test_blues(&request));
    // test chips come in whole tiles: both chips of a tile share a blue value
    assert_eq!(a.len(), 4);
    assert_eq!(a[0], a[1]);
    assert_eq!(a[2], a[3]);
}

#[test]
fn missing_data_dir_fails_init() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = run_config(tmp.path());
    config.tracking = TrackingConfig::Memory;
    let sink = config.tracking.open().unwrap();
    let variant = UnetVariant::from(config.architecture.clone());
    let generator = ChipDirectoryGenerator::new(3);
    let err = Trainer::init_run(variant, &generator, sink, &config).unwrap_err();
    assert!(matches!(err, Error::Dataset(_)));
}
