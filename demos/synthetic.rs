use chipseg::model::BackboneKeywords;
use chipseg::{BackboneUnet, Chip, InMemoryGenerator, MemorySink, RunConfig, Split, Trainer};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// A 20×20 chip with a bright square of class 2 on a dark background of
/// classes 0 and 1.
fn synthetic_chip(rng: &mut StdRng) -> Chip {
    let size = 20;
    let (top, left) = (rng.gen_range(0..12), rng.gen_range(0..12));
    let side = rng.gen_range(4..9);
    let mut rgb = Vec::with_capacity(size * size * 3);
    let mut labels = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let inside = (top..top + side).contains(&y) && (left..left + side).contains(&x);
            let class = if inside { 2 } else { (x + y) as i32 % 2 };
            let base: u8 = if inside { 200 } else { 40 };
            for _ in 0..3 {
                rgb.push(base.saturating_add(rng.gen_range(0..30)));
            }
            labels.push(class);
        }
    }
    Chip::new(size, size, rgb, labels).expect("chip dimensions are consistent")
}

fn main() {
    let mut rng = StdRng::seed_from_u64(11);
    let chips = (0..40).map(|_| synthetic_chip(&mut rng)).collect();
    let generator = InMemoryGenerator::new(chips, 3);

    let mut config = RunConfig::new("synthetic", 0.01);
    config.batch_size = 4;
    config.seed = Some(3);
    let unet = BackboneUnet::new(BackboneKeywords { seed: Some(5), ..BackboneKeywords::new("vgg-s") });

    let mut trainer = Trainer::init_run(unet, &generator, MemorySink::new(), &config)
        .expect("synthetic run initializes");
    println!("run {}", trainer.run_name());

    for stats in trainer.fit(5).expect("training succeeds") {
        println!(
            "Epoch {}: train loss = {:.6}, val loss = {:.6} ({} ms)",
            stats.epoch, stats.train_loss, stats.val_loss, stats.elapsed_ms
        );
    }

    let sample = trainer.get_val_sample(4).expect("validation sample");
    for (i, iou) in sample.ious(0.5, &[0, 1]).expect("iou").iter().enumerate() {
        println!("Sample {i}: iou = {iou:.3}");
    }
    let report = trainer.evaluate(Split::Test).expect("evaluation");
    println!("Test: loss = {:.6}, iou = {:.3}", report.mean_loss, report.mean_iou);

    let sink = trainer.finish().expect("finish");
    println!("{} metric records logged", sink.records.len());
}
