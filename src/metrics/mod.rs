pub mod iou;

pub use iou::{iou, mean_iou};
