pub mod sink;
pub mod jsonl;
pub mod live;

pub use sink::{MemorySink, MetricRecord, RunInfo, RunSummary, TrackingSink};
pub use jsonl::JsonlSink;
pub use live::LiveSink;
