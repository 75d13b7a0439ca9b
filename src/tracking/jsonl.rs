use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::tracking::sink::{MetricRecord, RunInfo, TrackingSink};

/// Line format of a [`JsonlSink`] file.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line<'a> {
    Run(&'a RunInfo),
    Metric(&'a MetricRecord),
    Finish { steps: u64 },
}

/// Appends one JSON object per line: the run header, then every metric,
/// then a closing `finish` line.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    out: BufWriter<File>,
    steps: u64,
    started: bool,
}

impl JsonlSink {
    /// Creates (or truncates) the file at `path`, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<JsonlSink> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        Ok(JsonlSink { path: path.to_owned(), out: BufWriter::new(file), steps: 0, started: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &Line) -> Result<()> {
        serde_json::to_writer(&mut self.out, line)?;
        self.out.write_all(b"\n").map_err(|e| Error::io(&self.path, e))
    }
}

impl TrackingSink for JsonlSink {
    fn init(&mut self, run: &RunInfo) -> Result<()> {
        if self.started {
            return Err(Error::Tracking("run already initialized".to_owned()));
        }
        self.write_line(&Line::Run(run))?;
        self.started = true;
        self.out.flush().map_err(|e| Error::io(&self.path, e))
    }

    fn log(&mut self, metrics: &[(&str, f64)]) -> Result<()> {
        if !self.started {
            return Err(Error::Tracking("log called before init".to_owned()));
        }
        for &(name, value) in metrics {
            let record = MetricRecord { step: self.steps, name: name.to_owned(), value };
            self.write_line(&Line::Metric(&record))?;
        }
        self.steps += 1;
        self.out.flush().map_err(|e| Error::io(&self.path, e))
    }

    fn finish(&mut self) -> Result<()> {
        self.write_line(&Line::Finish { steps: self.steps })?;
        self.out.flush().map_err(|e| Error::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::sink::sample_run;

    #[test]
    fn writes_header_metrics_and_footer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runs").join("metrics.jsonl");
        let mut sink = JsonlSink::create(&path).unwrap();
        sink.init(&sample_run()).unwrap();
        sink.log(&[("train/loss", 0.25)]).unwrap();
        sink.log(&[("val/loss", f64::INFINITY)]).unwrap();
        sink.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["event"], "run");
        assert_eq!(lines[0]["name"], "custom_unet-20240101[1200]");
        assert_eq!(lines[1]["value"], 0.25);
        assert_eq!(lines[2]["step"], 1);
        assert!(lines[2]["value"].is_null());
        assert_eq!(lines[3]["steps"], 2);
    }
}
