use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A model-contract operation was invoked on a contract that does not define it.
    #[error("`{0}` is not implemented for this model")]
    NotImplemented(&'static str),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("{0} partition contains no batches")]
    EmptyPartition(&'static str),
    #[error("unknown backbone `{0}`")]
    UnknownBackbone(String),
    #[error("pretrained weights at {path}: {msg}")]
    Pretrained { path: PathBuf, msg: String },
    #[error("{0}: backward called before forward")]
    NoForwardState(&'static str),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("tracking sink error: {0}")]
    Tracking(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io { path: path.into(), source }
    }
}
