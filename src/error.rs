use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("io error on {}: {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock failed on {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid input: {0}")]
    InvalidCommand(String),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("failed to start {slot}: {source}")]
    Spawn {
        slot: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(&'static str),
}

impl Error {
    pub(crate) fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::IoAt { path, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
