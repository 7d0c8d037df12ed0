use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the conversion core.
///
/// A single failed step aborts the conversion in progress; it never
/// disables the graph or the cache for later calls.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown format: {0}")]
    UnknownFormat(String),

    #[error("no conversion path from `{from}` to `{to}`")]
    NoPath { from: String, to: String },

    #[error("converter from `{from}` to `{to}` exited with status {exit_code}")]
    ConverterFailed {
        from: String,
        to: String,
        exit_code: i32,
        log: Vec<String>,
    },

    #[error("failed to move `{src}` to `{dst}`")]
    MoverFailed { src: PathBuf, dst: PathBuf },

    #[error("malformed cache index entry at line {0}")]
    CacheCorrupt(usize),

    #[error("no cached conversion of `{origin}` to `{target}`")]
    CacheMiss { origin: PathBuf, target: String },

    #[error("source file is missing or unreadable: {0}")]
    SourceMissing(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
