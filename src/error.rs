use thiserror::Error;

/// Errors produced by the traversal engine.
///
/// Variants map directly onto the error taxonomy the engine follows:
/// fatal-config and fatal-invariant errors abort the run; soft-I/O and
/// advisory conditions are logged via `tracing` and do not appear here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device or filesystem could not be opened, or the target path does not
    /// resolve to a usable object.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed on-disk metadata the backend cannot parse.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// An accounting invariant was violated (reference-count underflow, heap
    /// overflow, an inode finishing with undelivered blocks). Indicates a
    /// bug in the engine, not a filesystem defect.
    #[error("invariant violated: {0}")]
    FatalInvariant(&'static str),

    /// The client callback requested early termination.
    #[error("scan cancelled by callback")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
