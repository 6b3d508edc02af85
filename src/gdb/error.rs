//! Error types for the debugger-control core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GdbError {
    #[error("failed to launch debugger '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up debugger pipes: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("failed to configure pipe: {0}")]
    PipeFlags(#[from] nix::Error),

    #[error("failed to start {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("debugger process already running")]
    AlreadyRunning,

    #[error("debugger process not running")]
    NotRunning,

    #[error("write to debugger failed after {written} of {total} bytes: {source}")]
    Write {
        written: usize,
        total: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("debugger pipe closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, GdbError>;
