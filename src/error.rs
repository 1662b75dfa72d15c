use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipeError {
    /// A stage could not be started. All processes and pipes belonging to the
    /// execution have been torn down by the time this is returned.
    #[error("stage {stage} ({program}) failed to start: {source}")]
    Launch {
        stage: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    /// A piped, multi-stage object was used where a single argument was expected.
    #[error("invalid composition: {0}")]
    InvalidComposition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PipeError {
    /// Index of the stage that failed to launch, if this is a launch failure.
    pub fn stage(&self) -> Option<usize> {
        match self {
            PipeError::Launch { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
