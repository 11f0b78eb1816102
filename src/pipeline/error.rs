use super::checkpoint::CheckpointError;
use super::source::SourceError;
use crate::config::ConfigError;
use crate::sink_core::SinkError;

/// Errors that abort a cycle or stop the pipeline
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Checkpoint(CheckpointError),
    /// Batch listing or reading still failing after the retry budget
    SourceUnavailable(SourceError),
    /// A sink still failing after the retry budget; the cursor was not advanced
    SinkWriteFailure { sink: String, reason: SinkError },
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err)
    }
}

impl From<CheckpointError> for PipelineError {
    fn from(err: CheckpointError) -> Self {
        PipelineError::Checkpoint(err)
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        PipelineError::SourceUnavailable(err)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "Configuration error: {}", e),
            PipelineError::Checkpoint(e) => write!(f, "{}", e),
            PipelineError::SourceUnavailable(e) => write!(f, "Source unavailable: {}", e),
            PipelineError::SinkWriteFailure { sink, reason } => {
                write!(f, "Sink {} write failed: {}", sink, reason)
            }
        }
    }
}

impl std::error::Error for PipelineError {}
