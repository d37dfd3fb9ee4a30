use crate::upload::backup::BackupError;
use crate::upload::delivery::DeliveryError;

/// Common error type for the capture and upload pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Out-of-range coordinates or a malformed detection. The offending
    /// event is dropped and the pipeline keeps running.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Network failure, timeout or a non-2xx response. Handled by backing
    /// up the batch locally.
    #[error("transient delivery failure: {0}")]
    TransientDelivery(#[from] DeliveryError),
    /// Backup storage is unusable. Fatal for the upload worker only.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(#[from] BackupError),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether the error only affects the single event that produced it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::TransientDelivery(_))
    }
}
