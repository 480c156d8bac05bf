use thiserror::Error;

use crate::bridge::TransportError;
use crate::dispatch::TaskFailure;
use crate::widget::WidgetId;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("device is disposed")]
    DeviceDisposed,
    #[error("failed to execute runnable: {0}")]
    FailedExec(#[from] TaskFailure),
    #[error("invalid thread access")]
    InvalidThread,
    #[error("a display already exists on this thread")]
    DisplayExists,
    #[error("widget {0} is disposed")]
    WidgetDisposed(WidgetId),
    #[error("unknown widget {0}")]
    UnknownWidget(WidgetId),
    #[error("bridge session is dead")]
    SessionDead,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BridgeError {
    /// True for failures that mean the owning context is gone rather than
    /// that a single operation went wrong.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::DeviceDisposed | Self::SessionDead)
    }
}
