//! Error taxonomy for the protocol engine.
//!
//! Each layer gets its own `thiserror` enum, following the same shape as
//! `audio_seg::SegmentationError`: one error type per concern, `#[from]`
//! conversions where a lower layer's failure is itself a higher layer's
//! variant, and a `Result<T>` alias alongside the type.

use uuid::Uuid;

/// Failures from the transport (I/O, closed connection, etc).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures decoding or sequencing wire events.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("unknown reference: {0}")]
    UnknownReference(String),
}

impl ProtocolError {
    pub fn unknown_stage(id: Uuid) -> Self {
        Self::UnknownReference(format!("stage {id} was never announced"))
    }

    pub fn unknown_content(id: Uuid) -> Self {
        Self::UnknownReference(format!("content {id} was never announced"))
    }
}

/// Failures from a host attempting an illegal local send (no frame transmitted).
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("operation not valid in current state: {0}")]
    WrongState(String),
}

/// Unifying error for host code that wants a single `Result<T, EngineError>`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
