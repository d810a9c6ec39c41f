//! Error types for the realtime core

use thiserror::Error;
use vlant_storage::StorageError;

/// Errors raised while handling client events. None of these tear down the
/// connection; the session reports them to the offending client and keeps
/// its current state.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("event {event} is not valid in state {state}")]
    InvalidState {
        event: &'static str,
        state: &'static str,
    },

    #[error("event identity does not match the identified user")]
    IdentityMismatch,

    #[error("message does not belong to the joined room")]
    WrongRoom,

    #[error("unknown conversation")]
    UnknownConversation,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
