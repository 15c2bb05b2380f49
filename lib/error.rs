// Session error taxonomy
use obex_core::CodecError;
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObexError {
    /// I/O failure or reset on the link. The session is disconnected.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The peer sent something that is not valid OBEX, or a local object
    /// could not be encoded.
    #[error("protocol violation: {0}")]
    Protocol(CodecError),

    #[error("out of memory: {0}")]
    ResourceExhausted(TryReserveError),

    /// The call is not valid in the current session state. Nothing changed.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    #[error("a request is already outstanding")]
    RequestOutstanding,

    #[error("no request is active")]
    NoActiveRequest,

    #[error("transport not connected")]
    NotConnected,

    #[error("operation not available in this mode")]
    WrongMode,

    #[error("session is not a server")]
    NotServer,
}

impl From<CodecError> for ObexError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Alloc(e) => ObexError::ResourceExhausted(e),
            other => ObexError::Protocol(other),
        }
    }
}

impl From<TryReserveError> for ObexError {
    fn from(e: TryReserveError) -> Self {
        ObexError::ResourceExhausted(e)
    }
}

impl ObexError {
    pub fn usage(&self) -> Option<UsageError> {
        match self {
            ObexError::Usage(u) => Some(*u),
            _ => None,
        }
    }
}
