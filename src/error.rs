use std::io;

use thiserror::Error;

use crate::handler::ProtocolState;

/// Faults that end a connection. Each one is logged by the connection task
/// and never takes the accept loop down with it.
#[derive(Debug, Error)]
pub enum PingError {
    #[error("varint is longer than five bytes")]
    MalformedVarint,
    #[error("byte array length may not be negative")]
    NegativeLength,
    #[error("byte array length {length} exceeds the allowed maximum of {limit}")]
    LengthExceeded { length: i32, limit: usize },
    #[error("unexpected message id {id:#04x} in state {state:?}")]
    UnexpectedMessage { id: i32, state: ProtocolState },
    #[error("requested next state {id} is not allowed")]
    UnexpectedNextState { id: i32 },
    #[error("connection idle for too long")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}
