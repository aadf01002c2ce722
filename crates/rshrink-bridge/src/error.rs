//! Bridge error types.

use thiserror::Error;

use crate::protocol::RemoteError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker stopped before answering.
    #[error("worker terminated")]
    Terminated,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("worker answered a {request} request with the wrong response")]
    Protocol { request: &'static str },
}
