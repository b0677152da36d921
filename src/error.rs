//! Error types untuk client, registry dan server

use std::io;

use thiserror::Error;

use crate::client::RequestId;

/// Terminal classification of a failed request, delivered through the
/// completion callback.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    /// Request was cancelled, either at a checkpoint or while a stage was in flight.
    #[error("request aborted")]
    Aborted,
}

impl RequestError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RequestError::Aborted)
    }
}

/// Synchronous rejection of a submission. No callback fires for these.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("request id {0} is already in flight")]
    DuplicateRequestId(RequestId),
    #[error("invalid address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("client is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request id {0} is already registered")]
    DuplicateRequestId(RequestId),
}

impl From<RegistryError> for SubmitError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateRequestId(id) => SubmitError::DuplicateRequestId(id),
        }
    }
}

/// Returned when work is submitted to a pool that no longer accepts it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("event loop pool is stopped")]
pub struct PoolStopped;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}
