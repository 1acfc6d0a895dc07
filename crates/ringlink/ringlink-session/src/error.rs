use crate::protocol::Response;
use crate::state::SessionState;
use ringlink_ring::RingError;
use std::error::Error;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {op} while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("no port at index {0}")]
    NoSuchPort(usize),

    #[error("port {0} is already in use")]
    PortBusy(usize),

    #[error("port i/o failed")]
    Port(#[source] io::Error),

    #[error("ring buffer error")]
    Ring(#[from] RingError),

    #[error("a clear-read-buffer handshake is already in progress")]
    FlushInProgress,

    #[error("session closed")]
    Closed,

    #[error("timed out waiting for {wanted} bytes ({available} available)")]
    Timeout { wanted: usize, available: usize },

    #[error("worker reported: {0}")]
    Remote(String),

    #[error("unexpected reply from worker: {0:?}")]
    UnexpectedReply(Response),

    #[error("worker is no longer running")]
    WorkerGone,

    #[error("malformed request")]
    Decode(#[from] serde_json::Error),
}

/// Flattens an error and its sources into one line for an `error` reply.
pub(crate) fn fault_detail(err: &dyn Error) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_includes_sources() {
        let err = SessionError::Port(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        assert_eq!(fault_detail(&err), "port i/o failed: no such device");
    }
}
