//! Controller side of a serial session.

use crate::config::SessionConfig;
use crate::doorbell::Doorbell;
use crate::error::SessionError;
use crate::port::{PortOptions, SerialPort};
use crate::protocol::{LoopStage, Request, Response, RingAttach};
use crate::state::SessionState;
use crate::worker::{Worker, WorkerHandle};
use ringlink_ring::{RingBuffer, RingReader, RingWriter};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One open (or openable) serial session.
///
/// The session writes the outbound ring and reads the inbound ring directly;
/// only lifecycle requests go through the worker. Every data operation
/// requires [`SessionState::Ready`].
pub struct Session {
    state: SessionState,
    outbound: RingWriter,
    inbound: RingReader,
    doorbell: Doorbell,
    worker: WorkerHandle,
    faults: Vec<(LoopStage, String)>,
}

impl Session {
    /// Creates an unopened session with a fresh pair of in-process rings.
    pub fn new(worker: WorkerHandle, config: &SessionConfig) -> Result<Self, SessionError> {
        let outbound = RingBuffer::anonymous(config.capacity)?;
        let inbound = RingBuffer::anonymous(config.capacity)?;
        Self::with_rings(worker, outbound, inbound)
    }

    /// Creates an unopened session over existing rings.
    ///
    /// Claims the writer of `outbound` and the reader of `inbound`.
    pub fn with_rings(
        worker: WorkerHandle,
        outbound: RingBuffer,
        inbound: RingBuffer,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            state: SessionState::Unopened,
            outbound: outbound.writer()?,
            inbound: inbound.reader()?,
            doorbell: Doorbell::new(),
            worker,
            faults: Vec::new(),
        })
    }

    /// Spawns a worker for `port` and opens a session on it.
    pub async fn connect<P: SerialPort>(
        port: P,
        options: PortOptions,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let worker = Worker::spawn(vec![port], config.clone());
        let mut session = Self::new(worker, &config)?;
        session.open(0, options).await?;
        Ok(session)
    }

    /// Opens the worker's port number `selector` with both rings at the empty
    /// marker.
    ///
    /// If the port fails to open the session stays [`SessionState::Unopened`]
    /// and may be opened again.
    pub async fn open(&mut self, selector: usize, options: PortOptions) -> Result<(), SessionError> {
        self.state.require("open", SessionState::Unopened)?;
        self.state = SessionState::Opening;
        self.outbound.reset();
        self.inbound.rewind();

        let request = Request::Open {
            port: selector,
            options,
            outbound: RingAttach::Shared(self.outbound.ring().clone()),
            inbound: RingAttach::Shared(self.inbound.ring().clone()),
            doorbell: Some(self.doorbell.clone()),
        };
        match self.call(request).await {
            Ok(Response::Ready) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Ok(other) => {
                self.state = SessionState::Unopened;
                Err(SessionError::UnexpectedReply(other))
            }
            Err(err) => {
                self.state = SessionState::Unopened;
                Err(err)
            }
        }
    }

    /// Appends `bytes` to the outbound ring and wakes the drain loop.
    ///
    /// # Errors
    /// Payloads longer than the ring's `max_write` are refused whole.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.state.require("write", SessionState::Ready)?;
        self.outbound.write(bytes)?;
        self.doorbell.ring_written();
        Ok(())
    }

    /// Everything ingested since the last read.
    pub fn read(&mut self) -> Result<Vec<u8>, SessionError> {
        self.state.require("read", SessionState::Ready)?;
        Ok(self.inbound.read())
    }

    /// Bytes waiting to be read.
    pub fn available(&self) -> Result<usize, SessionError> {
        self.state.require("read", SessionState::Ready)?;
        Ok(self.inbound.available())
    }

    /// Waits until `len` bytes have been ingested and consumes exactly those.
    ///
    /// On timeout nothing is consumed; whatever arrived stays readable.
    pub async fn recv_exact(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, SessionError> {
        self.state.require("receive", SessionState::Ready)?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking so an ingest in between is not missed.
            let ingested = self.doorbell.ingested();
            if self.inbound.available() >= len {
                let mut out = Vec::with_capacity(len);
                self.inbound.read_into(&mut out, len);
                return Ok(out);
            }
            if tokio::time::timeout_at(deadline, ingested).await.is_err() {
                return Err(SessionError::Timeout {
                    wanted: len,
                    available: self.inbound.available(),
                });
            }
        }
    }

    /// Discards unread inbound data.
    ///
    /// Waits at most `timeout` for a chunk already in flight to land, then
    /// the inbound ring and this session's read position both go back to the
    /// empty marker.
    pub async fn clear_read_buffer(&mut self, timeout: Duration) -> Result<(), SessionError> {
        self.state.require("clear read buffer", SessionState::Ready)?;
        match self.call(Request::clear_read_buffer(timeout)).await? {
            Response::ClearReadBuffer => {
                self.inbound.rewind();
                Ok(())
            }
            other => Err(SessionError::UnexpectedReply(other)),
        }
    }

    /// Drives the port's DTR and RTS lines.
    pub async fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<(), SessionError> {
        self.state.require("set signals", SessionState::Ready)?;
        match self.call(Request::SetSignals { dtr, rts }).await? {
            Response::SignalsSet => Ok(()),
            other => Err(SessionError::UnexpectedReply(other)),
        }
    }

    /// Stops both loops and closes the port.
    ///
    /// The session is closed afterwards even if the port reported an error.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.state.require("close", SessionState::Ready)?;
        self.state = SessionState::Closing;
        let reply = self.call(Request::Close).await;
        self.state = SessionState::Closed;
        match reply? {
            Response::Closed => Ok(()),
            other => Err(SessionError::UnexpectedReply(other)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Largest payload a single [`Session::write`] accepts.
    pub fn max_write(&self) -> usize {
        self.outbound.ring().max_write()
    }

    /// Loop faults reported by the worker since the last call.
    pub fn take_faults(&mut self) -> Vec<(LoopStage, String)> {
        self.collect_pending();
        std::mem::take(&mut self.faults)
    }

    fn collect_pending(&mut self) {
        while let Some(resp) = self.worker.try_recv() {
            match resp {
                Response::LoopFault { stage, detail } => self.record_fault(stage, detail),
                other => debug!(reply = ?other, "discarding stale reply"),
            }
        }
    }

    fn record_fault(&mut self, stage: LoopStage, detail: String) {
        warn!(%stage, %detail, "session loop failed");
        self.faults.push((stage, detail));
    }

    /// Sends `request` and waits for its reply, setting aside loop faults.
    async fn call(&mut self, request: Request) -> Result<Response, SessionError> {
        self.collect_pending();
        self.worker.send(request)?;
        loop {
            match self.worker.recv().await? {
                Response::LoopFault { stage, detail } => self.record_fault(stage, detail),
                Response::Error { detail } => return Err(SessionError::Remote(detail)),
                other => return Ok(other),
            }
        }
    }
}
