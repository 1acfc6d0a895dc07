//! The I/O-context half of a session.
//!
//! A [`Worker`] owns the acquired ports and, while a session is open, the
//! drain and ingest tasks. It is driven entirely by [`Request`]s and answers
//! each with at most one [`Response`]; faults never take the worker down.

use crate::config::SessionConfig;
use crate::doorbell::Doorbell;
use crate::drain::DrainLoop;
use crate::error::{SessionError, fault_detail};
use crate::ingest::{IngestCommand, IngestLoop};
use crate::port::{PortOptions, SerialPort};
use crate::protocol::{LoopStage, Request, Response, RingAttach};
use crate::shutdown::Shutdown;
use crate::state::SessionState;
use ringlink_ring::{RingBuffer, RingReader, RingWriter};
use std::future::{self, Future};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type FlushFuture = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send>>;
type LoopFault = (LoopStage, SessionError);

struct ActiveSession<P> {
    port: P,
    shutdown: Shutdown,
    doorbell: Doorbell,
    ingest_commands: mpsc::Sender<IngestCommand>,
    inbound: RingBuffer,
    drain: JoinHandle<()>,
    ingest: JoinHandle<()>,
}

pub struct Worker<P> {
    ports: Vec<Option<P>>,
    state: SessionState,
    active: Option<ActiveSession<P>>,
    config: SessionConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
    faults_tx: mpsc::UnboundedSender<LoopFault>,
    faults_rx: mpsc::UnboundedReceiver<LoopFault>,
    /// The clear-read-buffer handshake in progress, if any.
    flush: Option<FlushFuture>,
}

enum Event {
    Request(Option<Request>),
    Fault(LoopFault),
    FlushDone(Result<(), SessionError>),
}

async fn wait_flush(flush: &mut Option<FlushFuture>) -> Result<(), SessionError> {
    match flush.as_mut() {
        Some(fut) => fut.await,
        None => future::pending().await,
    }
}

/// Asks the ingest loop to reset the inbound ring.
///
/// If the loop has already stopped nobody else holds the writer, so the
/// reset is applied directly.
async fn reset_inbound(
    commands: mpsc::Sender<IngestCommand>,
    inbound: RingBuffer,
) -> Result<(), SessionError> {
    let (ack, done) = oneshot::channel();
    if commands.send(IngestCommand::Reset(ack)).await.is_ok() && done.await.is_ok() {
        return Ok(());
    }
    debug!("ingest loop gone, resetting inbound ring directly");
    inbound.writer()?.reset();
    Ok(())
}

/// Attaches both rings and claims the worker's side of each.
///
/// The drain starts from the empty marker and the inbound ring is reset, so a
/// fresh session never replays bytes from an earlier one.
fn claim_rings(
    outbound: RingAttach,
    inbound: RingAttach,
) -> Result<(RingReader, RingWriter, RingBuffer), SessionError> {
    let outbound = outbound.attach()?;
    let inbound = inbound.attach()?;
    let mut reader = outbound.reader()?;
    reader.rewind();
    let mut writer = inbound.writer()?;
    writer.reset();
    Ok((reader, writer, inbound))
}

impl<P: SerialPort> Worker<P> {
    pub fn new(ports: Vec<P>, config: SessionConfig) -> (Self, WorkerHandle) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let worker = Self {
            ports: ports.into_iter().map(Some).collect(),
            state: SessionState::Unopened,
            active: None,
            config,
            requests: req_rx,
            responses: resp_tx,
            faults_tx,
            faults_rx,
            flush: None,
        };
        let handle = WorkerHandle {
            requests: req_tx,
            responses: resp_rx,
        };
        (worker, handle)
    }

    /// Starts a worker on the current tokio runtime.
    pub fn spawn(ports: Vec<P>, config: SessionConfig) -> WorkerHandle {
        let (worker, handle) = Self::new(ports, config);
        tokio::spawn(worker.run());
        handle
    }

    /// Serves requests until every [`WorkerHandle`] is dropped.
    ///
    /// An open session is closed on the way out.
    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                req = self.requests.recv() => Event::Request(req),
                Some(fault) = self.faults_rx.recv() => Event::Fault(fault),
                done = wait_flush(&mut self.flush) => Event::FlushDone(done),
            };

            match event {
                Event::Request(Some(req)) => self.handle(req).await,
                Event::Request(None) => break,
                Event::Fault((stage, err)) => {
                    let detail = fault_detail(&err);
                    error!(%stage, %detail, "loop stopped on a fault");
                    self.reply(Response::LoopFault { stage, detail });
                }
                Event::FlushDone(result) => {
                    self.flush = None;
                    match result {
                        Ok(()) => self.reply(Response::ClearReadBuffer),
                        Err(err) => self.reply_error("clear-read-buffer", &err),
                    }
                }
            }
        }

        if self.state == SessionState::Ready {
            if let Err(err) = self.close().await {
                warn!(error = %fault_detail(&err), "closing session on worker exit failed");
            }
        }
        debug!("worker stopped");
    }

    async fn handle(&mut self, req: Request) {
        let name = req.name();
        let result = match req {
            Request::Open {
                port,
                options,
                outbound,
                inbound,
                doorbell,
            } => self
                .open(port, options, outbound, inbound, doorbell)
                .await
                .map(|()| Some(Response::Ready)),
            Request::Close => self.close().await.map(|()| Some(Response::Closed)),
            Request::ClearReadBuffer { timeout } => self
                .start_flush(Duration::from_millis(timeout))
                .map(|()| None),
            Request::SetSignals { dtr, rts } => self
                .set_signals(dtr, rts)
                .await
                .map(|()| Some(Response::SignalsSet)),
            Request::Unknown => {
                warn!("ignoring unrecognized request");
                Ok(None)
            }
        };

        match result {
            Ok(Some(resp)) => self.reply(resp),
            Ok(None) => {}
            Err(err) => self.reply_error(name, &err),
        }
    }

    fn reply(&self, resp: Response) {
        if self.responses.send(resp).is_err() {
            debug!("controller went away, dropping reply");
        }
    }

    fn reply_error(&self, request: &'static str, err: &SessionError) {
        let detail = fault_detail(err);
        error!(request, %detail, "request failed");
        self.reply(Response::Error { detail });
    }

    async fn open(
        &mut self,
        selector: usize,
        options: PortOptions,
        outbound: RingAttach,
        inbound: RingAttach,
        doorbell: Option<Doorbell>,
    ) -> Result<(), SessionError> {
        self.state.require("open", SessionState::Unopened)?;
        let mut port = self
            .ports
            .get_mut(selector)
            .ok_or(SessionError::NoSuchPort(selector))?
            .take()
            .ok_or(SessionError::PortBusy(selector))?;
        self.state = SessionState::Opening;

        let opened = match claim_rings(outbound, inbound) {
            Ok(rings) => port
                .open(&options)
                .await
                .map(|halves| (rings, halves))
                .map_err(SessionError::Port),
            Err(err) => Err(err),
        };
        let ((reader, writer, inbound), (sink, source)) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                self.ports[selector] = Some(port);
                self.state = SessionState::Unopened;
                return Err(err);
            }
        };

        let shutdown = Shutdown::new();
        let ingest_bell = doorbell.clone().unwrap_or_default();
        let (ingest_commands, commands) = mpsc::channel(1);
        let chunk_size = options.buffer_size.clamp(1, inbound.max_write());

        let drain = DrainLoop {
            reader,
            sink,
            doorbell,
            idle_poll: self.config.drain_idle_poll,
            shutdown: shutdown.subscribe(),
        };
        let ingest = IngestLoop {
            writer,
            source,
            doorbell: ingest_bell.clone(),
            chunk_size,
            commands,
            shutdown: shutdown.subscribe(),
        };

        let faults = self.faults_tx.clone();
        let drain = tokio::spawn(async move {
            if let Err(err) = drain.run().await {
                let _ = faults.send((LoopStage::Drain, err));
            }
        });
        let faults = self.faults_tx.clone();
        let ingest = tokio::spawn(async move {
            if let Err(err) = ingest.run().await {
                let _ = faults.send((LoopStage::Ingest, err));
            }
        });

        self.active = Some(ActiveSession {
            port,
            shutdown,
            doorbell: ingest_bell,
            ingest_commands,
            inbound,
            drain,
            ingest,
        });
        self.state = SessionState::Ready;
        info!(port = selector, baud = options.baud_rate, chunk_size, "session ready");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.state.require("close", SessionState::Ready)?;
        self.state = SessionState::Closing;

        if self.flush.take().is_some() {
            self.reply_error("clear-read-buffer", &SessionError::Closed);
        }

        let result = match self.active.take() {
            Some(active) => Self::stop(active).await,
            None => Ok(()),
        };
        self.state = SessionState::Closed;
        info!("session closed");
        result
    }

    async fn stop(active: ActiveSession<P>) -> Result<(), SessionError> {
        let ActiveSession {
            mut port,
            shutdown,
            drain,
            ingest,
            ..
        } = active;

        shutdown.trigger();
        for (stage, task) in [(LoopStage::Drain, drain), (LoopStage::Ingest, ingest)] {
            if let Err(err) = task.await {
                error!(%stage, %err, "loop task did not finish cleanly");
            }
        }
        port.close().await.map_err(SessionError::Port)
    }

    fn start_flush(&mut self, timeout: Duration) -> Result<(), SessionError> {
        self.state.require("clear read buffer", SessionState::Ready)?;
        if self.flush.is_some() {
            return Err(SessionError::FlushInProgress);
        }
        let active = self.active.as_ref().ok_or(SessionError::Closed)?;

        let doorbell = active.doorbell.clone();
        let commands = active.ingest_commands.clone();
        let inbound = active.inbound.clone();
        self.flush = Some(Box::pin(async move {
            if tokio::time::timeout(timeout, doorbell.ingested())
                .await
                .is_ok()
            {
                debug!("data arrived during clear-read-buffer");
            }
            reset_inbound(commands, inbound).await
        }));
        Ok(())
    }

    async fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<(), SessionError> {
        self.state.require("set signals", SessionState::Ready)?;
        let active = self.active.as_mut().ok_or(SessionError::Closed)?;
        active
            .port
            .set_signals(dtr, rts)
            .await
            .map_err(SessionError::Port)?;
        debug!(dtr, rts, "modem signals set");
        Ok(())
    }
}

/// Controller-side endpoint of a worker.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<Request>,
    responses: mpsc::UnboundedReceiver<Response>,
}

impl WorkerHandle {
    pub fn send(&self, req: Request) -> Result<(), SessionError> {
        self.requests.send(req).map_err(|_| SessionError::WorkerGone)
    }

    /// Decodes a JSON request and sends it.
    pub fn send_json(&self, text: &str) -> Result<(), SessionError> {
        self.send(Request::from_json(text)?)
    }

    pub async fn recv(&mut self) -> Result<Response, SessionError> {
        self.responses.recv().await.ok_or(SessionError::WorkerGone)
    }

    /// Returns a reply that has already arrived, if any.
    pub fn try_recv(&mut self) -> Option<Response> {
        self.responses.try_recv().ok()
    }
}
