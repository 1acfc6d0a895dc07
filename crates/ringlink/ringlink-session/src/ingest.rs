//! Inbound pump: copies chunks read from the port into the inbound ring.
//!
//! This loop is the only producer of the inbound ring, including resets,
//! which arrive as [`IngestCommand::Reset`] and are applied between chunks.

use crate::doorbell::Doorbell;
use crate::error::SessionError;
use crate::shutdown::ShutdownSignal;
use ringlink_ring::RingWriter;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) enum IngestCommand {
    /// Publish the empty marker, then acknowledge.
    Reset(oneshot::Sender<()>),
}

// Field order matters: the writer claim is released before the command
// receiver goes away, so a sender that sees the channel closed can claim it.
pub(crate) struct IngestLoop<R> {
    pub(crate) writer: RingWriter,
    pub(crate) source: R,
    pub(crate) doorbell: Doorbell,
    /// Never larger than the ring's `max_write`.
    pub(crate) chunk_size: usize,
    pub(crate) commands: mpsc::Receiver<IngestCommand>,
    pub(crate) shutdown: ShutdownSignal,
}

enum Step {
    Stop,
    Command(Option<IngestCommand>),
    Read(io::Result<usize>),
}

impl<R: AsyncRead + Unpin> IngestLoop<R> {
    /// Runs until shutdown or end-of-stream, returning the bytes ingested.
    pub(crate) async fn run(mut self) -> Result<u64, SessionError> {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut ingested = 0u64;

        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Step::Stop,
                cmd = self.commands.recv() => Step::Command(cmd),
                read = self.source.read(&mut chunk) => Step::Read(read),
            };

            match step {
                Step::Stop | Step::Command(None) => break,
                Step::Command(Some(IngestCommand::Reset(ack))) => {
                    self.writer.reset();
                    debug!("inbound ring reset");
                    let _ = ack.send(());
                }
                Step::Read(Ok(0)) => {
                    warn!(ingested, "port reached end of stream");
                    break;
                }
                Step::Read(Ok(n)) => {
                    self.writer.write(&chunk[..n])?;
                    self.doorbell.ring_ingested();
                    ingested += n as u64;
                    debug!(bytes = n, cursor = self.writer.cursor(), "ingested chunk");
                }
                Step::Read(Err(err)) => return Err(SessionError::Port(err)),
            }
        }

        info!(ingested, "ingest loop stopped");
        Ok(ingested)
    }
}
