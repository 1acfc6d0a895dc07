//! Outbound pump: moves bytes published on the outbound ring to the port.

use crate::doorbell::Doorbell;
use crate::error::SessionError;
use crate::shutdown::ShutdownSignal;
use ringlink_ring::RingReader;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

pub(crate) struct DrainLoop<W> {
    pub(crate) reader: RingReader,
    pub(crate) sink: W,
    /// `None` when the ring's producer cannot ring us, e.g. another process.
    pub(crate) doorbell: Option<Doorbell>,
    pub(crate) idle_poll: Duration,
    pub(crate) shutdown: ShutdownSignal,
}

async fn send<W: AsyncWrite + Unpin>(sink: &mut W, batch: &[u8]) -> io::Result<()> {
    sink.write_all(batch).await?;
    sink.flush().await
}

impl<W: AsyncWrite + Unpin> DrainLoop<W> {
    /// Runs until shutdown, returning the number of bytes sent.
    ///
    /// A failed port write ends the loop with an error; the bytes of that
    /// batch are lost.
    pub(crate) async fn run(self) -> Result<u64, SessionError> {
        let DrainLoop {
            mut reader,
            mut sink,
            doorbell,
            idle_poll,
            mut shutdown,
        } = self;

        let mut batch = Vec::with_capacity(reader.ring().max_write());
        let mut sent = 0u64;

        loop {
            batch.clear();
            let n = reader.read_into(&mut batch, usize::MAX);
            if n > 0 {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    res = send(&mut sink, &batch) => res.map_err(SessionError::Port)?,
                }
                sent += n as u64;
                debug!(bytes = n, cursor = reader.position(), "drained outbound batch");
                continue;
            }

            match &doorbell {
                Some(bell) => tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = bell.written() => {}
                },
                None => tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle_poll) => {}
                },
            }
        }

        info!(sent, "drain loop stopped");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use ringlink_ring::RingBuffer;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn forwards_published_bytes_in_order() {
        let ring = RingBuffer::anonymous(16).unwrap();
        let mut writer = ring.writer().unwrap();
        let bell = Doorbell::new();
        let shutdown = Shutdown::new();
        let (sink, mut device) = tokio::io::duplex(64);

        let drain = DrainLoop {
            reader: ring.reader().unwrap(),
            sink,
            doorbell: Some(bell.clone()),
            idle_poll: Duration::from_millis(1),
            shutdown: shutdown.subscribe(),
        };
        let task = tokio::spawn(drain.run());

        let mut got = Vec::new();
        for chunk in [&b"1234567"[..], b"ABCDEFGH", b"xyz"] {
            writer.write(chunk).unwrap();
            bell.ring_written();
            let mut buf = vec![0u8; chunk.len()];
            device.read_exact(&mut buf).await.unwrap();
            got.extend(buf);
        }
        assert_eq!(got, b"1234567ABCDEFGHxyz");

        shutdown.trigger();
        assert_eq!(task.await.unwrap().unwrap(), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_poll_picks_up_writes_without_a_doorbell() {
        let ring = RingBuffer::anonymous(64).unwrap();
        let mut writer = ring.writer().unwrap();
        let shutdown = Shutdown::new();
        let (sink, mut device) = tokio::io::duplex(64);

        let drain = DrainLoop {
            reader: ring.reader().unwrap(),
            sink,
            doorbell: None,
            idle_poll: Duration::from_millis(5),
            shutdown: shutdown.subscribe(),
        };
        let task = tokio::spawn(drain.run());

        writer.write(b"polled").unwrap();
        let mut buf = [0u8; 6];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"polled");

        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_device_is_a_fault() {
        let ring = RingBuffer::anonymous(32).unwrap();
        let mut writer = ring.writer().unwrap();
        let bell = Doorbell::new();
        let shutdown = Shutdown::new();
        let (sink, device) = tokio::io::duplex(8);
        drop(device);

        let drain = DrainLoop {
            reader: ring.reader().unwrap(),
            sink,
            doorbell: Some(bell.clone()),
            idle_poll: Duration::from_millis(1),
            shutdown: shutdown.subscribe(),
        };
        let task = tokio::spawn(drain.run());

        writer.write(b"nobody listening").unwrap();
        bell.ring_written();
        assert!(matches!(task.await.unwrap(), Err(SessionError::Port(_))));
    }
}
