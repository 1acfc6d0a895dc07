//! The physical port as seen by the worker.
//!
//! Discovery, permissions and device quirks live outside this crate. A port
//! only has to open into a byte sink and a byte source, and close again.

use serde::{Deserialize, Serialize};
use std::future::{self, Future};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

/// Line settings handed to [`SerialPort::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOptions {
    pub baud_rate: u32,
    /// Largest chunk read from the port in one go.
    #[serde(default = "defaults::buffer_size")]
    pub buffer_size: usize,
}

mod defaults {
    pub fn buffer_size() -> usize {
        2048
    }
}

impl PortOptions {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            buffer_size: defaults::buffer_size(),
        }
    }
}

impl Default for PortOptions {
    fn default() -> Self {
        Self::new(115_200)
    }
}

/// A serial connection the worker can drive.
///
/// `open` hands back the two directions separately so the drain and ingest
/// loops can run concurrently. The sink applies backpressure by suspending
/// writes; a zero-length read from the source means end-of-stream. Both
/// halves are dropped before `close` is called.
pub trait SerialPort: Send + 'static {
    type Sink: AsyncWrite + Unpin + Send + 'static;
    type Source: AsyncRead + Unpin + Send + 'static;

    fn open(
        &mut self,
        options: &PortOptions,
    ) -> impl Future<Output = io::Result<(Self::Sink, Self::Source)>> + Send;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Drives the DTR and RTS modem lines.
    fn set_signals(&mut self, dtr: bool, rts: bool) -> impl Future<Output = io::Result<()>> + Send {
        let _ = (dtr, rts);
        future::ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "port has no modem control lines",
        )))
    }
}

const DTR: u8 = 0b01;
const RTS: u8 = 0b10;

/// Observes a [`MemoryPort`] after it has been moved into a worker.
#[derive(Debug, Clone, Default)]
pub struct PortProbe {
    signals: Arc<AtomicU8>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl PortProbe {
    /// Last `(dtr, rts)` pair set on the port.
    pub fn signals(&self) -> (bool, bool) {
        let bits = self.signals.load(Ordering::Acquire);
        (bits & DTR != 0, bits & RTS != 0)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

/// In-memory port backed by a tokio duplex pipe.
///
/// The other end of the pipe plays the device: bytes drained by the session
/// can be read from it, and bytes written to it are ingested.
#[derive(Debug)]
pub struct MemoryPort {
    stream: Option<DuplexStream>,
    probe: PortProbe,
}

impl MemoryPort {
    /// Creates a port and the device end of its pipe.
    ///
    /// `max_buf_size` bounds how much either side can buffer before writes
    /// suspend, which makes it a convenient backpressure knob in tests.
    pub fn pair(max_buf_size: usize) -> (Self, DuplexStream) {
        let (port_end, device_end) = tokio::io::duplex(max_buf_size);
        let port = Self {
            stream: Some(port_end),
            probe: PortProbe::default(),
        };
        (port, device_end)
    }

    /// A port whose `open` always fails, like a device unplugged mid-session.
    pub fn unavailable() -> Self {
        Self {
            stream: None,
            probe: PortProbe::default(),
        }
    }

    pub fn probe(&self) -> PortProbe {
        self.probe.clone()
    }
}

impl SerialPort for MemoryPort {
    type Sink = WriteHalf<DuplexStream>;
    type Source = ReadHalf<DuplexStream>;

    fn open(
        &mut self,
        _options: &PortOptions,
    ) -> impl Future<Output = io::Result<(Self::Sink, Self::Source)>> + Send {
        let opened = match self.stream.take() {
            Some(stream) => {
                self.probe.opens.fetch_add(1, Ordering::AcqRel);
                let (source, sink) = tokio::io::split(stream);
                Ok((sink, source))
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "memory port has no device attached",
            )),
        };
        future::ready(opened)
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        self.probe.closes.fetch_add(1, Ordering::AcqRel);
        future::ready(Ok(()))
    }

    fn set_signals(&mut self, dtr: bool, rts: bool) -> impl Future<Output = io::Result<()>> + Send {
        let bits = (if dtr { DTR } else { 0 }) | (if rts { RTS } else { 0 });
        self.probe.signals.store(bits, Ordering::Release);
        future::ready(Ok(()))
    }
}
