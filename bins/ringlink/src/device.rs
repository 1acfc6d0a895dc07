//! A tty device node driven through non-blocking file descriptors.

use ringlink_session::{PortOptions, SerialPort};
use std::fs::OpenOptions;
use std::future::{self, Future};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn speed(baud_rate: u32) -> io::Result<libc::speed_t> {
    let speed = match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ));
        }
    };
    Ok(speed)
}

/// Puts the line in raw 8N1 mode at `baud_rate`.
fn configure_raw(fd: RawFd, baud_rate: u32) -> io::Result<()> {
    let speed = speed(baud_rate)?;
    // SAFETY: termios is plain data and is fully initialised by tcgetattr.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open descriptor and `tio` is a valid termios to fill.
    cvt(unsafe { libc::tcgetattr(fd, &mut tio) })?;
    // SAFETY: `tio` was initialised by tcgetattr above.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;
    // SAFETY: `tio` is initialised and `speed` is one of the libc B* constants.
    cvt(unsafe { libc::cfsetispeed(&mut tio, speed) })?;
    // SAFETY: as above.
    cvt(unsafe { libc::cfsetospeed(&mut tio, speed) })?;
    // SAFETY: `fd` is open and `tio` is a fully initialised termios.
    cvt(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) })?;
    Ok(())
}

type SharedFd = Arc<AsyncFd<OwnedFd>>;

pub struct TtySource(SharedFd);
pub struct TtySink(SharedFd);

impl AsyncRead for TtySource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.0.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            let read = guard.try_io(|fd| {
                // SAFETY: `unfilled` is valid for writes of its full length.
                let n = unsafe {
                    libc::read(fd.as_raw_fd(), unfilled.as_mut_ptr().cast(), unfilled.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match read {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for TtySink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.0.poll_write_ready(cx))?;
            let written = guard.try_io(|fd| {
                // SAFETY: `buf` is valid for reads of its full length.
                let n = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match written {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Serial device such as `/dev/ttyUSB0`.
pub struct DevicePort {
    path: PathBuf,
    fd: Option<SharedFd>,
}

impl DevicePort {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fd: None,
        }
    }

    fn open_fd(&self, baud_rate: u32) -> io::Result<SharedFd> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.path)?;
        configure_raw(file.as_raw_fd(), baud_rate)?;
        Ok(Arc::new(AsyncFd::new(OwnedFd::from(file))?))
    }

    fn modem_lines(&self, dtr: bool, rts: bool) -> io::Result<()> {
        let fd = self
            .fd
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device is not open"))?
            .as_raw_fd();

        let mut bits: libc::c_int = 0;
        // SAFETY: TIOCMGET writes one c_int through the pointer, which is `bits`.
        cvt(unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut bits) })?;
        for (line, on) in [(libc::TIOCM_DTR, dtr), (libc::TIOCM_RTS, rts)] {
            if on {
                bits |= line;
            } else {
                bits &= !line;
            }
        }
        // SAFETY: TIOCMSET reads one c_int through the pointer, which is `bits`.
        cvt(unsafe { libc::ioctl(fd, libc::TIOCMSET, &bits) })?;
        Ok(())
    }
}

impl SerialPort for DevicePort {
    type Sink = TtySink;
    type Source = TtySource;

    fn open(
        &mut self,
        options: &PortOptions,
    ) -> impl Future<Output = io::Result<(Self::Sink, Self::Source)>> + Send {
        let opened = self.open_fd(options.baud_rate).map(|fd| {
            debug!(path = %self.path.display(), baud = options.baud_rate, "device opened");
            self.fd = Some(fd.clone());
            (TtySink(fd.clone()), TtySource(fd))
        });
        future::ready(opened)
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        if self.fd.take().is_some() {
            debug!(path = %self.path.display(), "device closed");
        }
        future::ready(Ok(()))
    }

    fn set_signals(&mut self, dtr: bool, rts: bool) -> impl Future<Output = io::Result<()>> + Send {
        future::ready(self.modem_lines(dtr, rts))
    }
}
