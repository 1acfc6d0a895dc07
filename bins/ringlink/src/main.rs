mod device;

use anyhow::{Context, Result, bail};
use device::DevicePort;
use ringlink_config::RinglinkConfig;
use ringlink_session::{PortOptions, Session, SessionConfig, SessionError};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "ringlink.toml";
const FAULT_CHECK: Duration = Duration::from_millis(250);

enum Event {
    Stop,
    Stdin(io::Result<usize>),
    Device(Result<Vec<u8>, SessionError>),
}

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.into());
    let config = RinglinkConfig::load(&path).with_context(|| format!("loading {path}"))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log_level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: RinglinkConfig) -> Result<()> {
    let session_config = SessionConfig {
        capacity: config.capacity,
        drain_idle_poll: config.drain_idle_poll(),
    };
    let mut session = Session::connect(
        DevicePort::new(&config.device),
        PortOptions::new(config.baud_rate),
        session_config,
    )
    .await
    .with_context(|| format!("opening {}", config.device))?;
    info!(device = %config.device, baud = config.baud_rate, "connected");

    // drop whatever the device sent before we attached
    session.clear_read_buffer(config.flush_timeout()).await?;

    let pumped = pump(&mut session).await;
    session.close().await?;
    info!("disconnected");
    pumped
}

/// Copies stdin to the device and device output to stdout until Ctrl-C or a
/// loop fault.
async fn pump(session: &mut Session) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut input = vec![0u8; session.max_write()];
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            _ = &mut ctrl_c => Event::Stop,
            read = stdin.read(&mut input), if stdin_open => Event::Stdin(read),
            got = session.recv_exact(1, FAULT_CHECK) => Event::Device(got),
        };

        match event {
            Event::Stop => return Ok(()),
            Event::Stdin(read) => match read.context("reading stdin")? {
                0 => stdin_open = false,
                n => session.write(&input[..n])?,
            },
            Event::Device(Ok(first)) => {
                stdout.write_all(&first).await?;
                stdout.write_all(&session.read()?).await?;
                stdout.flush().await?;
            }
            Event::Device(Err(SessionError::Timeout { .. })) => {
                let faults = session.take_faults();
                for (stage, detail) in &faults {
                    error!(%stage, %detail, "session loop failed");
                }
                if !faults.is_empty() {
                    bail!("device connection lost");
                }
            }
            Event::Device(Err(err)) => return Err(err.into()),
        }
    }
}
