//! Requests accepted by the worker and the replies it sends back.
//!
//! Both enums are internally tagged on `type` so a controller in another
//! process can speak to a worker over JSON:
//!
//! ```text
//! -> {"type":"clear-read-buffer","timeout":100}
//! <- {"type":"clear-read-buffer"}
//! ```

use crate::doorbell::Doorbell;
use crate::port::PortOptions;
use ringlink_ring::{RingBuffer, RingError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where the worker finds a ring when a session opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RingAttach {
    /// A file created by the controller with [`RingBuffer::create`].
    File(PathBuf),
    /// A ring already mapped in this process.
    #[serde(skip)]
    Shared(RingBuffer),
}

impl RingAttach {
    pub fn attach(self) -> Result<RingBuffer, RingError> {
        match self {
            RingAttach::File(path) => RingBuffer::open(path),
            RingAttach::Shared(ring) => Ok(ring),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    Open {
        /// Index into the worker's list of acquired ports.
        port: usize,
        options: PortOptions,
        outbound: RingAttach,
        inbound: RingAttach,
        #[serde(skip)]
        doorbell: Option<Doorbell>,
    },
    Close,
    ClearReadBuffer {
        /// Milliseconds to wait for in-flight data before discarding.
        timeout: u64,
    },
    SetSignals {
        dtr: bool,
        rts: bool,
    },
    #[serde(other)]
    Unknown,
}

impl Request {
    pub fn clear_read_buffer(timeout: Duration) -> Self {
        Request::ClearReadBuffer {
            timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::Close => "close",
            Request::ClearReadBuffer { .. } => "clear-read-buffer",
            Request::SetSignals { .. } => "set-signals",
            Request::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopStage {
    Drain,
    Ingest,
}

impl fmt::Display for LoopStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStage::Drain => f.write_str("drain"),
            LoopStage::Ingest => f.write_str("ingest"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Response {
    Ready,
    Closed,
    ClearReadBuffer,
    SignalsSet,
    /// A request failed; the worker is still accepting requests.
    Error { detail: String },
    /// A running loop stopped on a fault and will not be restarted.
    LoopFault { stage: LoopStage, detail: String },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
