//! In-process wakeups between the controller and the I/O loops.
//!
//! The rings themselves carry all the data; the doorbell only saves the loops
//! from polling. A ring attached from a file by another process has no
//! doorbell and the drain loop falls back to its idle poll.

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

#[derive(Debug, Clone, Default)]
pub struct Doorbell {
    written: Arc<Notify>,
    ingested: Arc<Notify>,
}

impl Doorbell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the drain loop that the outbound cursor moved.
    ///
    /// Stores a permit, so a drain loop busy sending still re-checks the ring
    /// once it comes back.
    pub fn ring_written(&self) {
        self.written.notify_one();
    }

    pub async fn written(&self) {
        self.written.notified().await;
    }

    /// Wakes everyone currently waiting for inbound data.
    ///
    /// `notify_waiters` leaves no permit behind: a waiter registered after
    /// this call is not woken by it.
    pub fn ring_ingested(&self) {
        self.ingested.notify_waiters();
    }

    /// Registers interest in the next ingest.
    ///
    /// The returned future observes any `ring_ingested` issued after this
    /// call, even before it is first polled.
    pub fn ingested(&self) -> Notified<'_> {
        self.ingested.notified()
    }
}
