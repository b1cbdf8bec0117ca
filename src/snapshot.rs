//! Snapshot Rendezvous (C5): lets an HTTP handler ask the Capture Loop for
//! one full-resolution frame without either side needing to block on a
//! shared lock for longer than the handoff itself.
//!
//! Modeled as a capacity-1 request channel (the "request" signal) paired
//! with a per-request one-shot reply channel (the "done" signal, carrying
//! the result directly instead of a bare wakeup plus a shared output
//! buffer).

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use parking_lot::Mutex;

pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SnapshotRequest {
    pub reply: std_mpsc::Sender<SnapshotReply>,
}

pub enum SnapshotReply {
    Ok(Vec<u8>),
    Failed,
}

#[derive(Debug)]
pub enum CaptureOutcome {
    Ok(Vec<u8>),
    Busy,
    Timeout,
}

#[derive(Default)]
pub struct Rendezvous {
    pending: Mutex<bool>,
    loop_request_tx: Mutex<Option<std_mpsc::Sender<SnapshotRequest>>>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once by the Capture Loop as it starts. Returns the receiving
    /// end it should poll non-blockingly every iteration.
    pub fn attach_loop(&self) -> std_mpsc::Receiver<SnapshotRequest> {
        let (tx, rx) = std_mpsc::channel();
        *self.loop_request_tx.lock() = Some(tx);
        rx
    }

    /// Called by the Capture Loop as it exits, so new requests take the
    /// synchronous fallback path instead of waiting on a loop that's gone.
    pub fn detach_loop(&self) {
        *self.loop_request_tx.lock() = None;
    }

    pub fn is_loop_attached(&self) -> bool {
        self.loop_request_tx.lock().is_some()
    }

    /// Requests a snapshot from a running Capture Loop and waits up to
    /// `SNAPSHOT_TIMEOUT` for the result. Returns `Busy` immediately if a
    /// request is already in flight.
    pub fn capture_via_loop(&self) -> CaptureOutcome {
        {
            let mut pending = self.pending.lock();
            if *pending {
                return CaptureOutcome::Busy;
            }
            *pending = true;
        }

        let outcome = self.send_and_wait();
        *self.pending.lock() = false;
        outcome
    }

    fn send_and_wait(&self) -> CaptureOutcome {
        let sender = self.loop_request_tx.lock().clone();
        let Some(sender) = sender else {
            return CaptureOutcome::Timeout;
        };
        let (reply_tx, reply_rx) = std_mpsc::channel();
        if sender.send(SnapshotRequest { reply: reply_tx }).is_err() {
            return CaptureOutcome::Timeout;
        }
        match reply_rx.recv_timeout(SNAPSHOT_TIMEOUT) {
            Ok(SnapshotReply::Ok(bytes)) => CaptureOutcome::Ok(bytes),
            Ok(SnapshotReply::Failed) => CaptureOutcome::Timeout,
            Err(_) => CaptureOutcome::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn no_loop_attached_is_timeout_not_busy() {
        let rendezvous = Rendezvous::new();
        assert!(!rendezvous.is_loop_attached());
        assert!(matches!(rendezvous.capture_via_loop(), CaptureOutcome::Timeout));
    }

    #[test]
    fn concurrent_request_sees_busy() {
        let rendezvous = Rendezvous::new();
        let rx = rendezvous.attach_loop();

        *rendezvous.pending.lock() = true;
        assert!(matches!(rendezvous.capture_via_loop(), CaptureOutcome::Busy));
        drop(rx);
    }

    #[test]
    fn a_serviced_request_returns_ok() {
        let rendezvous = Rendezvous::new();
        let rx = rendezvous.attach_loop();

        let server = thread::spawn(move || {
            let req = rx.recv().expect("request");
            req.reply.send(SnapshotReply::Ok(vec![1, 2, 3])).unwrap();
        });

        match rendezvous.capture_via_loop() {
            CaptureOutcome::Ok(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("expected Ok, got {:?}", other),
        }
        server.join().unwrap();
    }
}
