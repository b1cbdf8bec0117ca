//! Capture Loop (C2): the dedicated OS thread that owns the Device
//! Context for as long as it runs, pulls frames and feeds the Sink
//! Dispatcher, and services Snapshot Rendezvous requests in between
//! frames.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::snapshot::{Rendezvous, SnapshotReply};
use crate::stream::{dispatcher, Registry};

use super::device::{DeviceContext, DeviceError, FetchOutcome, StreamState, MIN_FRAME_BYTES, SOF_RETRY_LIMIT};
use super::jpeg;

/// Holds the Device Context when no thread is actively using it, and
/// mediates the ownership handoff to/from the Capture Loop thread.
#[derive(Default)]
pub struct DeviceSlot {
    inner: Mutex<Option<DeviceContext>>,
}

impl DeviceSlot {
    pub fn new(ctx: DeviceContext) -> Self {
        Self { inner: Mutex::new(Some(ctx)) }
    }

    pub fn take(&self) -> Option<DeviceContext> {
        self.inner.lock().take()
    }

    pub fn put_back(&self, ctx: DeviceContext) {
        *self.inner.lock() = Some(ctx);
    }

    /// Synchronous fallback path for when no Capture Loop thread is
    /// running: briefly locks the slot to operate the device directly.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut DeviceContext) -> R) -> Option<R> {
        let mut guard = self.inner.lock();
        guard.as_mut().map(f)
    }
}

/// Spawns the Capture Loop thread. Returns immediately; the thread puts
/// the device context back into `slot` and returns when it exits (no
/// clients left, device disconnected, or an unrecoverable device event).
pub fn spawn(slot: Arc<DeviceSlot>, registry: Arc<Registry>, rendezvous: Arc<Rendezvous>) -> thread::JoinHandle<()> {
    thread::spawn(move || run(&slot, &registry, &rendezvous))
}

fn run(slot: &DeviceSlot, registry: &Registry, rendezvous: &Rendezvous) {
    let mut ctx = match slot.take() {
        Some(c) => c,
        None => {
            tracing::error!("capture loop started with no device context available");
            return;
        }
    };

    let request_rx = rendezvous.attach_loop();
    ctx.start_streaming();
    tracing::info!(path = %ctx.path().display(), "capture loop started");

    loop {
        match ctx.event_loop_tick() {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("device source change or end-of-stream event, stopping capture loop");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "event loop tick failed");
                ctx.close();
                break;
            }
        }

        if let Ok(req) = request_rx.try_recv() {
            let reply = match do_snapshot(&mut ctx) {
                Ok(bytes) => SnapshotReply::Ok(bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot capture failed");
                    SnapshotReply::Failed
                }
            };
            let _ = req.reply.send(reply);
            if ctx.state() == StreamState::Disconnected {
                break;
            }
        }

        ctx.throttle();

        let frame = match ctx.fetch_frame() {
            Ok(FetchOutcome::Frame(buf)) => {
                if buf.len() < MIN_FRAME_BYTES {
                    ctx.return_frame();
                    continue;
                }
                buf.to_vec()
            }
            Ok(FetchOutcome::Timeout) => continue,
            Ok(FetchOutcome::Disconnected) => {
                tracing::warn!(path = %ctx.path().display(), "device disconnected");
                ctx.close();
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "fetch_frame failed");
                break;
            }
        };
        ctx.return_frame();

        if !dispatcher::dispatch_frame(registry, &frame) {
            tracing::debug!("no clients remain, capture loop exiting");
            break;
        }
    }

    // Only the two arms above that detected a genuine device disconnection
    // call `ctx.close()`. Every other exit (no clients left, EOS/source
    // change event, a transient fetch error) leaves the stream and format
    // mapped so the next Capture Loop spawn resumes capture instead of
    // finding a closed device and spinning on `Timeout` forever.
    rendezvous.detach_loop();
    slot.put_back(ctx);
    tracing::info!("capture loop stopped");
}

/// Full-resolution snapshot sequence, shared by the Capture Loop's
/// in-band servicing and the synchronous fallback path used when no loop
/// is running: stop, switch to the remembered high-resolution format,
/// start, wait for a frame whose SOF width matches, drop the configured
/// number of warm-up frames, copy the picture out, then switch back down.
pub fn do_snapshot(ctx: &mut DeviceContext) -> Result<Vec<u8>, DeviceError> {
    let was_streaming = ctx.state() == StreamState::On;
    ctx.stop_streaming();
    ctx.switch_to_high_res()?;
    ctx.start_streaming();

    let high = ctx.high_res();
    let mut captured: Option<Vec<u8>> = None;
    for _ in 0..SOF_RETRY_LIMIT {
        match ctx.fetch_frame()? {
            FetchOutcome::Frame(buf) => {
                let is_high_res = jpeg::parse_sof_size(buf)
                    .map(|s| s.width as u32 == high.width)
                    .unwrap_or(false);
                if is_high_res {
                    captured = Some(buf.to_vec());
                    ctx.return_frame();
                    break;
                }
                ctx.return_frame();
            }
            FetchOutcome::Timeout => {}
            FetchOutcome::Disconnected => {
                ctx.close();
                return Err(DeviceError::Disconnected);
            }
        }
    }
    let result = captured.ok_or_else(|| {
        DeviceError::SwitchFailed("no full-resolution frame matched the requested picture size".into())
    })?;

    for _ in 0..ctx.drop_count() {
        match ctx.fetch_frame()? {
            FetchOutcome::Frame(_) => ctx.return_frame(),
            FetchOutcome::Timeout => {}
            FetchOutcome::Disconnected => {
                ctx.close();
                return Err(DeviceError::Disconnected);
            }
        }
    }

    ctx.stop_streaming();
    ctx.switch_to_low_res()?;
    if was_streaming {
        ctx.start_streaming();
    }

    let low = ctx.low_res();
    for _ in 0..SOF_RETRY_LIMIT {
        match ctx.fetch_frame()? {
            FetchOutcome::Frame(buf) => {
                let width = jpeg::parse_sof_size(buf).map(|s| s.width as u32);
                ctx.return_frame();
                if width == Some(low.width) {
                    break;
                }
            }
            FetchOutcome::Timeout => break,
            FetchOutcome::Disconnected => {
                ctx.close();
                return Err(DeviceError::Disconnected);
            }
        }
    }

    Ok(result)
}
