//! Shared application state wiring the Device Context, Client Registry,
//! Snapshot Rendezvous and Capture Loop lifecycle together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::snapshot::{CaptureOutcome, Rendezvous};
use crate::stream::Registry;
use crate::video::capture_loop::{self, DeviceSlot};
use crate::video::{DeviceContext, DeviceError};

/// Preferred streaming resolution. The high (snapshot) resolution is
/// auto-detected from the device's advertised frame sizes.
const STREAM_WIDTH: u32 = 1280;
const STREAM_HEIGHT: u32 = 720;
const SNAPSHOT_DROP_FRAMES: u32 = 2;
const MIN_FRAME_SECS: f64 = 0.0;

pub struct AppState {
    pub config: ServerConfig,
    device_slot: Arc<DeviceSlot>,
    registry: Arc<Registry>,
    rendezvous: Arc<Rendezvous>,
    loop_running: AtomicBool,
    loop_spawn_lock: parking_lot::Mutex<()>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, DeviceError> {
        let ctx = DeviceContext::open(
            &config.camera_path,
            STREAM_WIDTH,
            STREAM_HEIGHT,
            None,
            None,
            SNAPSHOT_DROP_FRAMES,
            MIN_FRAME_SECS,
        )?;
        Ok(Self {
            config,
            device_slot: Arc::new(DeviceSlot::new(ctx)),
            registry: Arc::new(Registry::new()),
            rendezvous: Arc::new(Rendezvous::new()),
            loop_running: AtomicBool::new(false),
            loop_spawn_lock: parking_lot::Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_handle(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Starts the Capture Loop thread if it isn't already running. Called
    /// by the `/mjpg` handler right after registering a client when the
    /// registry was previously empty.
    pub fn ensure_capture_loop_running(self: &Arc<Self>) {
        let _guard = self.loop_spawn_lock.lock();
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let slot = self.device_slot.clone();
        let registry = self.registry.clone();
        let rendezvous = self.rendezvous.clone();
        let state = self.clone();
        let handle = capture_loop::spawn(slot, registry, rendezvous);
        std::thread::spawn(move || {
            let _ = handle.join();
            state.loop_running.store(false, Ordering::SeqCst);
        });
    }

    /// Services a `/full_res` request: routes through the running Capture
    /// Loop via the rendezvous, or falls back to operating the device
    /// directly when no loop is running (e.g. no `/mjpg` clients yet).
    pub async fn capture_full_res(self: &Arc<Self>) -> CaptureOutcome {
        if self.rendezvous.is_loop_attached() {
            let rendezvous = self.rendezvous.clone();
            return tokio::task::spawn_blocking(move || rendezvous.capture_via_loop())
                .await
                .unwrap_or(CaptureOutcome::Timeout);
        }

        let slot = self.device_slot.clone();
        tokio::task::spawn_blocking(move || {
            let result = slot.with_device(|ctx| capture_loop::do_snapshot(ctx));
            match result {
                Some(Ok(bytes)) => CaptureOutcome::Ok(bytes),
                Some(Err(_)) | None => CaptureOutcome::Timeout,
            }
        })
        .await
        .unwrap_or(CaptureOutcome::Timeout)
    }
}
