//! Device Context: the V4L2 handle, its negotiated formats, mmap buffer
//! pool and streaming state. Exclusively owned by one thread at a time —
//! either the Capture Loop thread, or (briefly) an HTTP handler thread
//! taking the synchronous snapshot fallback path when no loop is running.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use v4l::buffer::Type as BufferType;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Fixed number of mmap buffer slots requested from the driver.
pub const BUFFER_COUNT: u32 = 3;

/// Bound on how long `fetch_frame` waits for the device to become
/// readable before reporting a timeout, matching the original's
/// `isReadPossible(200)` poll ahead of `DQBUF`.
const FETCH_READY_TIMEOUT_MS: u16 = 200;

/// Frames below this size are treated as corrupt/partial and dropped.
pub const MIN_FRAME_BYTES: usize = 200;

/// Number of retries the snapshot path allows while waiting for the driver
/// to actually deliver a frame at the requested high-resolution width.
pub const SOF_RETRY_LIMIT: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Can't open: {0}")]
    CantOpen(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("resolution switch failed: {0}")]
    SwitchFailed(String),

    #[error("v4l error: {0}")]
    V4l(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Off,
    On,
    Paused,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: [u8; 4],
}

pub enum FetchOutcome<'a> {
    Frame(&'a [u8]),
    Timeout,
    Disconnected,
}

/// Owns the V4L2 device handle and its mmap buffer pool.
///
/// `stream` borrows `device` for as long as it is `Some`; the borrow is
/// manufactured through a raw pointer because the `v4l` crate ties
/// `MmapStream`'s lifetime to a `&Device` and this type needs to own both
/// together so it can be handed whole between the Capture Loop thread and
/// the synchronous snapshot fallback. This is sound because `device` lives
/// in a `Box` (stable address across moves of `DeviceContext` itself) and
/// `stream` is declared first so it is dropped before `device` is.
pub struct DeviceContext {
    stream: Option<MmapStream<'static>>,
    device: Box<Device>,

    path: PathBuf,
    low_res: ActiveFormat,
    high_res: ActiveFormat,
    active: ActiveFormat,
    state: StreamState,
    drop_count: u32,
    min_frame_secs: f64,
    last_frame_at: Option<Instant>,
    loaned: bool,
}

impl DeviceContext {
    /// Opens the device, negotiates the highest available frame size for
    /// the snapshot path and the caller's preferred streaming resolution,
    /// then switches into the low-resolution streaming format.
    pub fn open(
        path: impl AsRef<Path>,
        preferred_stream_w: u32,
        preferred_stream_h: u32,
        opt_pic_w: Option<u32>,
        opt_pic_h: Option<u32>,
        drop_count: u32,
        min_frame_secs: f64,
    ) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let device = Device::with_path(&path)
            .map_err(|e| DeviceError::CantOpen(format!("{}: {}", path.display(), e)))?;

        let fourcc = negotiate_fourcc(&device)?;
        let (hi_w, hi_h) = match (opt_pic_w, opt_pic_h) {
            (Some(w), Some(h)) => (w, h),
            _ => max_frame_size(&device, fourcc)?,
        };

        let mut ctx = DeviceContext {
            stream: None,
            device: Box::new(device),
            path,
            low_res: ActiveFormat {
                width: preferred_stream_w,
                height: preferred_stream_h,
                fourcc,
            },
            high_res: ActiveFormat {
                width: hi_w,
                height: hi_h,
                fourcc,
            },
            active: ActiveFormat {
                width: 0,
                height: 0,
                fourcc,
            },
            state: StreamState::Off,
            drop_count,
            min_frame_secs,
            last_frame_at: None,
            loaned: false,
        };

        let low = ctx.low_res;
        ctx.switch_res(low, false)?;
        Ok(ctx)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn active_format(&self) -> ActiveFormat {
        self.active
    }

    pub fn high_res(&self) -> ActiveFormat {
        self.high_res
    }

    pub fn low_res(&self) -> ActiveFormat {
        self.low_res
    }

    pub fn drop_count(&self) -> u32 {
        self.drop_count
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.state = StreamState::Disconnected;
    }

    /// Re-negotiates the capture format and re-allocates the mmap buffer
    /// pool. `unmap_first` tears down the existing stream before setting
    /// the new format, matching drivers that refuse `S_FMT` while buffers
    /// are mapped.
    pub fn switch_res(&mut self, target: ActiveFormat, unmap_first: bool) -> Result<(), DeviceError> {
        let was_streaming = self.state == StreamState::On;
        if unmap_first {
            self.stream = None;
        }
        if was_streaming {
            self.stop_streaming();
        }

        let fmt = Format::new(target.width, target.height, FourCC::new(&target.fourcc));
        let actual = self
            .device
            .set_format(&fmt)
            .map_err(|e| DeviceError::SwitchFailed(e.to_string()))?;

        self.active = ActiveFormat {
            width: actual.width,
            height: actual.height,
            fourcc: actual.fourcc.repr,
        };

        let device_ref: &'static Device = unsafe { &*(self.device.as_ref() as *const Device) };
        let stream = MmapStream::with_buffers(device_ref, BufferType::VideoCapture, BUFFER_COUNT)
            .map_err(|e| DeviceError::SwitchFailed(e.to_string()))?;
        self.stream = Some(stream);
        self.state = StreamState::Off;
        Ok(())
    }

    pub fn switch_to_high_res(&mut self) -> Result<(), DeviceError> {
        let hi = self.high_res;
        self.switch_res(hi, true)
    }

    pub fn switch_to_low_res(&mut self) -> Result<(), DeviceError> {
        let lo = self.low_res;
        self.switch_res(lo, true)
    }

    pub fn start_streaming(&mut self) {
        if self.state == StreamState::On {
            return;
        }
        self.state = StreamState::On;
    }

    pub fn stop_streaming(&mut self) {
        if self.state != StreamState::On {
            return;
        }
        self.state = StreamState::Paused;
    }

    /// Waits up to `FETCH_READY_TIMEOUT_MS` for the device to become
    /// readable before dequeuing, so a stalled device can't starve the
    /// once-per-iteration event tick and snapshot-request check behind a
    /// blocking `DQBUF`. Returns `Timeout` when readiness doesn't arrive
    /// in time, `Disconnected` (and moves the context into the
    /// `Disconnected` state) on ENODEV.
    pub fn fetch_frame(&mut self) -> Result<FetchOutcome<'_>, DeviceError> {
        debug_assert!(!self.loaned, "fetch_frame called without a matching return_frame");
        if self.stream.is_none() {
            return Ok(FetchOutcome::Timeout);
        }

        match wait_readable(&self.device, FETCH_READY_TIMEOUT_MS)? {
            true => {}
            false => return Ok(FetchOutcome::Timeout),
        }

        let stream = self.stream.as_mut().expect("checked above");
        match stream.next() {
            Ok((buf, _meta)) => {
                self.loaned = true;
                self.last_frame_at = Some(Instant::now());
                Ok(FetchOutcome::Frame(buf))
            }
            Err(e) => {
                if matches!(e.raw_os_error(), Some(libc::ENODEV)) {
                    self.state = StreamState::Disconnected;
                    return Ok(FetchOutcome::Disconnected);
                }
                Err(DeviceError::V4l(e))
            }
        }
    }

    /// Releases the loan taken by the last successful `fetch_frame`. The
    /// `v4l` crate re-queues the previous buffer internally on the next
    /// `Stream::next()` call, so this is bookkeeping that enforces the
    /// "fetch then return before fetching again" discipline at the
    /// application level.
    pub fn return_frame(&mut self) {
        self.loaned = false;
    }

    /// Sleeps out the configured minimum inter-frame interval, if any.
    pub fn throttle(&self) {
        if self.min_frame_secs <= 0.0 {
            return;
        }
        if let Some(last) = self.last_frame_at {
            let min = Duration::from_secs_f64(self.min_frame_secs);
            let elapsed = last.elapsed();
            if elapsed < min {
                std::thread::sleep(min - elapsed);
            }
        }
    }

    /// Polls for device events (end-of-stream, source resolution change).
    /// Returns `false` when the Capture Loop should stop.
    pub fn event_loop_tick(&mut self) -> Result<bool, DeviceError> {
        match super::ioctl_event::dequeue_event(self.device.as_ref()) {
            Ok(Some(super::ioctl_event::DeviceEvent::Eos)) => Ok(false),
            Ok(Some(super::ioctl_event::DeviceEvent::SourceChange)) => Ok(false),
            Ok(None) => Ok(true),
            Err(e) => Err(DeviceError::V4l(e)),
        }
    }
}

// SAFETY: DeviceContext is always moved as a whole (never split) between
// the DeviceSlot mutex and the Capture Loop thread, so the `'static`
// self-borrow inside `stream` never outlives its owning `device` Box.
unsafe impl Send for DeviceContext {}

/// Polls the device fd for readability with a bounded timeout, matching the
/// original's `fd.isReadPossible(200)` guard ahead of DQBUF. Returns `false`
/// on timeout rather than an error, so the caller can report `Timeout`.
fn wait_readable(device: &Device, timeout_ms: u16) -> Result<bool, DeviceError> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    let timeout = PollTimeout::from(timeout_ms);
    let n = poll(&mut fds, timeout).map_err(|e| DeviceError::V4l(std::io::Error::from(e)))?;
    Ok(n > 0)
}

fn negotiate_fourcc(device: &Device) -> Result<[u8; 4], DeviceError> {
    let formats = device
        .enum_formats()
        .map_err(|e| DeviceError::CantOpen(e.to_string()))?;
    for desc in &formats {
        if desc.fourcc.repr == *b"MJPG" || desc.fourcc.repr == *b"JPEG" {
            return Ok(desc.fourcc.repr);
        }
    }
    // Fall back to MJPG and let set_format report the real error if the
    // driver truly doesn't support a compressed format.
    Ok(*b"MJPG")
}

fn max_frame_size(device: &Device, fourcc: [u8; 4]) -> Result<(u32, u32), DeviceError> {
    use v4l::framesize::FrameSizeEnum;

    let sizes = device
        .enum_framesizes(FourCC::new(&fourcc))
        .map_err(|e| DeviceError::CantOpen(e.to_string()))?;
    let mut best = (0u32, 0u32);
    for entry in &sizes {
        match &entry.size {
            FrameSizeEnum::Discrete(d) => {
                if d.width as u64 * d.height as u64 > best.0 as u64 * best.1 as u64 {
                    best = (d.width, d.height);
                }
            }
            FrameSizeEnum::Stepwise(s) => {
                if s.max_width as u64 * s.max_height as u64 > best.0 as u64 * best.1 as u64 {
                    best = (s.max_width, s.max_height);
                }
            }
        }
    }
    if best == (0, 0) {
        return Err(DeviceError::CantOpen(
            "no frame sizes advertised for compressed format".into(),
        ));
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_format_equality() {
        let a = ActiveFormat { width: 640, height: 480, fourcc: *b"MJPG" };
        let b = ActiveFormat { width: 640, height: 480, fourcc: *b"MJPG" };
        assert_eq!(a, b);
    }

    #[test]
    fn stream_state_transitions_are_plain_values() {
        let mut s = StreamState::Off;
        s = StreamState::On;
        assert_eq!(s, StreamState::On);
        s = StreamState::Paused;
        assert_eq!(s, StreamState::Paused);
    }
}
