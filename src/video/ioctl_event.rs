//! Raw `VIDIOC_DQEVENT` access. The `v4l` crate's safe wrappers don't
//! expose the V4L2 event queue, so this talks to the kernel directly with
//! `nix::ioctl_read!`, the same way the rest of this codebase reaches for
//! raw syscalls (`nix::sys::socket`) alongside higher-level crates where a
//! safe wrapper doesn't exist.

use std::io;
use std::os::unix::io::AsRawFd;

use v4l::Device;

const V4L2_EVENT_EOS: u32 = 2;
const V4L2_EVENT_SOURCE_CHANGE: u32 = 5;

#[repr(C)]
#[derive(Debug, Default)]
struct V4l2Event {
    kind: u32,
    u: [u8; 64],
    pending: u32,
    sequence: u32,
    timestamp: [i64; 2],
    id: u32,
    reserved: [u32; 8],
}

nix::ioctl_read!(vidioc_dqevent, b'V', 89, V4l2Event);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Eos,
    SourceChange,
}

/// Non-blocking dequeue of a pending V4L2 event, if any. `Ok(None)` means
/// the event queue is empty (`EAGAIN`), which is the steady-state case on
/// every loop iteration.
pub fn dequeue_event(device: &Device) -> io::Result<Option<DeviceEvent>> {
    let mut event = V4l2Event::default();
    let fd = device.as_raw_fd();
    let res = unsafe { vidioc_dqevent(fd, &mut event as *mut V4l2Event) };
    match res {
        Ok(_) => Ok(match event.kind {
            V4L2_EVENT_EOS => Some(DeviceEvent::Eos),
            V4L2_EVENT_SOURCE_CHANGE => Some(DeviceEvent::SourceChange),
            _ => None,
        }),
        Err(nix::errno::Errno::EAGAIN) => Ok(None),
        Err(e) => Err(io::Error::from(e)),
    }
}
