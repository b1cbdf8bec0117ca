pub mod capture_loop;
pub mod device;
pub mod format;
mod ioctl_event;
pub mod jpeg;

pub use capture_loop::DeviceSlot;
pub use device::{ActiveFormat, DeviceContext, DeviceError, StreamState};
pub use format::PixelFormat;
