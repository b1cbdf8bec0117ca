pub mod dispatcher;
pub mod registry;

pub use registry::{ClientGuard, ClientId, Registry};
