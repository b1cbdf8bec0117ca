pub mod app;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod stream;
pub mod video;
pub mod web;

pub use app::AppState;
pub use error::AppError;
