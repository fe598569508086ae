pub mod backend;
pub mod types;

pub use backend::{CaptureBackend, Framebuffer, StaticImageBackend, WireframeBackend};
pub use types::{CaptureResult, SnapshotError, SnapshotResult};
