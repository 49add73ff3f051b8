//! Host collaborators: file access and connectivity.

pub mod fs;
pub mod network;

pub use fs::{FileSystem, LocalFileSystem};
pub use network::{ListenerId, Listeners, ManualNetworkStatus, NetworkStatus, StatusCallback};
