pub mod error;
pub mod manager;
pub mod models;
pub mod task;

pub use error::DownloadError;
pub use manager::DownloadManager;
pub use models::{TaskSnapshot, TaskStatus};
pub use task::{DownloadTask, TaskCallback};
