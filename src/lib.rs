pub mod cli;
pub mod common;
pub mod downloader;
pub mod proxy;
pub mod sniffer;
pub mod store;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
