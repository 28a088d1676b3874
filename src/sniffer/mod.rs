pub mod classifier;
pub mod filename;

pub use classifier::{Classification, classify, extract_cover_url, is_target_host, is_video_url};
pub use filename::{extract_filename, sanitize_filename};
