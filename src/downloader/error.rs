use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP错误: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP请求失败，状态码: {0}，URL: {1}")]
    HttpStatus(u16, String),
    #[error("任务已存在且仍在进行中: {0}")]
    TaskAlreadyExists(String),
    #[error("任务未找到: {0}")]
    TaskNotFound(String),
}
