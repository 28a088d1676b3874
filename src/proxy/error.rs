use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS错误: {0}")]
    Tls(#[from] rustls::Error),
    #[error("证书错误: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("无效的CONNECT目标: {0}")]
    BadConnect(String),
    #[error("HTTP请求解析失败: {0}")]
    BadRequest(String),
    #[error("上游域名无效: {0}")]
    InvalidHost(String),
    #[error("上游连接失败: {0}: {1}")]
    Upstream(String, String),
}
