use serde::{Deserialize, Serialize};

/// 一条捕获记录
///
/// 新增字段一律带 #[serde(default)]，保证旧版本落盘的文件仍能读取。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoRecord {
    pub id: u64,
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    pub capture_time: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub referer: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub cover_downloaded: bool,
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default)]
    pub file_size: u64,
}

/// 捕获事件里随URL一起带出的请求头
#[derive(Debug, Clone, Default)]
pub struct CaptureHeaders {
    pub referer: String,
    pub user_agent: String,
    pub host: String,
}
