use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use crate::sniffer::{extract_cover_url, extract_filename};

pub mod models;

pub use models::{CaptureHeaders, VideoRecord};

/// 捕获记录库
///
/// 内存中的记录列表加一把锁，按URL去重；每次变更后把快照
/// 异步刷到JSON文件。保存失败只记日志，不丢内存状态。
#[derive(Clone)]
pub struct VideoStore {
    db_path: PathBuf,
    records: Arc<Mutex<Vec<VideoRecord>>>,
}

impl VideoStore {
    /// 打开记录库，文件存在则加载，解析失败按空库处理
    pub async fn open(db_path: impl AsRef<Path>) -> Self {
        let db_path = db_path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&db_path).await {
            Ok(data) => match serde_json::from_slice::<Vec<VideoRecord>>(&data) {
                Ok(records) => {
                    info!("加载记录库: {} 条记录", records.len());
                    records
                }
                Err(e) => {
                    warn!("记录库解析失败，按空库处理: {}", e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            db_path,
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// 新增一条捕获记录；URL已存在时去重，返回None
    pub async fn add(&self, url: &str, headers: &CaptureHeaders) -> Option<VideoRecord> {
        let record = {
            let mut records = self.records.lock().await;
            if records.iter().any(|r| r.url == url) {
                return None;
            }

            let record = VideoRecord {
                id: records.last().map(|r| r.id).unwrap_or(0) + 1,
                url: url.to_string(),
                filename: extract_filename(url),
                cover_url: extract_cover_url(url),
                capture_time: Local::now().to_rfc3339(),
                domain: extract_domain(url),
                referer: headers.referer.clone(),
                user_agent: headers.user_agent.clone(),
                downloaded: false,
                cover_downloaded: false,
                download_path: None,
                file_size: 0,
            };
            records.push(record.clone());
            record
        };

        self.flush().await;
        Some(record)
    }

    /// 更新一条记录，返回是否找到
    pub async fn update<F>(&self, id: u64, apply: F) -> bool
    where
        F: FnOnce(&mut VideoRecord),
    {
        let found = {
            let mut records = self.records.lock().await;
            match records.iter_mut().find(|r| r.id == id) {
                Some(record) => {
                    apply(record);
                    true
                }
                None => false,
            }
        };

        if found {
            self.flush().await;
        }
        found
    }

    /// 获取所有记录，按捕获时间倒序
    pub async fn get_all(&self) -> Vec<VideoRecord> {
        let mut records = self.records.lock().await.clone();
        records.sort_by(|a, b| b.capture_time.cmp(&a.capture_time));
        records
    }

    pub async fn get_by_id(&self, id: u64) -> Option<VideoRecord> {
        self.records.lock().await.iter().find(|r| r.id == id).cloned()
    }

    /// 清空所有记录
    pub async fn clear(&self) {
        self.records.lock().await.clear();
        self.flush().await;
    }

    pub async fn count(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn downloaded_count(&self) -> usize {
        self.records.lock().await.iter().filter(|r| r.downloaded).count()
    }

    // 把当前快照写盘，锁外序列化
    async fn flush(&self) {
        let snapshot = self.records.lock().await.clone();
        let data = match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => data,
            Err(e) => {
                error!("记录库序列化失败: {}", e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.db_path, data).await {
            error!("保存记录库失败: {}", e);
        }
    }
}

fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string())
}
