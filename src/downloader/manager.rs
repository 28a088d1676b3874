use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::error::DownloadError;
use super::models::TaskSnapshot;
use super::task::{DownloadTask, TaskCallback};

const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// 下载管理器
///
/// 有界工作池：信号量控制并发数（默认3），超出的任务按提交顺序排队。
/// 注册表按逻辑目标记一个当前/最近任务；目标已有未完结任务时拒绝新提交，
/// 调用方需要先取消再重新提交。
#[derive(Clone)]
pub struct DownloadManager {
    tasks: Arc<DashMap<String, Arc<DownloadTask>>>,
    semaphore: Arc<Semaphore>,
    client: reqwest::Client,
    video_dir: PathBuf,
    cover_dir: PathBuf,
}

impl DownloadManager {
    pub fn new(max_concurrent: usize, download_dir: impl AsRef<Path>) -> Self {
        let download_dir = download_dir.as_ref();

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            tasks: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            client,
            video_dir: download_dir.join("videos"),
            cover_dir: download_dir.join("covers"),
        }
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    pub fn cover_dir(&self) -> &Path {
        &self.cover_dir
    }

    /// 提交视频下载，立即返回任务句柄，传输在工作池里异步进行
    pub fn download_video(
        &self,
        target_id: u64,
        url: &str,
        filename: &str,
        callback: Option<TaskCallback>,
    ) -> Result<Arc<DownloadTask>, DownloadError> {
        let save_path = self.video_dir.join(filename);
        self.submit(target_id.to_string(), target_id, url, save_path, callback, true)
    }

    /// 提交封面下载，和视频任务共用同一个工作池
    pub fn download_cover(
        &self,
        target_id: u64,
        url: &str,
        filename: &str,
        callback: Option<TaskCallback>,
    ) -> Result<Arc<DownloadTask>, DownloadError> {
        let save_path = self.cover_dir.join(filename);
        self.submit(format!("cover-{}", target_id), target_id, url, save_path, callback, false)
    }

    /// 获取目标当前或最近一个任务的句柄
    pub fn get(&self, target_id: u64) -> Option<Arc<DownloadTask>> {
        self.tasks.get(&target_id.to_string()).map(|t| Arc::clone(&t))
    }

    /// 轮询目标任务状态，状态锁只有短临界区，适合高频调用
    pub fn snapshot(&self, target_id: u64) -> Option<TaskSnapshot> {
        self.get(target_id).map(|task| task.snapshot())
    }

    /// 取消目标的在途任务，协作式，不会阻塞等待在途块
    pub fn cancel(&self, target_id: u64) {
        if let Some(task) = self.tasks.get(&target_id.to_string()) {
            debug!("请求取消任务: {}", target_id);
            task.cancel();
        }
    }

    fn submit(
        &self,
        key: String,
        target_id: u64,
        url: &str,
        save_path: PathBuf,
        callback: Option<TaskCallback>,
        show_progress: bool,
    ) -> Result<Arc<DownloadTask>, DownloadError> {
        let task = Arc::new(DownloadTask::new(
            target_id,
            url,
            save_path,
            self.client.clone(),
            callback,
            show_progress,
        ));

        // 同一目标只允许一个未完结任务，占位成功才算提交成功
        match self.tasks.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().snapshot().status.is_terminal() {
                    warn!("目标已有进行中的任务，拒绝重复提交: {}", key);
                    return Err(DownloadError::TaskAlreadyExists(key));
                }
                // 已完结的旧任务作为历史被新任务顶掉
                occupied.insert(Arc::clone(&task));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&task));
            }
        }

        let semaphore = Arc::clone(&self.semaphore);
        let task_for_run = Arc::clone(&task);
        tokio::spawn(async move {
            // 排队等工作槽，信号量按FIFO放行
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("工作池已关闭，任务终止: {}", task_for_run.task_id);
                    task_for_run.abort_with("工作池已关闭");
                    return;
                }
            };
            task_for_run.run().await;
            drop(permit);
        });

        Ok(task)
    }
}
