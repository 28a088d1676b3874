use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::StreamExt;
use indicatif::ProgressBar;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::models::{TaskSnapshot, TaskState, TaskStatus};

// 写盘块大小，取消响应的粒度也由它决定
const CHUNK_SIZE: usize = 1024 * 1024;
// 速度采样间隔，低于这个间隔不重算，避免数字抖动
const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// 任务完成回调，无论结果如何恰好调用一次
pub type TaskCallback = Arc<dyn Fn(TaskSnapshot) + Send + Sync>;

/// 单个可续传下载任务
///
/// 状态迁移: Queued → Downloading → {Completed, Cancelled, Error}，
/// 取消是协作式的：设标志位，传输循环每块检查一次。
/// 状态锁只在不跨越await的短临界区内持有，快照随时可取。
pub struct DownloadTask {
    pub target_id: u64,
    pub task_id: String,
    pub url: String,
    pub save_path: PathBuf,
    state: Mutex<TaskState>,
    cancelled: AtomicBool,
    callback: Option<TaskCallback>,
    client: reqwest::Client,
    show_progress: bool,
}

impl DownloadTask {
    pub fn new(
        target_id: u64,
        url: &str,
        save_path: impl AsRef<Path>,
        client: reqwest::Client,
        callback: Option<TaskCallback>,
        show_progress: bool,
    ) -> Self {
        Self {
            target_id,
            task_id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            save_path: save_path.as_ref().to_path_buf(),
            state: Mutex::new(TaskState::new()),
            cancelled: AtomicBool::new(false),
            callback,
            client,
            show_progress,
        }
    }

    /// 请求取消，由传输循环协作响应
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 当前状态快照，轮询用
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();
        let progress = if state.total_size > 0 {
            ((state.downloaded as f64 / state.total_size as f64) * 100.0).min(100.0) as u8
        } else if matches!(state.status, TaskStatus::Completed) {
            100
        } else {
            0
        };
        TaskSnapshot {
            target_id: self.target_id,
            status: state.status.clone(),
            progress,
            total_size: state.total_size,
            downloaded: state.downloaded,
            speed: state.speed,
            error: state.error.clone(),
        }
    }

    /// 执行下载，终态落定后触发回调
    pub async fn run(&self) {
        {
            let mut state = self.state();
            state.status = TaskStatus::Downloading;
            state.start_time = Some(chrono::Local::now());
        }

        let result = self.transfer().await;

        {
            let mut state = self.state();
            state.end_time = Some(chrono::Local::now());
            match result {
                // 传输期间收到取消请求的，即使字节已收完也算取消
                Ok(()) if self.is_cancelled() => {
                    state.status = TaskStatus::Cancelled;
                    info!("⏹️ 下载取消: {}", self.save_path.display());
                }
                Ok(()) => {
                    state.status = TaskStatus::Completed;
                    info!("✅ 下载完成: {}", self.save_path.display());
                }
                Err(e) => {
                    state.status = TaskStatus::Error(e.to_string());
                    state.error = Some(e.to_string());
                    error!("❌ 下载失败: {}, 错误: {}", self.save_path.display(), e);
                }
            }
        }

        self.fire_callback();
    }

    /// 任务未开始就终止时使用，保证回调仍然恰好触发一次
    pub(crate) fn abort_with(&self, reason: &str) {
        {
            let mut state = self.state();
            state.status = TaskStatus::Error(reason.to_string());
            state.error = Some(reason.to_string());
            state.end_time = Some(chrono::Local::now());
        }
        self.fire_callback();
    }

    fn fire_callback(&self) {
        if let Some(callback) = &self.callback {
            let snapshot = self.snapshot();
            // 回调崩溃不能影响任务和调度器
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                error!("任务回调执行异常: {}", self.task_id);
            }
        }
    }

    async fn transfer(&self) -> Result<(), DownloadError> {
        // 断点续传：目的文件已有的字节数就是续传起点
        let mut resumed = match tokio::fs::metadata(&self.save_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(&self.url);
        if resumed > 0 {
            request = request.header(RANGE, format!("bytes={}-", resumed));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16(), self.url.clone()));
        }

        // 服务端不认Range时返回200全量，此时必须从头重写，
        // 直接追加会把完整文件写坏
        let mut append = resumed > 0;
        if resumed > 0 && status != StatusCode::PARTIAL_CONTENT {
            warn!("服务端不支持断点续传，从头开始下载: {}", self.url);
            resumed = 0;
            append = false;
        }

        // 总大小 = 本次响应剩余长度 + 磁盘上已有的字节
        let total_size = response.content_length().map(|len| len + resumed).unwrap_or(0);
        let mut downloaded = resumed;
        {
            let mut state = self.state();
            state.total_size = total_size;
            state.downloaded = downloaded;
        }

        let pb = if self.show_progress && total_size > 0 {
            let pb = ProgressBar::new(total_size);
            pb.set_style(
                indicatif::ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                )
                .expect("进度条模板非法")
                .progress_chars("#>-"),
            );
            pb.set_position(downloaded);
            Some(pb)
        } else {
            None
        };

        let mut file = if append {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&self.save_path)
                .await?
        } else {
            tokio::fs::File::create(&self.save_path).await?
        };

        debug!("开始传输: {} -> {}", self.url, self.save_path.display());

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::with_capacity(CHUNK_SIZE * 2);
        let mut last_tick = Instant::now();
        let mut last_bytes = downloaded;

        while let Some(chunk) = stream.next().await {
            // 每个网络块检查一次取消标志，只写整块，
            // 取消时缓冲里的残块直接丢弃
            if self.is_cancelled() {
                if let Some(pb) = &pb {
                    pb.abandon_with_message("已取消");
                }
                return Ok(());
            }

            let chunk = chunk.map_err(DownloadError::Http)?;
            buf.extend_from_slice(&chunk);

            while buf.len() >= CHUNK_SIZE {
                file.write_all(&buf[..CHUNK_SIZE]).await?;
                buf.drain(..CHUNK_SIZE);
                downloaded += CHUNK_SIZE as u64;

                // 速度按固定间隔采样，不逐块重算
                let mut speed = None;
                let elapsed = last_tick.elapsed();
                if elapsed >= SPEED_SAMPLE_INTERVAL {
                    speed = Some(((downloaded - last_bytes) as f64 / elapsed.as_secs_f64()) as u64);
                    last_tick = Instant::now();
                    last_bytes = downloaded;
                }

                {
                    let mut state = self.state();
                    state.downloaded = downloaded;
                    if let Some(speed) = speed {
                        state.speed = speed;
                    }
                }
                if let Some(pb) = &pb {
                    pb.set_position(downloaded);
                }
            }
        }

        // 流正常结束，落掉尾部不满一块的数据
        if !buf.is_empty() {
            file.write_all(&buf).await?;
            downloaded += buf.len() as u64;
        }
        file.flush().await?;

        {
            let mut state = self.state();
            state.downloaded = downloaded;
        }
        if let Some(pb) = pb {
            pb.finish_with_message("下载完成");
        }

        Ok(())
    }
}
