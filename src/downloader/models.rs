use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Downloading,
    Completed,
    Cancelled,
    Error(String), // 失败，带人类可读的原因
}

impl TaskStatus {
    /// 终态不再发生任何迁移
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Error(_)
        )
    }
}

/// 供展示层轮询的任务快照
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub target_id: u64,
    pub status: TaskStatus,
    pub progress: u8,
    pub total_size: u64, // 0 = 未知
    pub downloaded: u64,
    pub speed: u64, // 字节/秒
    pub error: Option<String>,
}

/// 任务的可变状态，整体放在一把锁后面
#[derive(Debug)]
pub(crate) struct TaskState {
    pub status: TaskStatus,
    pub total_size: u64,
    pub downloaded: u64,
    pub speed: u64,
    pub error: Option<String>,
    pub start_time: Option<chrono::DateTime<chrono::Local>>,
    pub end_time: Option<chrono::DateTime<chrono::Local>>,
}

impl TaskState {
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Queued,
            total_size: 0,
            downloaded: 0,
            speed: 0,
            error: None,
            start_time: None,
            end_time: None,
        }
    }
}
