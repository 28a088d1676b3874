use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;

use finder_sniffer::downloader::{DownloadManager, TaskSnapshot, TaskStatus};

// 伪随机但确定的测试数据，方便逐字节比对
fn test_data(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

struct TestServer {
    addr: std::net::SocketAddr,
    saw_range: Arc<AtomicBool>,
}

/// 极简文件服务器：honor_range决定是否支持断点续传，
/// chunk_delay用来模拟慢速传输
async fn spawn_file_server(
    data: Vec<u8>,
    honor_range: bool,
    chunk_delay: Option<Duration>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let data = Arc::new(data);
    let saw_range = Arc::new(AtomicBool::new(false));
    let saw_range_server = Arc::clone(&saw_range);

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let data = Arc::clone(&data);
            let saw_range = Arc::clone(&saw_range_server);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                loop {
                    let mut tmp = [0u8; 1024];
                    let n = match stream.read(&mut tmp).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&tmp[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let text = String::from_utf8_lossy(&buf).to_ascii_lowercase();
                let range_start = text
                    .lines()
                    .find_map(|l| l.strip_prefix("range: bytes="))
                    .and_then(|r| r.split('-').next())
                    .and_then(|s| s.parse::<usize>().ok());

                let (status_line, start) = match range_start {
                    Some(start) if honor_range && start < data.len() => {
                        saw_range.store(true, Ordering::Relaxed);
                        (
                            format!(
                                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
                                start,
                                data.len() - 1,
                                data.len()
                            ),
                            start,
                        )
                    }
                    _ => ("HTTP/1.1 200 OK\r\n".to_string(), 0),
                };

                let body = &data[start..];
                let head = format!(
                    "{}Content-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                if stream.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in body.chunks(64 * 1024) {
                    if stream.write_all(chunk).await.is_err() {
                        return;
                    }
                    if let Some(delay) = chunk_delay {
                        sleep(delay).await;
                    }
                }
            });
        }
    });

    TestServer { addr, saw_range }
}

fn temp_download_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("finder_sniffer_dl_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("videos")).unwrap();
    std::fs::create_dir_all(dir.join("covers")).unwrap();
    dir
}

async fn wait_terminal(manager: &DownloadManager, target_id: u64) -> TaskSnapshot {
    for _ in 0..600 {
        if let Some(snapshot) = manager.snapshot(target_id) {
            if snapshot.status.is_terminal() {
                return snapshot;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("任务超时未完结: {}", target_id);
}

#[tokio::test]
async fn test_full_download_matches_source() {
    let data = test_data(300_000);
    let server = spawn_file_server(data.clone(), true, None).await;
    let dir = temp_download_dir();
    let manager = DownloadManager::new(3, &dir);

    let url = format!("http://{}/a.mp4", server.addr);
    manager.download_video(1, &url, "a.mp4", None).unwrap();
    let snapshot = wait_terminal(&manager, 1).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.downloaded, data.len() as u64);
    assert_eq!(snapshot.total_size, data.len() as u64);
    assert_eq!(snapshot.progress, 100);

    let written = std::fs::read(dir.join("videos/a.mp4")).unwrap();
    assert_eq!(written, data);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_resume_produces_identical_file() {
    let data = test_data(400_000);
    let server = spawn_file_server(data.clone(), true, None).await;
    let dir = temp_download_dir();
    let manager = DownloadManager::new(3, &dir);

    // 目的文件已有前100000字节，相当于上次中断留下的半截
    std::fs::write(dir.join("videos/a.mp4"), &data[..100_000]).unwrap();

    let url = format!("http://{}/a.mp4", server.addr);
    manager.download_video(1, &url, "a.mp4", None).unwrap();
    let snapshot = wait_terminal(&manager, 1).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    // 续传必须真的走了Range请求
    assert!(server.saw_range.load(Ordering::Relaxed));
    assert_eq!(snapshot.total_size, data.len() as u64);

    // 最终文件和一次性全量下载逐字节一致
    let written = std::fs::read(dir.join("videos/a.mp4")).unwrap();
    assert_eq!(written, data);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_range_ignored_restarts_from_zero() {
    let data = test_data(200_000);
    // 服务端无视Range，永远返回200全量
    let server = spawn_file_server(data.clone(), false, None).await;
    let dir = temp_download_dir();
    let manager = DownloadManager::new(3, &dir);

    std::fs::write(dir.join("videos/a.mp4"), &data[..50_000]).unwrap();

    let url = format!("http://{}/a.mp4", server.addr);
    manager.download_video(1, &url, "a.mp4", None).unwrap();
    let snapshot = wait_terminal(&manager, 1).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    // 不能把全量响应追加到半截文件后面
    let written = std::fs::read(dir.join("videos/a.mp4")).unwrap();
    assert_eq!(written, data);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_cancel_is_cooperative_and_callback_fires_once() {
    let data = test_data(4 * 1024 * 1024);
    let server = spawn_file_server(data, true, Some(Duration::from_millis(30))).await;
    let dir = temp_download_dir();
    let manager = DownloadManager::new(3, &dir);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = Arc::clone(&calls);
    let callback = Arc::new(move |_snapshot: TaskSnapshot| {
        calls_cb.fetch_add(1, Ordering::SeqCst);
    });

    let url = format!("http://{}/a.mp4", server.addr);
    manager.download_video(1, &url, "a.mp4", Some(callback)).unwrap();

    // 等任务真的进入传输再取消
    for _ in 0..200 {
        if matches!(
            manager.snapshot(1).map(|s| s.status),
            Some(TaskStatus::Downloading)
        ) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    manager.cancel(1);

    let snapshot = wait_terminal(&manager, 1).await;
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_pool_bound_is_respected() {
    let data = test_data(2 * 1024 * 1024);
    let server = spawn_file_server(data, true, Some(Duration::from_millis(50))).await;
    let dir = temp_download_dir();
    let manager = DownloadManager::new(2, &dir);

    let url = format!("http://{}/a.mp4", server.addr);
    for id in 1..=4u64 {
        manager
            .download_video(id, &url, &format!("{}.mp4", id), None)
            .unwrap();
    }

    sleep(Duration::from_millis(400)).await;

    let mut downloading = 0;
    let mut queued = 0;
    for id in 1..=4u64 {
        match manager.snapshot(id).unwrap().status {
            TaskStatus::Downloading => downloading += 1,
            TaskStatus::Queued => queued += 1,
            _ => {}
        }
    }
    // 并发上限2，其余排队
    assert!(downloading <= 2, "同时下载数超限: {}", downloading);
    assert!(queued >= 2, "排队任务数不对: {}", queued);

    for id in 1..=4u64 {
        manager.cancel(id);
    }
    for id in 1..=2u64 {
        wait_terminal(&manager, id).await;
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_second_submission_for_live_target_is_rejected() {
    let data = test_data(2 * 1024 * 1024);
    let server = spawn_file_server(data, true, Some(Duration::from_millis(50))).await;
    let dir = temp_download_dir();
    let manager = DownloadManager::new(3, &dir);

    let url = format!("http://{}/a.mp4", server.addr);
    manager.download_video(1, &url, "a.mp4", None).unwrap();

    // 任务未完结前重复提交同一目标必须被拒绝
    assert!(manager.download_video(1, &url, "a.mp4", None).is_err());

    manager.cancel(1);
    wait_terminal(&manager, 1).await;

    // 完结后可以重新提交
    manager.download_video(1, &url, "a.mp4", None).unwrap();
    manager.cancel(1);
    wait_terminal(&manager, 1).await;

    let _ = std::fs::remove_dir_all(&dir);
}
