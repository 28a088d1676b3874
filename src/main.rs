use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use finder_sniffer::Result;
use finder_sniffer::cli::Cli;
use finder_sniffer::common::logger::PrettyLogger;
use finder_sniffer::common::utils::FormatTool;
use finder_sniffer::downloader::{DownloadManager, TaskCallback, TaskStatus};
use finder_sniffer::proxy::{CaptureEvent, CertificateAuthority, ProxyServer};
use finder_sniffer::store::{VideoRecord, VideoStore};

/// 获取本机出口IP，手机配置代理时用
fn local_ip() -> String {
    // UDP connect不会真的发包，只是让内核选一下出口地址
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
        socket.connect("8.8.8.8:80")?;
        socket.local_addr()
    });
    match probe {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => "127.0.0.1".to_string(),
    }
}

/// 准备下载环境
async fn prepare_download_env(args: &Cli) -> Result<()> {
    info!("创建下载目录: {:?}", args.download_dir);
    tokio::fs::create_dir_all(args.download_dir.join("videos")).await?;
    tokio::fs::create_dir_all(args.download_dir.join("covers")).await?;
    Ok(())
}

// 视频任务完成后的记录回写
fn video_callback(store: VideoStore, record_id: u64, save_path: String) -> TaskCallback {
    Arc::new(move |snapshot| {
        let store = store.clone();
        let save_path = save_path.clone();
        match snapshot.status {
            TaskStatus::Completed => {
                PrettyLogger::success(format!(
                    "视频 #{} 下载完成 ({})",
                    record_id,
                    FormatTool::format_size(snapshot.downloaded)
                ));
                tokio::spawn(async move {
                    store
                        .update(record_id, |r| {
                            r.downloaded = true;
                            r.download_path = Some(save_path);
                            r.file_size = snapshot.downloaded;
                        })
                        .await;
                });
            }
            TaskStatus::Cancelled => {
                PrettyLogger::warning(format!("视频 #{} 下载已取消", record_id));
            }
            TaskStatus::Error(ref e) => {
                PrettyLogger::error(format!("视频 #{} 下载失败: {}", record_id, e));
            }
            _ => {}
        }
    })
}

fn cover_callback(store: VideoStore, record_id: u64) -> TaskCallback {
    Arc::new(move |snapshot| {
        if matches!(snapshot.status, TaskStatus::Completed) {
            let store = store.clone();
            tokio::spawn(async move {
                store.update(record_id, |r| r.cover_downloaded = true).await;
            });
        }
    })
}

// 自动下载视频和封面
fn start_download(store: &VideoStore, manager: &DownloadManager, record: &VideoRecord) {
    let save_path = manager
        .video_dir()
        .join(&record.filename)
        .to_string_lossy()
        .into_owned();
    let callback = video_callback(store.clone(), record.id, save_path);
    if let Err(e) = manager.download_video(record.id, &record.url, &record.filename, Some(callback)) {
        warn!("视频任务提交失败 #{}: {}", record.id, e);
    }

    if let Some(cover_url) = &record.cover_url {
        let cover_name = format!("{}.jpg", record.id);
        let callback = cover_callback(store.clone(), record.id);
        if let Err(e) = manager.download_cover(record.id, cover_url, &cover_name, Some(callback)) {
            warn!("封面任务提交失败 #{}: {}", record.id, e);
        }
    }
}

/// 捕获事件消费循环：入库、打日志、按需触发下载
async fn consume_captures(
    mut events_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    store: VideoStore,
    manager: DownloadManager,
    auto_download: bool,
) {
    while let Some(event) = events_rx.recv().await {
        // 重复捕获静默去重，不是错误
        let record = match store.add(&event.url, &event.headers).await {
            Some(record) => record,
            None => continue,
        };

        PrettyLogger::success(format!(
            "捕获 #{} [{}] {}",
            record.id, record.domain, record.filename
        ));
        if auto_download {
            start_download(&store, &manager, &record);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Cli::parse();

    PrettyLogger::separator();
    PrettyLogger::title("微信视频号嗅探器");
    PrettyLogger::separator();

    prepare_download_env(&args).await?;

    let store = VideoStore::open(&args.db_path).await;
    info!(
        "已有记录 {} 条，其中已下载 {} 条",
        store.count().await,
        store.downloaded_count().await
    );

    let manager = DownloadManager::new(args.concurrency, &args.download_dir);

    // 根证书准备不好整个程序没法工作，直接退出
    let ca = CertificateAuthority::load_or_create(&args.ca_dir)
        .await
        .map_err(|e| {
            error!("根证书初始化失败: {}", e);
            e
        })?;
    let ca = Arc::new(ca);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let proxy = Arc::new(ProxyServer::new(args.port, Arc::clone(&ca), events_tx));

    let ip = local_ip();
    PrettyLogger::info(format!("手机WiFi代理请设置为 {}:{}", ip, args.port));
    PrettyLogger::info(format!("根证书安装地址 http://{}:{}/cert", ip, args.port));
    if args.auto_download {
        PrettyLogger::info("自动下载已开启");
    }

    let consumer = tokio::spawn(consume_captures(
        events_rx,
        store.clone(),
        manager.clone(),
        args.auto_download,
    ));

    let proxy_run = Arc::clone(&proxy);
    let server = tokio::spawn(async move {
        if let Err(e) = proxy_run.run().await {
            error!("代理服务器错误: {}", e);
        }
    });

    info!("{}", "嗅探中，Ctrl-C 退出".green());
    tokio::signal::ctrl_c().await?;

    info!("收到停止信号，正在排空连接...");
    proxy.stop().await;
    let _ = server.await;
    consumer.abort();

    PrettyLogger::separator();
    PrettyLogger::success(format!(
        "本次会话结束，共记录 {} 个视频，已下载 {} 个",
        store.count().await,
        store.downloaded_count().await
    ));
    Ok(())
}
