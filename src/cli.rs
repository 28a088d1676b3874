use clap::Parser;
use std::path::PathBuf;

/// 微信视频号嗅探下载器
#[derive(Parser, Debug)]
#[command(name = "findersniff")]
#[command(version = "1.0")]
#[command(about = "一个简单的微信视频号嗅探下载工具", long_about = None)]
pub struct Cli {
    /// 代理监听端口
    #[arg(long, value_name = "PORT")]
    #[arg(default_value_t = 8888)]
    pub port: u16,

    /// 下载保存目录
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = "downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub download_dir: PathBuf,

    /// 捕获记录文件
    #[arg(long, value_name = "FILE")]
    #[arg(default_value = "videos.json")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub db_path: PathBuf,

    /// 根证书目录
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = "certs")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub ca_dir: PathBuf,

    #[arg(long, value_name = "并发数", default_value_t = 3)]
    pub concurrency: usize,

    /// 捕获到视频后自动下载（含封面）
    #[arg(long)]
    pub auto_download: bool,
}
