use std::net::SocketAddr;
use std::sync::Arc;

use rustls::ClientConfig;
use rustls_platform_verifier::ConfigVerifierExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::sniffer::is_target_host;
use crate::store::CaptureHeaders;

pub mod ca;
pub mod error;
pub mod tunnel;

pub use ca::CertificateAuthority;
pub use error::ProxyError;

/// 嗅探到目标请求时发出的捕获事件，未持久化
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub url: String,
    pub headers: CaptureHeaders,
}

/// TLS拦截代理
///
/// 每个入站连接一个任务。目标站点的CONNECT做TLS中间人，
/// 其余流量盲转发；单条连接的任何错误只关那条连接，
/// 监听循环不受影响。停止信号会排空所有连接再释放端口。
pub struct ProxyServer {
    port: u16,
    ca: Arc<CertificateAuthority>,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    upstream_addr: Option<SocketAddr>,
    upstream_tls: Option<Arc<ClientConfig>>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ProxyServer {
    pub fn new(
        port: u16,
        ca: Arc<CertificateAuthority>,
        events_tx: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        Self {
            port,
            ca,
            events_tx,
            upstream_addr: None,
            upstream_tls: None,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// 把所有中间人连接的上游改到指定地址，本地联调用；
    /// SNI和证书校验仍按原目标主机名进行
    pub fn set_upstream_override(&mut self, addr: SocketAddr) {
        self.upstream_addr = Some(addr);
    }

    /// 自定义上游TLS配置；不设置时用系统信任库校验上游证书
    pub fn set_upstream_tls(&mut self, config: Arc<ClientConfig>) {
        self.upstream_tls = Some(config);
    }

    /// 监听循环，直到 stop() 被调用
    pub async fn run(&self) -> Result<(), ProxyError> {
        // 所有中间人连接共用一份上游TLS配置
        let upstream_tls = match &self.upstream_tls {
            Some(config) => Arc::clone(config),
            None => Arc::new(ClientConfig::with_platform_verifier()),
        };

        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        info!("✅ 代理服务器启动: 0.0.0.0:{}", self.port);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("接受连接失败: {}", e);
                            continue;
                        }
                    };

                    let ca = Arc::clone(&self.ca);
                    let upstream_tls = Arc::clone(&upstream_tls);
                    let events_tx = self.events_tx.clone();
                    let upstream_addr = self.upstream_addr;
                    let token = self.token.clone();
                    self.tracker.spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            result = handle_connection(stream, ca, upstream_tls, upstream_addr, events_tx) => {
                                if let Err(e) = result {
                                    debug!("连接关闭: {}: {}", peer, e);
                                }
                            }
                        }
                    });
                }
            }
        }

        drop(listener);
        info!("⏹️ 代理服务器已停止");
        Ok(())
    }

    /// 停止监听并排空所有活动连接
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    ca: Arc<CertificateAuthority>,
    upstream_tls: Arc<ClientConfig>,
    upstream_addr: Option<SocketAddr>,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
) -> Result<(), ProxyError> {
    let (head, leftover) = match tunnel::read_head(&mut stream).await? {
        Some(pair) => pair,
        None => return Ok(()),
    };

    if head.method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = parse_connect_target(&head.target)?;
        stream
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;

        if is_target_host(&host) && port == 443 {
            if !leftover.is_empty() {
                // TLS握手必须从头读，没等200就发数据的客户端这里救不了
                debug!("忽略CONNECT确认前收到的 {} 字节", leftover.len());
            }
            debug!("拦截目标站点连接: {}:{}", host, port);
            tunnel::run_mitm(stream, &host, port, upstream_addr, &ca, upstream_tls, &events_tx).await
        } else {
            tunnel::run_blind_tunnel(stream, &host, port, &leftover).await
        }
    } else if head.target.starts_with('/') {
        // 直接打到代理端口的明文请求：下发根证书的安装入口
        serve_local(&mut stream, &ca, &head.target).await
    } else {
        // 普通HTTP代理请求，整条转发
        forward_plain_http(stream, head, leftover).await
    }
}

fn parse_connect_target(target: &str) -> Result<(String, u16), ProxyError> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::BadConnect(target.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ProxyError::BadConnect(target.to_string()))?;
    if host.is_empty() {
        return Err(ProxyError::BadConnect(target.to_string()));
    }
    Ok((host.to_string(), port))
}

// GET /cert 返回根证书PEM，手机浏览器访问即可安装
async fn serve_local(
    stream: &mut TcpStream,
    ca: &CertificateAuthority,
    target: &str,
) -> Result<(), ProxyError> {
    let path = target.split('?').next().unwrap_or(target);
    let response = match path {
        "/cert" | "/cert.pem" => {
            let pem = ca.ca_cert_pem();
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/x-x509-ca-cert\r\nContent-Disposition: attachment; filename=\"finder-sniffer-ca.pem\"\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                pem.len(),
                pem
            )
        }
        _ => {
            let body = "访问 /cert 下载根证书";
            format!(
                "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        }
    };
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

// 绝对形式的明文HTTP请求：转发到上游80端口，请求行改写成源形式
async fn forward_plain_http(
    mut stream: TcpStream,
    head: tunnel::RequestHead,
    leftover: Vec<u8>,
) -> Result<(), ProxyError> {
    let url = url::Url::parse(&head.target)
        .map_err(|_| ProxyError::BadRequest(format!("无效的代理目标: {}", head.target)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::InvalidHost(head.target.clone()))?
        .to_string();
    let port = url.port().unwrap_or(80);

    let mut upstream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| ProxyError::Upstream(format!("{}:{}", host, port), e.to_string()))?;

    // 改写请求行，其余头部原样
    let origin_form = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    let head_text = String::from_utf8_lossy(&head.raw);
    let mut lines = head_text.split("\r\n");
    let _ = lines.next();
    let rest: Vec<&str> = lines.collect();
    let rewritten = format!(
        "{} {} HTTP/1.1\r\n{}",
        head.method,
        origin_form,
        rest.join("\r\n")
    );
    upstream.write_all(rewritten.as_bytes()).await?;
    if !leftover.is_empty() {
        upstream.write_all(&leftover).await?;
    }

    // 余下的请求体和响应都透传
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
    Ok(())
}
