use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::{LazyConfigAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::sniffer::is_video_url;
use crate::store::CaptureHeaders;

use super::CaptureEvent;
use super::ca::CertificateAuthority;
use super::error::ProxyError;

const MAX_HEAD_SIZE: usize = 64 * 1024;
const BODY_BUF_SIZE: usize = 16 * 1024;

/// 解析后的HTTP请求头部，raw保留原始字节用于原样转发
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub raw: Vec<u8>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> u64 {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }
}

fn parse_head(raw: Vec<u8>) -> Result<RequestHead, ProxyError> {
    let text = String::from_utf8_lossy(&raw);
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ProxyError::BadRequest("空请求".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::BadRequest(format!("无效请求行: {}", request_line)))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| ProxyError::BadRequest(format!("无效请求行: {}", request_line)))?
        .to_string();

    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| {
            l.split_once(':')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    Ok(RequestHead {
        method,
        target,
        headers,
        raw,
    })
}

/// 请求方向的解析泵
///
/// 持有方向内的读缓冲，逐个请求头解析，请求体按需转发或透传。
pub struct HttpPump<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> HttpPump<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(4096),
        }
    }

    /// 读出下一个请求头；对端正常关闭时返回 Ok(None)
    pub async fn next_head(&mut self) -> Result<Option<RequestHead>, ProxyError> {
        loop {
            if let Some(pos) = find_head_end(&self.buf) {
                let rest = self.buf.split_off(pos + 4);
                let raw = std::mem::replace(&mut self.buf, rest);
                return Ok(Some(parse_head(raw)?));
            }
            if self.buf.len() > MAX_HEAD_SIZE {
                return Err(ProxyError::BadRequest("请求头过大".to_string()));
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProxyError::BadRequest("请求头不完整".to_string()));
            }
        }
    }

    /// 转发定长请求体
    pub async fn forward_body<W>(&mut self, writer: &mut W, mut remaining: u64) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        // 先吐掉缓冲里已经读到的部分
        if !self.buf.is_empty() {
            let take = (self.buf.len() as u64).min(remaining) as usize;
            writer.write_all(&self.buf[..take]).await?;
            self.buf.drain(..take);
            remaining -= take as u64;
        }

        let mut chunk = vec![0u8; BODY_BUF_SIZE];
        while remaining > 0 {
            let want = (chunk.len() as u64).min(remaining) as usize;
            let n = self.reader.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(ProxyError::BadRequest("请求体不完整".to_string()));
            }
            writer.write_all(&chunk[..n]).await?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// 放弃解析，余下的字节全部原样透传
    pub async fn passthrough<W>(&mut self, writer: &mut W) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.buf.is_empty() {
            writer.write_all(&self.buf).await?;
            self.buf.clear();
        }
        tokio::io::copy(&mut self.reader, writer).await?;
        Ok(())
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// 读一个请求头并交还多读出来的字节，不长期占用流
pub async fn read_head<R>(reader: &mut R) -> Result<Option<(RequestHead, Vec<u8>)>, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut pump = HttpPump::new(reader);
    match pump.next_head().await? {
        Some(head) => Ok(Some((head, pump.buf))),
        None => Ok(None),
    }
}

/// 对目标站点连接做TLS中间人
///
/// 对客户端扮演TLS服务端（按SNI现签叶子证书），对真实上游扮演TLS客户端，
/// 解密后的每个请求都过一遍分类器，命中就发捕获事件，转发本身不受影响。
pub(crate) async fn run_mitm(
    client_tcp: TcpStream,
    connect_host: &str,
    connect_port: u16,
    upstream_addr: Option<std::net::SocketAddr>,
    ca: &CertificateAuthority,
    upstream_tls: Arc<rustls::ClientConfig>,
    events_tx: &mpsc::UnboundedSender<CaptureEvent>,
) -> Result<(), ProxyError> {
    // 先看ClientHello里的SNI，再决定签哪张叶子证书
    let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), client_tcp).await?;
    let sni = start
        .client_hello()
        .server_name()
        .map(str::to_string)
        .unwrap_or_else(|| connect_host.to_string());
    let config = ca.server_config(&sni)?;
    let client_tls = start.into_stream(config).await?;

    // 同时以TLS客户端身份连上真实上游；地址被改写时SNI保持不变
    let upstream_tcp = match upstream_addr {
        Some(addr) => TcpStream::connect(addr).await,
        None => TcpStream::connect((connect_host, connect_port)).await,
    }
    .map_err(|e| {
        ProxyError::Upstream(format!("{}:{}", connect_host, connect_port), e.to_string())
    })?;
    let server_name = ServerName::try_from(sni.clone())
        .map_err(|_| ProxyError::InvalidHost(sni.clone()))?;
    let upstream = TlsConnector::from(upstream_tls)
        .connect(server_name, upstream_tcp)
        .await?;

    let (client_read, mut client_write) = tokio::io::split(client_tls);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    // 响应方向不解析，原样转发
    let response_copy = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
    });

    let mut pump = HttpPump::new(client_read);
    loop {
        let head = match pump.next_head().await {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(e) => {
                debug!("请求解析结束: {}", e);
                break;
            }
        };

        let host = head.header("host").unwrap_or(&sni).to_string();
        let url = if head.target.starts_with('/') {
            format!("https://{}{}", host, head.target)
        } else {
            head.target.clone()
        };

        // 分类是常数时间检查，不挡数据通路；事件发不出去只记日志
        if is_video_url(&url) {
            info!("✅ 捕获视频: {}", url);
            let event = CaptureEvent {
                url,
                headers: CaptureHeaders {
                    referer: head.header("referer").unwrap_or_default().to_string(),
                    user_agent: head.header("user-agent").unwrap_or_default().to_string(),
                    host,
                },
            };
            if events_tx.send(event).is_err() {
                warn!("捕获事件通道已关闭，事件丢弃");
            }
        }

        upstream_write.write_all(&head.raw).await?;

        if head.is_chunked() {
            // chunked请求体不解析，这条连接余下的字节直接透传
            pump.passthrough(&mut upstream_write).await?;
            break;
        }
        let len = head.content_length();
        if len > 0 {
            pump.forward_body(&mut upstream_write, len).await?;
        }
    }

    let _ = upstream_write.shutdown().await;
    let _ = response_copy.await;
    Ok(())
}

/// 非目标站点：不碰TLS，两个方向盲转发
pub(crate) async fn run_blind_tunnel(
    mut client: TcpStream,
    host: &str,
    port: u16,
    initial: &[u8],
) -> Result<(), ProxyError> {
    let mut upstream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProxyError::Upstream(format!("{}:{}", host, port), e.to_string()))?;
    if !initial.is_empty() {
        upstream.write_all(initial).await?;
    }
    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    Ok(())
}
