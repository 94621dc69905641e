// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 重定向
//!
//! 在明文端口上监听，对每个请求返回 301，将客户端重定向到同一 Host 与路径的
//! `https://` 地址，随后关闭连接。

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::{
    connection::read_head,
    exception::Exception,
    header::ResponseHead,
    param::*,
    response::Response,
    server::{bind, LogSink},
};

/// 重定向目标：`https://<host><原始请求目标>`
pub fn redirect_location(host: &str, target: &str) -> String {
    format!("https://{}{}", host, target)
}

/// 只读取请求行与 Host，返回 (host, 请求目标)。
///
/// 方法与 HTTP 次版本都不做限制，请求行或 Host 不可读时返回 `None`。
pub fn redirect_target(head: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(head).ok()?;
    let mut lines = text.split(CRLF);
    let mut parts = lines.next()?.split_whitespace();
    let (_method, target, version) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return None;
    }
    let host = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.trim())
        .filter(|host| !host.is_empty())?;
    Some((host.to_string(), target.to_string()))
}

pub struct FallbackRedirector {
    listener: TcpListener,
}

impl FallbackRedirector {
    pub async fn bind(addr: SocketAddr) -> Result<Self, Exception> {
        Ok(Self {
            listener: bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Exception> {
        Ok(self.listener.local_addr()?)
    }

    /// 接受连接并逐个重定向，直到任务被取消
    pub async fn run(self, sink: LogSink) {
        let mut next_id: u128 = 0;
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("重定向端口接受连接失败：{}", e);
                    continue;
                }
            };
            let id = next_id;
            next_id += 1;
            let sink = sink.clone();
            tokio::spawn(async move {
                if let Err(e) = redirect_connection(stream, id, sink).await {
                    debug!("[ID{}]重定向{}失败：{}", id, peer, e);
                }
            });
        }
    }
}

/// 读取一个请求并写出 301 响应
pub async fn redirect_connection<IO>(mut io: IO, id: u128, sink: LogSink) -> Result<(), Exception>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(1024);
    let len = match read_head(&mut io, &mut buf).await? {
        Some(len) => len,
        None => return Ok(()),
    };
    let (head, body) = match redirect_target(&buf[..len]) {
        Some((host, target)) => {
            let location = redirect_location(&host, &target);
            sink(&format!("用户使用HTTP访问，重定向到 {}", location));
            let mut head = ResponseHead::new(301);
            head.set("Location", &location);
            head.set("Server", SERVER_NAME);
            (head, Bytes::new())
        }
        None => {
            warn!("[ID{}]无法重定向：请求不完整或缺少Host", id);
            let mut head = ResponseHead::new(400);
            head.set("Content-Type", "text/plain;charset=utf-8");
            head.set("Server", SERVER_NAME);
            (head, Bytes::from_static(b"Bad Request"))
        }
    };

    {
        let mut response = Response::http1(&mut io, id, false, false);
        response.send(head, body).await?;
    }
    let _ = io.shutdown().await;
    Ok(())
}
