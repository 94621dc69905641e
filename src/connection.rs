// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接处理
//!
//! TLS 握手后按 ALPN 结果选择 HTTP/2 或 HTTP/1.1：
//! - HTTP/1.1：同一连接上顺序处理请求，支持 keep-alive；
//! - HTTP/2：每个流在独立任务中分发，连接本身由 `accept` 循环驱动。

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use h2::server::SendResponse;
use h2::RecvStream;
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::{
    exception::Exception,
    param::*,
    request::{Body, Request},
    response::Response,
    server::Server,
    tls::ALPN_H2,
    util::HtmlBuilder,
};

impl Server {
    pub(crate) async fn handle_connection(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
    ) {
        self.connection_opened();
        debug!("建立连接：{}，当前活动连接数：{}", peer, self.active_connections());
        let result = match acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => {
                    if stream.get_ref().1.alpn_protocol() == Some(ALPN_H2) {
                        self.serve_h2(stream).await
                    } else {
                        self.serve_http1(stream).await
                    }
                }
                Err(e) => {
                    warn!("与{}的TLS握手失败：{}", peer, e);
                    Ok(())
                }
            },
            None => self.serve_http1(stream).await,
        };
        if let Err(e) = result {
            debug!("连接{}异常结束：{}", peer, e);
        }
        self.connection_closed();
        debug!("连接关闭：{}", peer);
    }

    /// 在一个 HTTP/1.1 连接上顺序处理请求，直到对端关闭或不再保持连接。
    pub async fn serve_http1<IO>(&self, mut io: IO) -> Result<(), Exception>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            let id = self.next_id();
            let head_len = match read_head(&mut io, &mut buf).await {
                Ok(Some(len)) => len,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("[ID{}]读取请求头失败：{}", id, e);
                    self.reject(&mut io, id, 400).await?;
                    return Ok(());
                }
            };
            let head = buf.split_to(head_len);
            let request = match Request::try_from(&head, id) {
                Ok(request) => request,
                Err(_) => {
                    self.reject(&mut io, id, 400).await?;
                    return Ok(());
                }
            };

            if request.is_chunked() {
                warn!("[ID{}]不支持分块编码的请求体", id);
                self.reject(&mut io, id, 400).await?;
                return Ok(());
            }
            let body = match request.content_length() {
                Ok(Some(len)) if len > MAX_BODY_SIZE => {
                    warn!("[ID{}]请求体过大：{} 字节", id, len);
                    self.reject(&mut io, id, 413).await?;
                    return Ok(());
                }
                Ok(Some(len)) => match read_body(&mut io, &mut buf, len as usize).await? {
                    Some(body) => body,
                    None => return Ok(()),
                },
                Ok(None) => Bytes::new(),
                Err(e) => {
                    warn!("[ID{}]Content-Length非法：{}", id, e);
                    self.reject(&mut io, id, 400).await?;
                    return Ok(());
                }
            };

            let head_only = request.method() == HttpRequestMethod::Head;
            let keep_alive = {
                let mut response = Response::http1(&mut io, id, head_only, request.keep_alive());
                if request.version() == HttpVersion::V1_0 {
                    response = response.close_delimited();
                }
                if let Err(e) = self.dispatch(&request, Body::Buffered(body), &mut response).await {
                    error!("[ID{}]处理请求失败：{}", id, e);
                    response.abort();
                }
                if response.headers_sent() {
                    response.finish().await?;
                } else {
                    warn!("[ID{}]请求未被任何组件响应，关闭连接", id);
                }
                response.keep_alive()
            };
            if !keep_alive {
                let _ = io.shutdown().await;
                return Ok(());
            }
        }
    }

    /// 驱动一个 HTTP/2 连接，每个流在独立任务中处理。
    pub async fn serve_h2<IO>(&self, io: IO) -> Result<(), Exception>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut connection = h2::server::handshake(io).await?;
        while let Some(result) = connection.accept().await {
            let (request, respond) = result?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_h2_stream(request, respond).await;
            });
        }
        Ok(())
    }

    async fn handle_h2_stream(&self, request: http::Request<RecvStream>, respond: SendResponse<Bytes>) {
        let id = self.next_id();
        let (parts, body) = request.into_parts();
        let head_only = parts.method == http::Method::HEAD;
        let mut response = Response::h2(respond, id, head_only);

        let request = match Request::from_h2(&parts, id) {
            Ok(request) => request,
            Err(e) => {
                warn!("[ID{}]无法处理的HTTP/2请求：{}", id, e);
                if let Err(e) = self.send_error(&mut response, 400).await {
                    debug!("[ID{}]写出400响应失败：{}", id, e);
                }
                return;
            }
        };

        if let Err(e) = self.dispatch(&request, Body::H2(body), &mut response).await {
            error!("[ID{}]处理请求失败：{}", id, e);
            response.abort();
            return;
        }
        if !response.headers_sent() {
            warn!("[ID{}]请求未被任何组件响应，重置该流", id);
            response.abort();
        } else if let Err(e) = response.finish().await {
            debug!("[ID{}]结束响应失败：{}", id, e);
        }
    }

    /// 写出错误响应并关闭连接
    async fn reject<IO>(&self, io: &mut IO, id: u128, status: u16) -> Result<(), Exception>
    where
        IO: AsyncWrite + Unpin + Send,
    {
        {
            let mut response = Response::http1(io, id, false, false);
            self.send_error(&mut response, status).await?;
        }
        let _ = io.shutdown().await;
        Ok(())
    }

    async fn send_error(&self, response: &mut Response<'_>, status: u16) -> Result<(), Exception> {
        info!("[ID{}]返回{}", response.id(), status);
        let head = self.composer().compose("text/html", status, None, &[]);
        let page = HtmlBuilder::from_status_code(status, None).build();
        response.send(head, Bytes::from(page)).await
    }
}

/// 读取到报文头结束（空行）为止，返回报文头长度。
///
/// 对端在两个请求之间正常关闭时返回 `None`。
pub(crate) async fn read_head<IO>(io: &mut IO, buf: &mut BytesMut) -> Result<Option<usize>, Exception>
where
    IO: AsyncRead + Unpin,
{
    loop {
        if let Some(len) = find_head_end(buf) {
            return Ok(Some(len));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(Exception::MalformedRequest);
        }
        buf.reserve(4096);
        if io.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(Exception::MalformedRequest)
            };
        }
    }
}

async fn read_body<IO>(io: &mut IO, buf: &mut BytesMut, len: usize) -> Result<Option<Bytes>, Exception>
where
    IO: AsyncRead + Unpin,
{
    while buf.len() < len {
        buf.reserve((len - buf.len()).min(BODY_READ_CHUNK));
        if io.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
    Ok(Some(buf.split_to(len).freeze()))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_head_and_body() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            client
                .write_all(b"POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc")
                .await
                .unwrap();
        });
        let mut buf = BytesMut::new();
        let len = read_head(&mut server, &mut buf).await.unwrap().unwrap();
        let head = buf.split_to(len);
        assert!(head.ends_with(b"\r\n\r\n"));
        let body = read_body(&mut server, &mut buf, 3).await.unwrap().unwrap();
        assert_eq!(&body[..], b"abc");
    }

    fn plain_server() -> Server {
        Server::new(
            crate::config::Config::new()
                .with_http_version(1)
                .with_secure(false)
                .with_local(true),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let server = plain_server();
        let (mut client, io) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { server.serve_http1(io).await });
        client
            .write_all(b"POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 9223372036854775000\r\n\r\nab")
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 413 Content Too Large\r\n"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_body_is_read_in_bounded_increments() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let body = vec![b'x'; 3 * BODY_READ_CHUNK + 7];
        let sent = body.clone();
        tokio::spawn(async move {
            client.write_all(&sent).await.unwrap();
        });
        let mut buf = BytesMut::new();
        let read = read_body(&mut server, &mut buf, body.len()).await.unwrap().unwrap();
        assert_eq!(&read[..], &body[..]);
    }

    #[tokio::test]
    async fn test_http10_response_is_close_delimited() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes"), "plain text").unwrap();
        let server = plain_server();
        server.set_static(dir.path());
        let (mut client, io) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { server.serve_http1(io).await });
        client
            .write_all(b"GET /notes HTTP/1.0\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.ends_with("\r\n\r\nplain text"));
    }

    #[tokio::test]
    async fn test_read_head_clean_close() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let mut buf = BytesMut::new();
        assert!(read_head(&mut server, &mut buf).await.unwrap().is_none());
    }
}
