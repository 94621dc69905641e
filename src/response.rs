// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应写出模块
//!
//! `Response` 是一次请求/响应交换的写出端，屏蔽了 HTTP/1.1 与 HTTP/2 的差异：
//! - 响应头只写出一次，重复写出是静默的空操作；
//! - 响应体按块写出，HTTP/1.1 依靠套接字写就绪、HTTP/2 依靠流控窗口实现背压；
//! - 只有 HTTP/2 的主响应能提供 [`Pusher`]，推送响应本身不具备推送能力。

use std::future::poll_fn;
use std::io;

use bytes::Bytes;
use chrono::Utc;
use h2::server::{SendPushedResponse, SendResponse};
use h2::{Reason, SendStream};
use http::{HeaderName, HeaderValue};
use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{exception::Exception, header::ResponseHead, param::*};

/// HTTP/2 中禁止出现的逐跳头部
const CONNECTION_SPECIFIC_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

enum Transport<'a> {
    Http1(&'a mut (dyn AsyncWrite + Send + Unpin)),
    H2 {
        respond: SendResponse<Bytes>,
        body: Option<SendStream<Bytes>>,
    },
    Pushed {
        respond: SendPushedResponse<Bytes>,
        body: Option<SendStream<Bytes>>,
    },
}

pub struct Response<'a> {
    id: u128,
    transport: Transport<'a>,
    /// HEAD 请求只写出响应头
    head_only: bool,
    keep_alive: bool,
    status: Option<u16>,
    chunked: bool,
    /// 长度未知的响应体以关闭连接结束，不使用分块编码（HTTP/1.0 客户端）
    close_delimited: bool,
    finished: bool,
}

impl<'a> Response<'a> {
    /// 基于 HTTP/1.1 连接的写出端
    pub fn http1(
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
        id: u128,
        head_only: bool,
        keep_alive: bool,
    ) -> Self {
        Self::with_transport(Transport::Http1(writer), id, head_only, keep_alive)
    }

    /// HTTP/1.0 客户端不理解分块编码：响应体写完后关闭连接
    pub fn close_delimited(mut self) -> Self {
        self.close_delimited = true;
        self.keep_alive = false;
        self
    }

    fn with_transport(transport: Transport<'a>, id: u128, head_only: bool, keep_alive: bool) -> Self {
        Self {
            id,
            transport,
            head_only,
            keep_alive,
            status: None,
            chunked: false,
            close_delimited: false,
            finished: false,
        }
    }
}

impl Response<'static> {
    /// 基于 HTTP/2 流的主响应
    pub fn h2(respond: SendResponse<Bytes>, id: u128, head_only: bool) -> Self {
        Self::with_transport(Transport::H2 { respond, body: None }, id, head_only, true)
    }

    fn pushed(respond: SendPushedResponse<Bytes>, id: u128) -> Self {
        Self::with_transport(Transport::Pushed { respond, body: None }, id, false, true)
    }
}

impl<'a> Response<'a> {
    /// 写出响应头。
    ///
    /// 返回 `false` 表示响应头此前已经写出，本次调用不产生任何效果。
    pub async fn write_head(&mut self, head: &ResponseHead) -> Result<bool, Exception> {
        if self.status.is_some() {
            debug!("[ID{}]响应头已发送，忽略重复写出", self.id);
            return Ok(false);
        }
        self.status = Some(head.status());
        let end_of_stream = self.head_only || head.content_length() == Some(0);

        match &mut self.transport {
            Transport::Http1(writer) => {
                self.chunked =
                    head.content_length().is_none() && !self.head_only && !self.close_delimited;
                let bytes = http1_head_bytes(head, self.chunked, self.keep_alive);
                writer.write_all(&bytes).await?;
                if end_of_stream {
                    writer.flush().await?;
                }
            }
            Transport::H2 { respond, body } => {
                let stream = respond.send_response(h2_head(self.id, head)?, end_of_stream)?;
                if !end_of_stream {
                    *body = Some(stream);
                }
            }
            Transport::Pushed { respond, body } => {
                let stream = respond.send_response(h2_head(self.id, head)?, end_of_stream)?;
                if !end_of_stream {
                    *body = Some(stream);
                }
            }
        }
        if end_of_stream {
            self.finished = true;
        }
        Ok(true)
    }

    /// 写出一块响应体。HEAD 请求或已结束的响应会丢弃数据。
    pub async fn write(&mut self, data: Bytes) -> Result<(), Exception> {
        if self.status.is_none() {
            return Err(Exception::HeadersNotSent);
        }
        if self.finished || self.head_only || data.is_empty() {
            return Ok(());
        }
        match &mut self.transport {
            Transport::Http1(writer) => {
                if self.chunked {
                    writer
                        .write_all(format!("{:X}{}", data.len(), CRLF).as_bytes())
                        .await?;
                    writer.write_all(&data).await?;
                    writer.write_all(CRLF.as_bytes()).await?;
                } else {
                    writer.write_all(&data).await?;
                }
            }
            Transport::H2 { body, .. } | Transport::Pushed { body, .. } => {
                if let Some(stream) = body {
                    send_with_capacity(stream, data).await?;
                }
            }
        }
        Ok(())
    }

    /// 结束响应。可重复调用。
    pub async fn finish(&mut self) -> Result<(), Exception> {
        if self.finished || self.status.is_none() {
            return Ok(());
        }
        self.finished = true;
        match &mut self.transport {
            Transport::Http1(writer) => {
                if self.chunked {
                    writer.write_all(b"0\r\n\r\n").await?;
                }
                writer.flush().await?;
            }
            Transport::H2 { body, .. } | Transport::Pushed { body, .. } => {
                if let Some(stream) = body {
                    stream.send_data(Bytes::new(), true)?;
                }
            }
        }
        Ok(())
    }

    /// 一次性写出带 `Content-Length` 的完整响应
    pub async fn send(&mut self, head: ResponseHead, body: Bytes) -> Result<(), Exception> {
        let head = head.with_content_length(body.len() as u64);
        if self.write_head(&head).await? {
            self.write(body).await?;
            self.finish().await?;
        }
        Ok(())
    }

    /// 响应体写出中途失败时中止交换。
    ///
    /// HTTP/2 重置该流；HTTP/1.1 连接随后会被关闭。
    pub fn abort(&mut self) {
        self.finished = true;
        self.keep_alive = false;
        match &mut self.transport {
            Transport::Http1(_) => {}
            Transport::H2 { body, respond } => match body {
                Some(stream) => stream.send_reset(Reason::INTERNAL_ERROR),
                None => respond.send_reset(Reason::INTERNAL_ERROR),
            },
            Transport::Pushed { body, respond } => match body {
                Some(stream) => stream.send_reset(Reason::CANCEL),
                None => respond.send_reset(Reason::CANCEL),
            },
        }
    }

    /// 只有 HTTP/2 的主响应、且响应尚未结束时才能推送
    pub fn pusher(&mut self) -> Option<Pusher<'_>> {
        if self.finished {
            return None;
        }
        let id = self.id;
        match &mut self.transport {
            Transport::H2 { respond, .. } => Some(Pusher { id, respond }),
            _ => None,
        }
    }
}

impl<'a> Response<'a> {
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn headers_sent(&self) -> bool {
        self.status.is_some()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 交换结束后 HTTP/1.1 连接是否可以继续复用
    pub fn keep_alive(&self) -> bool {
        self.keep_alive && self.finished
    }
}

/// HTTP/2 主响应上的推送句柄。
///
/// 生成的推送响应不携带推送句柄，因此推送不会继续级联。
pub struct Pusher<'r> {
    id: u128,
    respond: &'r mut SendResponse<Bytes>,
}

impl<'r> Pusher<'r> {
    /// 发出一个 PUSH_PROMISE，返回被承诺资源的响应写出端。
    pub fn push(&mut self, uri: http::Uri) -> Result<Response<'static>, Exception> {
        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .body(())
            .map_err(|e| Exception::PushFailure(e.to_string()))?;
        let pushed = self
            .respond
            .push_request(request)
            .map_err(|e| Exception::PushFailure(e.to_string()))?;
        Ok(Response::pushed(pushed, self.id))
    }
}

/// 按 HTTP-date 格式（IMF-fixdate）格式化当前时间
fn format_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn http1_head_bytes(head: &ResponseHead, chunked: bool, keep_alive: bool) -> Vec<u8> {
    let mut header = [
        "HTTP/1.1 ",
        head.status().to_string().as_str(),
        " ",
        head.reason(),
        CRLF,
    ]
    .concat();
    for (name, value) in head.headers() {
        header.push_str(&[name.as_str(), ": ", value.as_str(), CRLF].concat());
    }
    match head.content_length() {
        Some(len) => header.push_str(&["Content-Length: ", len.to_string().as_str(), CRLF].concat()),
        None if chunked => header.push_str(&["Transfer-Encoding: chunked", CRLF].concat()),
        None => {}
    }
    header.push_str(&["Date: ", format_date().as_str(), CRLF].concat());
    if !keep_alive {
        header.push_str(&["Connection: close", CRLF].concat());
    }
    header.push_str(CRLF);
    header.into_bytes()
}

fn h2_head(id: u128, head: &ResponseHead) -> Result<http::Response<()>, Exception> {
    let mut response = http::Response::builder()
        .status(head.status())
        .body(())
        .map_err(|e| Exception::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    let headers = response.headers_mut();
    for (name, value) in head.headers() {
        if CONNECTION_SPECIFIC_HEADERS
            .iter()
            .any(|h| name.eq_ignore_ascii_case(h))
        {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("[ID{}]跳过非法的响应头：{}: {}", id, name, value),
        }
    }
    if let Some(len) = head.content_length() {
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    if let Ok(date) = HeaderValue::from_str(&format_date()) {
        headers.insert(http::header::DATE, date);
    }
    Ok(response)
}

/// 等待流控窗口后再发送数据，窗口不足时分段发送
async fn send_with_capacity(stream: &mut SendStream<Bytes>, mut data: Bytes) -> Result<(), Exception> {
    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(Ok(0)) => continue,
            Some(Ok(capacity)) => {
                let chunk = data.split_to(capacity.min(data.len()));
                stream.send_data(chunk, false)?;
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(Exception::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "HTTP/2 流已关闭",
                )))
            }
        }
    }
    Ok(())
}
