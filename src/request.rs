// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 将 HTTP/1.1 报文头或 HTTP/2 的请求头转换为统一的 `Request` 结构体，
//! 并提供请求体的收集操作。涵盖：
//! 1. 请求行（Request-Line）的解析（方法、路径、版本）。
//! 2. 标头（Headers）的提取，字段名大小写不敏感。
//! 3. 请求体的"收集直到流结束"操作。

use bytes::{Bytes, BytesMut};
use chrono::Local;
use log::error;

use crate::{exception::Exception, param::*};

/// 表示一个 HTTP 请求的元数据。
///
/// 请求体不在此结构体中，而是由 [`Body`] 单独持有，只有需要时才被收集。
#[derive(Debug, Clone)]
pub struct Request {
    /// 全局请求 ID，用于在日志中追踪
    id: u128,
    method: HttpRequestMethod,
    /// 请求目标（包含查询字符串）
    path: String,
    version: HttpVersion,
    /// `Host` 头或 HTTP/2 的 `:authority`
    host: Option<String>,
    /// HTTP/2 的 `:scheme`
    scheme: Option<String>,
    user_agent: Option<String>,
    /// 按出现顺序保存的全部标头
    headers: Vec<(String, String)>,
}

impl Request {
    /// 从 HTTP/1.1 报文头字节尝试构建 `Request` 实例。
    ///
    /// `buffer` 只应包含请求行与标头（到空行为止），请求体由连接层另行读取。
    ///
    /// # 错误处理
    /// 报文不是 UTF-8、请求行残缺、方法或版本不受支持时返回对应的 `Exception`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 1. 将字节流转换为字符串，失败则判定为非法的 HTTP 请求
        let request_string = match std::str::from_utf8(buffer) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);

        // 2. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let first_line = request_lines.next().unwrap_or("");
        let first_line_parts: Vec<&str> = first_line.split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::MalformedRequest);
        }

        let method: HttpRequestMethod = match first_line_parts[0].parse() {
            Ok(method) => method,
            Err(e) => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, first_line_parts[0]);
                return Err(e);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格（虽然不规范），通过 join 尝试恢复
        let path = first_line_parts[1..first_line_parts.len() - 1].join(" ");

        // 3. 迭代各行解析 Headers
        let mut headers = Vec::new();
        for line in request_lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
                None => {
                    error!("[ID{}]无法解析的请求头：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        let mut request = Self {
            id,
            method,
            path,
            version,
            host: None,
            scheme: None,
            user_agent: None,
            headers,
        };
        request.host = request.header("host").map(str::to_string);
        request.user_agent = request.header("user-agent").map(str::to_string);
        Ok(request)
    }

    /// 从 HTTP/2 请求头构建 `Request`。
    pub fn from_h2(parts: &http::request::Parts, id: u128) -> Result<Self, Exception> {
        let method = HttpRequestMethod::try_from(&parts.method)?;
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let headers: Vec<(String, String)> = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut request = Self {
            id,
            method,
            path,
            version: HttpVersion::V2,
            host: parts.uri.authority().map(|a| a.to_string()),
            scheme: parts.uri.scheme_str().map(str::to_string),
            user_agent: None,
            headers,
        };
        if request.host.is_none() {
            request.host = request.header("host").map(str::to_string);
        }
        request.user_agent = request.header("user-agent").map(str::to_string);
        Ok(request)
    }
}

impl Request {
    /// 按名称（大小写不敏感）查找第一个匹配的标头值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 请求体长度，未声明时为 `None`
    pub fn content_length(&self) -> Result<Option<u64>, Exception> {
        match self.header("content-length") {
            Some(len) => len
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Exception::MalformedRequest),
            None => Ok(None),
        }
    }

    /// 请求体是否使用分块传输编码
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map_or(false, |te| te.to_ascii_lowercase().contains("chunked"))
    }

    /// HTTP/1.1 默认保持连接，除非客户端显式要求关闭；HTTP/1.0 只有显式要求才保持
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection");
        match self.version {
            HttpVersion::V1_0 => connection.map_or(false, |c| c.eq_ignore_ascii_case("keep-alive")),
            _ => !connection.map_or(false, |c| c.eq_ignore_ascii_case("close")),
        }
    }

    /// 不含查询字符串的路径部分
    pub fn pathname(&self) -> &str {
        match self.path.split_once('?') {
            Some((pathname, _)) => pathname,
            None => &self.path,
        }
    }

    /// 访问日志行：时间戳、方法、路径、客户端标识
    pub fn access_line(&self) -> String {
        format!(
            "[{}] {} {} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.method,
            self.pathname(),
            self.user_agent.as_deref().unwrap_or("-"),
        )
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 获取请求目标（含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// 请求体。
///
/// HTTP/1 的请求体在读取报文时已按 `Content-Length` 完整读入；
/// HTTP/2 的请求体保持为流，直到有处理器需要时才收集。
#[derive(Debug)]
pub enum Body {
    Buffered(Bytes),
    H2(h2::RecvStream),
}

impl Body {
    pub fn empty() -> Self {
        Body::Buffered(Bytes::new())
    }

    /// 读取直到流结束，返回完整的请求体。
    pub async fn collect(self) -> Result<Bytes, Exception> {
        match self {
            Body::Buffered(bytes) => Ok(bytes),
            Body::H2(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.data().await {
                    let chunk = chunk?;
                    stream.flow_control().release_capacity(chunk.len())?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[test]
    fn test_parse_get_request() {
        let request_str = "GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "/");
        assert_eq!(request.user_agent(), Some("Test-Browser"));
        assert_eq!(request.host(), Some("localhost:7878"));
        assert_eq!(request.header("accept-encoding"), Some("gzip"));
        assert!(request.keep_alive());
    }

    #[test]
    fn test_parse_post_request() {
        let request_str =
            "POST /submit HTTP/1.1\r\nHost: localhost:7878\r\nContent-Length: 10\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.path(), "/submit");
        assert_eq!(request.content_length().unwrap(), Some(10));
    }

    #[test]
    fn test_unsupported_method() {
        let request_str = "TRACE /resource HTTP/1.1\r\nHost: localhost:7878\r\n\r\n";

        let result = Request::try_from(request_str.as_bytes(), 0);

        match result.unwrap_err() {
            Exception::UnSupportedRequestMethod => {}
            e => panic!("Expected UnSupportedRequestMethod error, got {:?}", e),
        }
    }

    #[test]
    fn test_unsupported_http_version() {
        let request_str = "GET / HTTP/2.0\r\nHost: localhost:7878\r\n\r\n";

        let result = Request::try_from(request_str.as_bytes(), 0);

        match result.unwrap_err() {
            Exception::UnsupportedHttpVersion => {}
            e => panic!("Expected UnsupportedHttpVersion error, got {:?}", e),
        }
    }

    #[test]
    fn test_http10_request() {
        let request = Request::try_from(b"GET /old HTTP/1.0\r\nHost: example.com\r\n\r\n", 0).unwrap();
        assert_eq!(request.version(), HttpVersion::V1_0);
        assert!(!request.keep_alive());

        let request = Request::try_from(
            b"GET /old HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n",
            0,
        )
        .unwrap();
        assert!(request.keep_alive());
    }

    #[test]
    fn test_invalid_utf8() {
        let buffer = vec![0xFF, 0xFE, 0xFD];

        match Request::try_from(&buffer, 0).unwrap_err() {
            Exception::RequestIsNotUtf8 => {}
            e => panic!("Expected RequestIsNotUtf8 error, got {:?}", e),
        }
    }

    #[test]
    fn test_malformed_request_line() {
        let result = Request::try_from(b"GET\r\n\r\n", 0);
        assert!(matches!(result, Err(Exception::MalformedRequest)));
    }

    #[test]
    fn test_case_insensitive_headers() {
        let request_str =
            "GET / HTTP/1.1\r\nhost: localhost\r\nuser-agent: Test\r\nCONNECTION: Close\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.user_agent(), Some("Test"));
        assert_eq!(request.header("Host"), Some("localhost"));
        assert!(!request.keep_alive());
    }

    #[test]
    fn test_path_with_query_string() {
        let request_str = "GET /page?id=123&name=test HTTP/1.1\r\nHost: localhost\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.path(), "/page?id=123&name=test");
        assert_eq!(request.pathname(), "/page");
    }

    #[test]
    fn test_access_line() {
        let request_str = "GET /a/b.js?v=1 HTTP/1.1\r\nHost: localhost\r\nUser-Agent: curl/8.0\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();
        let line = request.access_line();

        assert!(line.starts_with('['));
        assert!(line.ends_with("] GET /a/b.js curl/8.0"));
    }

    #[test]
    fn test_from_h2_parts() {
        let (parts, _) = http::Request::builder()
            .method("POST")
            .uri("https://example.com/api/echo?x=1")
            .header("user-agent", "h2-client")
            .body(())
            .unwrap()
            .into_parts();

        let request = Request::from_h2(&parts, 7).unwrap();

        assert_eq!(request.version(), HttpVersion::V2);
        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.path(), "/api/echo?x=1");
        assert_eq!(request.host(), Some("example.com"));
        assert_eq!(request.scheme(), Some("https"));
        assert_eq!(request.user_agent(), Some("h2-client"));
    }

    #[tokio::test]
    async fn test_buffered_body_collect() {
        let body = Body::Buffered(Bytes::from_static(b"hello"));
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(Body::empty().collect().await.unwrap().is_empty());
    }
}
