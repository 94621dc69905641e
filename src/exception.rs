// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在启动配置与请求处理生命周期中可能出现的各类异常。
//!
//! - **请求期异常**：报文解析失败、文件不存在、推送失败等，只影响当前请求。
//! - **配置期异常**：非法的附加响应头、在非 HTTPS 模式下启用回退重定向等，
//!   在调用对应的设置方法时同步返回给调用者。
//! - **监听期异常**：端口被占用、TLS 材料无法加载等。

use std::{error, fmt, io};

/// 服务器处理过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 客户端发送的请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或头部格式不正确，或头部超过长度上限。
    MalformedRequest,
    /// 客户端使用了服务器不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 监听端口已被占用。
    ListenConflict(u16),
    /// 推送流无法建立，只影响该推送本身。
    PushFailure(String),
    /// 附加响应头的名称或值非法。
    InvalidHeader(String),
    /// 只有在 HTTPS 或 HTTP/2 模式下才能启用 HTTP 回退重定向。
    FallbackRequiresHttps,
    /// 配置文件缺失或内容非法。
    InvalidConfig(String),
    /// 证书或私钥无法加载。
    Tls(String),
    /// 在响应头写出之前尝试写入响应体。
    HeadersNotSent,
    /// HTTP/2 协议层错误。
    Protocol(h2::Error),
    /// 底层 I/O 错误（读取文件、写入套接字等）。
    Io(io::Error),
}

use Exception::*;

impl fmt::Display for Exception {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            ListenConflict(port) => write!(f, "Port {} is already in use", port),
            PushFailure(reason) => write!(f, "Server push failed: {}", reason),
            InvalidHeader(reason) => write!(f, "Invalid extra header: {}", reason),
            FallbackRequiresHttps => {
                write!(f, "HTTP fallback can only be used in HTTPS or HTTP/2 mode")
            }
            InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
            Tls(reason) => write!(f, "TLS error: {}", reason),
            HeadersNotSent => write!(f, "Response body written before headers"),
            Protocol(err) => write!(f, "HTTP/2 error: {}", err),
            Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Exception {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Protocol(err) => Some(err),
            Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(err: io::Error) -> Self {
        Io(err)
    }
}

impl From<h2::Error> for Exception {
    fn from(err: h2::Error) -> Self {
        Protocol(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display() {
        assert_eq!(ListenConflict(443).to_string(), "Port 443 is already in use");
        assert_eq!(
            PushFailure("/a.js".to_string()).to_string(),
            "Server push failed: /a.js"
        );
    }

    #[test]
    fn test_io_source() {
        let err: Exception = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(err.source().is_some());
        assert!(FallbackRequiresHttps.source().is_none());
    }
}
