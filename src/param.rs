// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了 `pushserve` 使用的 HTTP 协议常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 默认的 MIME 类型映射表（可被注入的查找函数替换）。
//! - 压缩类型集合与长缓存类型集合。
//! - HTTP 方法、版本及编码格式的强类型枚举。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::exception::Exception;

/// 服务器名称标识，用于 `Server` 与 `X-Powered-By` 响应头
pub const SERVER_NAME: &str = "pushserve";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 目录请求时探测的首页文件名
pub const INDEX_FILE: &str = "index.html";

/// 长缓存策略使用的 `Cache-Control` 值（一年）
pub const CACHE_CONTROL_ONE_YEAR: &str = "max-age=31536000";

/// 文本类内容附加的字符集后缀
pub const CHARSET_SUFFIX: &str = ";charset=utf-8";

/// MIME 查找失败时使用的默认类型
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// HTTP/1 请求头部允许的最大字节数，超过即视为非法请求
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// HTTP/1 请求体允许的最大字节数，超过时返回 413 并关闭连接
pub const MAX_BODY_SIZE: u64 = 8 * 1024 * 1024;

/// 读取请求体时每次追加的缓冲区容量
pub const BODY_READ_CHUNK: usize = 16 * 1024;

lazy_static! {
    /// 可压缩（gzip）的文件扩展名集合。
    ///
    /// 与 [`CACHEABLE_TYPES`] 互不相交：同一扩展名不得同时出现在两个集合中。
    pub static ref COMPRESSIBLE_TYPES: Vec<&'static str> = vec![
        "html", "css", "js", "json", "svg", "xml", "txt", "md", "wasm", "mjs", "jsm", "ts",
        "tsx", "jsx", "map", "ttf", "otf", "eot", "woff", "woff2",
    ];

    /// 允许长期缓存的二进制媒体扩展名集合。
    pub static ref CACHEABLE_TYPES: Vec<&'static str> = vec![
        "mp3", "mp4", "webm", "ogg", "wav", "flac", "aac", "m4a", "jpg", "jpeg", "png", "gif",
        "ico", "webp", "bmp", "avif",
    ];
}

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");

        // 3xx: 重定向 (Redirection)
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(408, "Request Timeout");
        map.insert(411, "Length Required");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型（Media Type）的默认映射表。
    ///
    /// 这里的值不带字符集参数，字符集由内容策略决定是否追加。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("aac", "audio/aac");
        map.insert("avif", "image/avif");
        map.insert("bin", "application/octet-stream");
        map.insert("bmp", "image/bmp");
        map.insert("css", "text/css");
        map.insert("csv", "text/csv");
        map.insert("eot", "application/vnd.ms-fontobject");
        map.insert("flac", "audio/flac");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html");
        map.insert("html", "text/html");
        map.insert("ico", "image/x-icon");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("js", "text/javascript");
        map.insert("jsm", "text/javascript");
        map.insert("json", "application/json");
        map.insert("jsx", "text/javascript");
        map.insert("m4a", "audio/mp4");
        map.insert("map", "application/json");
        map.insert("md", "text/markdown");
        map.insert("mjs", "text/javascript");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("ogg", "audio/ogg");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("tar", "application/x-tar");
        map.insert("ts", "video/mp2t");
        map.insert("tsx", "text/tsx");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain");
        map.insert("wasm", "application/wasm");
        map.insert("wav", "audio/wav");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map
    };
}

/// 默认的 MIME 查找函数，未知扩展名返回 `None`。
pub fn default_mime_lookup(extension: &str) -> Option<String> {
    MIME_TYPES
        .get(extension.to_ascii_lowercase().as_str())
        .map(|t| t.to_string())
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本，响应体以关闭连接作为结束
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
    /// HTTP/2 版本
    V2,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Delete,
    Patch,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
}

impl FromStr for HttpRequestMethod {
    type Err = Exception;

    /// 方法名大小写不敏感
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpRequestMethod::Get),
            "HEAD" => Ok(HttpRequestMethod::Head),
            "OPTIONS" => Ok(HttpRequestMethod::Options),
            "POST" => Ok(HttpRequestMethod::Post),
            "PUT" => Ok(HttpRequestMethod::Put),
            "DELETE" => Ok(HttpRequestMethod::Delete),
            "PATCH" => Ok(HttpRequestMethod::Patch),
            _ => Err(Exception::UnSupportedRequestMethod),
        }
    }
}

impl TryFrom<&http::Method> for HttpRequestMethod {
    type Error = Exception;

    fn try_from(method: &http::Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "1.0"),
            HttpVersion::V1_1 => write!(f, "1.1"),
            HttpVersion::V2 => write!(f, "2"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
            HttpRequestMethod::Put => write!(f, "PUT"),
            HttpRequestMethod::Delete => write!(f, "DELETE"),
            HttpRequestMethod::Patch => write!(f, "PATCH"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
        }
    }
}
