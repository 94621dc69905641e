// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 响应头组装模块
//!
//! 根据内容类型、状态码、可选的编码以及两层覆盖头（单次调用的头、实例级
//! 附加头）生成最终的响应头集合。全局关闭 HTTP 缓存时，任何一层都不能
//! 写入 `Cache-Control`。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{exception::Exception, param::*};

/// 一个待写出的响应头：状态码、有序的头部列表与可选的内容长度。
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    status: u16,
    headers: Vec<(String, String)>,
    content_length: Option<u64>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_length: None,
        }
    }

    /// 设置或替换同名头部（名称大小写不敏感）
    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// 状态码对应的原因短语
    pub fn reason(&self) -> &'static str {
        STATUS_CODES.get(&self.status).copied().unwrap_or("Unknown")
    }
}

/// 实例级附加响应头的设置参数。
///
/// 单个头部集合与多个头部集合是两个显式的变体，不再在运行时检查参数形状。
#[derive(Debug, Clone)]
pub enum ExtraHeaders {
    Single(BTreeMap<String, String>),
    Multiple(Vec<BTreeMap<String, String>>),
}

impl ExtraHeaders {
    /// 校验全部头部名称与值，返回展开后的列表。
    pub(crate) fn flatten(self) -> Result<Vec<(String, String)>, Exception> {
        let sets = match self {
            ExtraHeaders::Single(set) => vec![set],
            ExtraHeaders::Multiple(sets) => sets,
        };
        let mut flattened = Vec::new();
        for set in sets {
            for (name, value) in set {
                if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                    return Err(Exception::InvalidHeader(format!("非法的头部名称：{}", name)));
                }
                if http::HeaderValue::from_str(&value).is_err() {
                    return Err(Exception::InvalidHeader(format!(
                        "头部 {} 的值非法：{}",
                        name, value
                    )));
                }
                flattened.push((name, value));
            }
        }
        Ok(flattened)
    }
}

/// 响应头组装器。
///
/// 持有附加头的快照与缓存开关，可廉价克隆并在推送任务之间共享。
#[derive(Debug, Clone)]
pub struct HeaderComposer {
    additional: Arc<Vec<(String, String)>>,
    cache_enabled: bool,
}

impl HeaderComposer {
    pub fn new(additional: Arc<Vec<(String, String)>>, cache_enabled: bool) -> Self {
        Self {
            additional,
            cache_enabled,
        }
    }

    /// 组装响应头。
    ///
    /// 写入顺序：`Content-Type`、标识头、`Content-Encoding`、单次调用的头、附加头。
    /// 后写入的同名头部覆盖先写入的。
    pub fn compose(
        &self,
        content_type: &str,
        status: u16,
        encoding: Option<HttpEncoding>,
        headers: &[(&str, &str)],
    ) -> ResponseHead {
        let mut head = ResponseHead::new(status);
        head.set("Content-Type", content_type);
        head.set("Server", SERVER_NAME);
        head.set("X-Powered-By", SERVER_NAME);
        if let Some(encoding) = encoding {
            head.set("Content-Encoding", &encoding.to_string());
        }
        for (name, value) in headers {
            if self.suppressed(name) {
                continue;
            }
            head.set(name, value);
        }
        for (name, value) in self.additional.iter() {
            if self.suppressed(name) {
                continue;
            }
            head.set(name, value);
        }
        head
    }

    fn suppressed(&self, name: &str) -> bool {
        !self.cache_enabled && name.eq_ignore_ascii_case("cache-control")
    }
}

/// 每个响应只选择一种内容策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStrategy {
    /// gzip 压缩并追加字符集
    Compress,
    /// 长期缓存，内容类型保持不变
    Cache,
    /// 仅追加字符集
    Plain,
}

impl ContentStrategy {
    /// 根据扩展名所属集合选择策略，压缩优先。
    pub fn select(extension: &str, gzip_enabled: bool) -> Self {
        let extension = extension.to_ascii_lowercase();
        if gzip_enabled && COMPRESSIBLE_TYPES.contains(&extension.as_str()) {
            ContentStrategy::Compress
        } else if CACHEABLE_TYPES.contains(&extension.as_str()) {
            ContentStrategy::Cache
        } else {
            ContentStrategy::Plain
        }
    }

    pub fn encoding(&self) -> Option<HttpEncoding> {
        match self {
            ContentStrategy::Compress => Some(HttpEncoding::Gzip),
            _ => None,
        }
    }

    /// 按策略生成 200 响应头
    pub fn head(&self, composer: &HeaderComposer, content_type: &str) -> ResponseHead {
        match self {
            ContentStrategy::Compress => composer.compose(
                &[content_type, CHARSET_SUFFIX].concat(),
                200,
                Some(HttpEncoding::Gzip),
                &[],
            ),
            ContentStrategy::Cache => composer.compose(
                content_type,
                200,
                None,
                &[("Cache-Control", CACHE_CONTROL_ONE_YEAR)],
            ),
            ContentStrategy::Plain => {
                composer.compose(&[content_type, CHARSET_SUFFIX].concat(), 200, None, &[])
            }
        }
    }
}
