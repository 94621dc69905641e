// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # pushserve
//!
//! 支持 HTTP/1.1、HTTPS 与 HTTP/2 的静态资源服务器：
//! - 可插拔的 API 路由（路径子串匹配）；
//! - 按扩展名选择压缩、长缓存或普通策略的静态文件响应；
//! - 按规则触发、只有一层的 HTTP/2 服务端推送；
//! - 明文端口到 HTTPS 的 301 重定向。

pub mod config;
pub mod connection;
pub mod exception;
pub mod fallback;
pub mod header;
pub mod param;
pub mod push;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;
pub mod tls;
pub mod util;

pub use config::Config;
pub use exception::Exception;
pub use header::{ContentStrategy, ExtraHeaders, HeaderComposer, ResponseHead};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use push::PushRules;
pub use registry::{ApiHandler, ApiRegistry};
pub use request::{Body, Request};
pub use response::{Pusher, Response};
pub use server::{LogSink, Server};
pub use util::HtmlBuilder;
