// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # API 注册表
//!
//! 有序的 (路径子串, 方法, 处理器) 列表。分发时扫描全部路由，路径包含
//! 子串的路由都会被调用；路由的方法只决定是否先缓冲请求体。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{exception::Exception, param::HttpRequestMethod, request::Request, response::Response};

/// 可插拔的 API 处理器。
///
/// 方法为 POST 的路由收到完整的请求体（`Some`），其余路由收到 `None`。
#[async_trait]
pub trait ApiHandler: Send + Sync {
    async fn handle(
        &self,
        request: &Request,
        response: &mut Response<'_>,
        body: Option<Bytes>,
    ) -> Result<(), Exception>;
}

#[derive(Clone)]
pub struct ApiRoute {
    path: String,
    method: HttpRequestMethod,
    handler: Arc<dyn ApiHandler>,
}

impl ApiRoute {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// POST 路由在调用前需要缓冲完整的请求体
    pub fn buffers_body(&self) -> bool {
        self.method == HttpRequestMethod::Post
    }

    pub fn handler(&self) -> &Arc<dyn ApiHandler> {
        &self.handler
    }
}

#[derive(Clone, Default)]
pub struct ApiRegistry {
    routes: Vec<ApiRoute>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: impl Into<String>,
        method: HttpRequestMethod,
        handler: Arc<dyn ApiHandler>,
    ) {
        self.routes.push(ApiRoute {
            path: path.into(),
            method,
            handler,
        });
    }

    /// 按注册顺序返回路径包含子串的全部路由
    pub fn matching(&self, path: &str) -> Vec<ApiRoute> {
        self.routes
            .iter()
            .filter(|route| path.contains(route.path.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
