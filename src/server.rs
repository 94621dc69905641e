// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器与请求分发
//!
//! `Server` 持有启动配置以及运行期可修改的状态（API 路由、推送规则、附加
//! 响应头、日志输出函数、静态根目录）。可变状态放在 `RwLock` 中，读取时只
//! 复制一份快照，锁不会跨越 `.await`。
//!
//! 分发规则：路径命中 API 路由时调用全部命中的处理器，否则交给静态文件模块。

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::{
    config::Config,
    exception::Exception,
    fallback::FallbackRedirector,
    header::{ExtraHeaders, HeaderComposer},
    param::*,
    push::PushRules,
    registry::{ApiHandler, ApiRegistry},
    request::{Body, Request},
    response::Response,
    static_files::{self, MimeLookup, StaticContext},
    tls,
};

/// 访问日志输出函数，每个请求调用一次
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// 默认的访问日志输出：写入 `pushserve::access` 日志目标
pub fn default_log_sink() -> LogSink {
    Arc::new(|line: &str| info!(target: "pushserve::access", "{}", line))
}

#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    mime: MimeLookup,
    static_root: RwLock<Option<PathBuf>>,
    routes: RwLock<ApiRegistry>,
    push_rules: RwLock<Arc<PushRules>>,
    extra_headers: RwLock<Arc<Vec<(String, String)>>>,
    log_sink: RwLock<LogSink>,
    next_id: AtomicU64,
    active_connections: AtomicUsize,
}

impl Server {
    /// 使用内置 MIME 表创建服务器
    pub fn new(config: Config) -> Result<Self, Exception> {
        Self::with_mime_lookup(config, Arc::new(default_mime_lookup))
    }

    /// 使用注入的 MIME 查找函数创建服务器。
    ///
    /// 配置文件中的 `headers` 与 `server_push` 在此时写入。
    pub fn with_mime_lookup(config: Config, mime: MimeLookup) -> Result<Self, Exception> {
        config.validate()?;
        let server = Self {
            shared: Arc::new(Shared {
                static_root: RwLock::new(config.static_root()),
                mime,
                routes: RwLock::new(ApiRegistry::new()),
                push_rules: RwLock::new(Arc::new(PushRules::new())),
                extra_headers: RwLock::new(Arc::new(Vec::new())),
                log_sink: RwLock::new(default_log_sink()),
                next_id: AtomicU64::new(0),
                active_connections: AtomicUsize::new(0),
                config,
            }),
        };
        let config = &server.shared.config;
        if !config.headers().is_empty() {
            server.set_extra_headers(ExtraHeaders::Single(config.headers().clone()))?;
        }
        if !config.server_push().is_empty() {
            server.set_server_push(config.server_push().clone());
        }
        Ok(server)
    }

    /// 注册一个 API 路由，路径作为子串匹配
    pub fn add_api(&self, path: impl Into<String>, method: HttpRequestMethod, handler: impl ApiHandler + 'static) {
        let path = path.into();
        info!("注册API：{} {}", method, path);
        write(&self.shared.routes).register(path, method, Arc::new(handler));
    }

    /// 合并推送规则
    pub fn set_server_push(&self, rules: impl IntoIterator<Item = (String, Vec<String>)>) {
        let mut guard = write(&self.shared.push_rules);
        let mut merged = PushRules::clone(&guard);
        merged.merge(rules);
        *guard = Arc::new(merged);
    }

    /// 追加实例级附加响应头，同名头部被替换。
    ///
    /// 任一头部非法时整体拒绝，已有的附加头保持不变。
    pub fn set_extra_headers(&self, headers: ExtraHeaders) -> Result<(), Exception> {
        let incoming = headers.flatten()?;
        let mut guard = write(&self.shared.extra_headers);
        let mut merged = Vec::clone(&guard);
        for (name, value) in incoming {
            info!("设置附加响应头：{}: {}", name, value);
            match merged.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
                Some(entry) => entry.1 = value,
                None => merged.push((name, value)),
            }
        }
        *guard = Arc::new(merged);
        Ok(())
    }

    /// 替换访问日志输出函数
    pub fn set_log_sink(&self, sink: impl Fn(&str) + Send + Sync + 'static) {
        *write(&self.shared.log_sink) = Arc::new(sink);
    }

    /// 设置静态根目录
    pub fn set_static(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        info!("静态根目录：{}", root.display());
        *write(&self.shared.static_root) = Some(root);
    }

    /// 开始在 `port` 上监听，返回实际绑定的地址。
    ///
    /// 端口被占用时返回 [`Exception::ListenConflict`]。
    pub async fn listen(&self, port: u16) -> Result<SocketAddr, Exception> {
        let acceptor = tls::acceptor(&self.shared.config)?;
        let listener = bind(self.bind_addr(port)).await?;
        let addr = listener.local_addr()?;
        info!(
            "服务端开始监听 {}（HTTP/{}{}）",
            addr,
            self.shared.config.http_version(),
            if acceptor.is_some() { "，TLS" } else { "" }
        );

        let server = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let server = server.clone();
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer, acceptor).await;
                        });
                    }
                    Err(e) => warn!("接受连接失败：{}", e),
                }
            }
        });
        Ok(addr)
    }

    /// 启动明文 HTTP 重定向监听，只能在 HTTPS/HTTP2 模式下使用
    pub async fn set_http_fallback(&self, port: u16) -> Result<SocketAddr, Exception> {
        if !self.shared.config.uses_tls() {
            error!("只有HTTPS/HTTP2模式才能设置HTTP重定向");
            return Err(Exception::FallbackRequiresHttps);
        }
        let redirector = FallbackRedirector::bind(self.bind_addr(port)).await?;
        let addr = redirector.local_addr()?;
        info!("HTTP重定向监听 {}", addr);
        let server = self.clone();
        tokio::spawn(redirector.run(Arc::new(move |line: &str| server.log(line))));
        Ok(addr)
    }

    /// 分发一个请求：先匹配 API 路由，否则按静态文件处理。
    ///
    /// 返回时若响应头仍未写出，说明没有任何组件处理该请求。
    pub async fn dispatch(
        &self,
        request: &Request,
        body: Body,
        response: &mut Response<'_>,
    ) -> Result<(), Exception> {
        let id = request.id();
        self.log(&request.access_line());

        let routes = read(&self.shared.routes).matching(request.pathname());
        if routes.is_empty() {
            return match self.static_context() {
                Some(ctx) => static_files::serve(&ctx, request, response).await,
                None => {
                    warn!("[ID{}]{} 没有匹配的API且未设置静态目录", id, request.pathname());
                    Ok(())
                }
            };
        }

        let mut body = Some(body);
        let mut buffered: Option<Bytes> = None;
        for route in routes {
            let payload = if route.buffers_body() {
                if buffered.is_none() {
                    let collected = match body.take() {
                        Some(body) => body.collect().await?,
                        None => Bytes::new(),
                    };
                    buffered = Some(collected);
                }
                buffered.clone()
            } else {
                None
            };
            if let Err(e) = route.handler().handle(request, response, payload).await {
                error!("[ID{}]API {} 处理失败：{}", id, route.path(), e);
            }
        }
        Ok(())
    }

    /// 静态文件处理所需状态的快照，未设置静态根目录时为 `None`
    pub fn static_context(&self) -> Option<StaticContext> {
        let root = read(&self.shared.static_root).clone()?;
        let config = &self.shared.config;
        let push_rules = if config.enable_server_push() {
            Some(Arc::clone(&read(&self.shared.push_rules)))
        } else {
            None
        };
        Some(StaticContext {
            root,
            composer: self.composer(),
            mime: Arc::clone(&self.shared.mime),
            gzip_enabled: config.enable_gzip(),
            push_rules,
            chunk_size: config.chunk_size(),
        })
    }

    pub fn composer(&self) -> HeaderComposer {
        HeaderComposer::new(
            Arc::clone(&read(&self.shared.extra_headers)),
            self.shared.config.enable_http_cache(),
        )
    }

    /// 调用当前的访问日志输出函数
    pub fn log(&self, line: &str) {
        let sink = Arc::clone(&read(&self.shared.log_sink));
        sink(line);
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn push_rules(&self) -> Arc<PushRules> {
        Arc::clone(&read(&self.shared.push_rules))
    }

    pub fn extra_headers(&self) -> Arc<Vec<(String, String)>> {
        Arc::clone(&read(&self.shared.extra_headers))
    }

    pub fn active_connections(&self) -> usize {
        self.shared.active_connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        self.shared.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.shared.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn next_id(&self) -> u128 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed) as u128
    }

    fn bind_addr(&self, port: u16) -> SocketAddr {
        let ip = if self.shared.config.local() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        SocketAddr::new(ip, port)
    }
}

/// 绑定 TCP 监听，端口被占用时报告冲突
pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener, Exception> {
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            error!("端口{}已被占用，无法监听", addr.port());
            Exception::ListenConflict(addr.port())
        } else {
            error!("无法监听{}：{}", addr, e);
            Exception::Io(e)
        }
    })
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("读写锁被污染，继续使用其中的数据");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("读写锁被污染，继续使用其中的数据");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn plain_config() -> Config {
        Config::new().with_http_version(1).with_secure(false).with_local(true)
    }

    #[test]
    fn test_set_extra_headers_merges() {
        let server = Server::new(plain_config()).unwrap();
        let mut first = BTreeMap::new();
        first.insert("X-A".to_string(), "1".to_string());
        first.insert("X-B".to_string(), "1".to_string());
        server.set_extra_headers(ExtraHeaders::Single(first)).unwrap();

        let mut second = BTreeMap::new();
        second.insert("x-a".to_string(), "2".to_string());
        server
            .set_extra_headers(ExtraHeaders::Multiple(vec![second]))
            .unwrap();

        let headers = server.extra_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].1, "2");
    }

    #[test]
    fn test_invalid_extra_headers_leave_state_untouched() {
        let server = Server::new(plain_config()).unwrap();
        let mut bad = BTreeMap::new();
        bad.insert("X-Ok".to_string(), "1".to_string());
        bad.insert("Bad Name".to_string(), "1".to_string());
        assert!(server.set_extra_headers(ExtraHeaders::Single(bad)).is_err());
        assert!(server.extra_headers().is_empty());
    }

    #[test]
    fn test_log_sink_replacement() {
        let server = Server::new(plain_config()).unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        server.set_log_sink(move |line| captured.lock().unwrap().push(line.to_string()));
        server.log("hello");
        assert_eq!(*lines.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_static_context_requires_root() {
        let server = Server::new(plain_config()).unwrap();
        assert!(server.static_context().is_none());
        server.set_static("/srv/www");
        let ctx = server.static_context().unwrap();
        assert_eq!(ctx.root, PathBuf::from("/srv/www"));
        assert!(ctx.push_rules.is_some());
    }

    #[test]
    fn test_push_disabled_has_no_rules_in_context() {
        let server = Server::new(plain_config().with_server_push(false).with_static_root("/srv")).unwrap();
        server.set_server_push(vec![("/a".to_string(), vec!["/b".to_string()])]);
        assert!(server.static_context().unwrap().push_rules.is_none());
        assert_eq!(server.push_rules().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_requires_tls() {
        let server = Server::new(plain_config()).unwrap();
        assert!(matches!(
            server.set_http_fallback(0).await,
            Err(Exception::FallbackRequiresHttps)
        ));
    }

    #[tokio::test]
    async fn test_listen_conflict() {
        let server = Server::new(plain_config()).unwrap();
        let addr = server.listen(0).await.unwrap();
        match server.listen(addr.port()).await {
            Err(Exception::ListenConflict(port)) => assert_eq!(port, addr.port()),
            other => panic!("unexpected {:?}", other.map(|a| a.to_string())),
        }
    }
}
