// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 从 TOML 文件或构建器方法得到服务器的启动配置。除附加响应头、推送规则
//! 与静态根目录之外，配置在服务器构造之后不可变。

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    static_root: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    fallback_port: Option<u16>,
    #[serde(default)]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_http_version")]
    http_version: u8,
    #[serde(default = "default_true")]
    secure: bool,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    cert: Option<String>,
    #[serde(default = "default_true")]
    enable_gzip: bool,
    #[serde(default = "default_true")]
    enable_http_cache: bool,
    #[serde(default = "default_true")]
    enable_server_push: bool,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    /// 启动时写入的附加响应头
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// 启动时写入的推送规则：触发子串 -> 资源路径列表
    #[serde(default)]
    server_push: BTreeMap<String, Vec<String>>,
}

fn default_port() -> u16 {
    443
}

fn default_http_version() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    65536 // 64KB
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            static_root: None,
            port: default_port(),
            fallback_port: None,
            local: false,
            worker_threads: 0,
            http_version: default_http_version(),
            secure: true,
            key: None,
            cert: None,
            enable_gzip: true,
            enable_http_cache: true,
            enable_server_push: true,
            chunk_size: default_chunk_size(),
            headers: BTreeMap::new(),
            server_push: BTreeMap::new(),
        }
    }

    /// 读取并校验 TOML 配置文件。
    ///
    /// `worker_threads` 为 0 时按 CPU 核心数自动设置。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let str_val = fs::read_to_string(filename).map_err(|e| {
            Exception::InvalidConfig(format!("无法读取配置文件 {}: {}", filename, e))
        })?;
        let mut config: Config = toml::from_str(&str_val)
            .map_err(|e| Exception::InvalidConfig(format!("无法解析配置文件 {}: {}", filename, e)))?;
        if config.worker_threads == 0 {
            config.worker_threads = num_cpus::get();
        }
        config.validate()?;
        Ok(config)
    }

    /// 检查协议版本与 TLS 材料是否匹配。
    pub fn validate(&self) -> Result<(), Exception> {
        if self.http_version != 1 && self.http_version != 2 {
            return Err(Exception::InvalidConfig(format!(
                "http_version 只能是 1 或 2，实际为 {}",
                self.http_version
            )));
        }
        if self.http_version == 2 && !self.secure {
            warn!("HTTP/2 模式总是使用 TLS，secure = false 将被忽略");
        }
        if self.uses_tls() && (self.key.is_none() || self.cert.is_none()) {
            return Err(Exception::InvalidConfig(
                "HTTPS/HTTP2 模式需要同时提供 key 与 cert".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Exception::InvalidConfig("chunk_size 不能为 0".to_string()));
        }
        Ok(())
    }

    /// HTTP/2 模式或显式开启 secure 时使用 TLS
    pub fn uses_tls(&self) -> bool {
        self.secure || self.http_version == 2
    }
}

// --- 构建器方法 ---

impl Config {
    pub fn with_static_root(mut self, root: impl Into<String>) -> Self {
        self.static_root = Some(root.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn with_http_version(mut self, version: u8) -> Self {
        self.http_version = version;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_tls(mut self, key: impl Into<String>, cert: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.cert = Some(cert.into());
        self
    }

    pub fn with_gzip(mut self, enabled: bool) -> Self {
        self.enable_gzip = enabled;
        self
    }

    pub fn with_http_cache(mut self, enabled: bool) -> Self {
        self.enable_http_cache = enabled;
        self
    }

    pub fn with_server_push(mut self, enabled: bool) -> Self {
        self.enable_server_push = enabled;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl Config {
    pub fn static_root(&self) -> Option<PathBuf> {
        self.static_root.as_ref().map(PathBuf::from)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn fallback_port(&self) -> Option<u16> {
        self.fallback_port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn http_version(&self) -> u8 {
        self.http_version
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn cert(&self) -> Option<&str> {
        self.cert.as_deref()
    }

    pub fn enable_gzip(&self) -> bool {
        self.enable_gzip
    }

    pub fn enable_http_cache(&self) -> bool {
        self.enable_http_cache
    }

    pub fn enable_server_push(&self) -> bool {
        self.enable_server_push
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn server_push(&self) -> &BTreeMap<String, Vec<String>> {
        &self.server_push
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.http_version(), 2);
        assert!(config.secure());
        assert!(config.enable_gzip());
        assert!(config.enable_http_cache());
        assert!(config.enable_server_push());
        assert!(config.static_root().is_none());
    }

    #[test]
    fn test_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            static_root = "www"
            http_version = 1
            secure = false
            enable_http_cache = false
            worker_threads = 2

            [headers]
            "X-Frame-Options" = "DENY"

            [server_push]
            "/app/index.html" = ["/app/a.js", "/app/b.css"]
            "#
        )
        .unwrap();

        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.static_root(), Some(PathBuf::from("www")));
        assert_eq!(config.http_version(), 1);
        assert!(!config.uses_tls());
        assert!(!config.enable_http_cache());
        assert!(config.enable_gzip());
        assert_eq!(config.worker_threads(), 2);
        assert_eq!(config.headers().get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(
            config.server_push().get("/app/index.html").unwrap(),
            &vec!["/app/a.js".to_string(), "/app/b.css".to_string()]
        );
    }

    #[test]
    fn test_tls_material_required() {
        let config = Config::new();
        assert!(matches!(config.validate(), Err(Exception::InvalidConfig(_))));

        let config = Config::new().with_tls("server.key", "server.crt");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_http_version() {
        let config = Config::new().with_http_version(3).with_secure(false);
        assert!(matches!(config.validate(), Err(Exception::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_toml("/nonexistent/pushserve.toml");
        assert!(matches!(result, Err(Exception::InvalidConfig(_))));
    }
}
