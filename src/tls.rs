// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! TLS 配置：从 PEM 文件载入证书链与私钥，并按协议版本设置 ALPN。

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use log::error;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::{config::Config, exception::Exception};

pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// 创建 TLS 服务端配置
pub fn create_server_config(
    key_path: &Path,
    cert_path: &Path,
    alpn: Vec<Vec<u8>>,
) -> Result<ServerConfig, Exception> {
    let cert_file = File::open(cert_path).map_err(|err| {
        error!("无法打开TLS证书文件'{}'：{}", cert_path.display(), err);
        Exception::Tls(format!("{}：{}", cert_path.display(), err))
    })?;
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            error!("无法读取TLS证书文件'{}'：{}", cert_path.display(), err);
            Exception::Tls(format!("{}：{}", cert_path.display(), err))
        })?;
    if certs.is_empty() {
        error!("TLS证书文件'{}'中没有可用的证书", cert_path.display());
        return Err(Exception::Tls(format!("{}：没有证书", cert_path.display())));
    }

    let key_file = File::open(key_path).map_err(|err| {
        error!("无法打开TLS私钥文件'{}'：{}", key_path.display(), err);
        Exception::Tls(format!("{}：{}", key_path.display(), err))
    })?;
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(key_file))
        .map_err(|err| {
            error!("无法读取TLS私钥文件'{}'：{}", key_path.display(), err);
            Exception::Tls(format!("{}：{}", key_path.display(), err))
        })?
        .ok_or_else(|| {
            error!("TLS私钥文件'{}'中没有可用的私钥", key_path.display());
            Exception::Tls(format!("{}：没有私钥", key_path.display()))
        })?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|err| Exception::Tls(err.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| {
                error!("无法创建TLS服务端配置：{}", err);
                Exception::Tls(err.to_string())
            })?;
    config.alpn_protocols = alpn;
    Ok(config)
}

/// HTTP/2 模式同时协商 `h2` 与 `http/1.1`，HTTP/1 模式只协商 `http/1.1`
pub fn alpn_protocols(http_version: u8) -> Vec<Vec<u8>> {
    match http_version {
        2 => vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()],
        _ => vec![ALPN_HTTP11.to_vec()],
    }
}

/// 根据配置创建 TLS 接收器，不使用 TLS 时返回 `None`
pub fn acceptor(config: &Config) -> Result<Option<TlsAcceptor>, Exception> {
    if !config.uses_tls() {
        return Ok(None);
    }
    let (key, cert) = match (config.key(), config.cert()) {
        (Some(key), Some(cert)) => (key, cert),
        _ => return Err(Exception::InvalidConfig("启用TLS时必须提供key与cert".to_string())),
    };
    let server_config = create_server_config(
        Path::new(key),
        Path::new(cert),
        alpn_protocols(config.http_version()),
    )?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}
