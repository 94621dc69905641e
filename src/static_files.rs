// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 静态文件响应模块
//!
//! 单个请求的处理流程：
//! 1. `静态根目录 + URL 路径`（百分号解码）得到文件系统路径并查询元数据；
//! 2. 不存在：404；
//! 3. 目录：路径不以 `/` 结尾则 301 到 `路径/`，否则尝试目录下的 `index.html`；
//! 4. 普通文件：按扩展名选择内容策略并流式写出，HTTP/2 下随后触发推送级联。
//!
//! 写出响应头之前的任何文件系统错误都视为资源不存在。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use log::{debug, error, info, warn};
use percent_encoding::percent_decode_str;
use tokio::{fs, fs::File, io::AsyncReadExt};

use crate::{
    exception::Exception,
    header::{ContentStrategy, HeaderComposer},
    param::*,
    push::{self, PushRules},
    request::Request,
    response::Response,
    util::{extension_of, HtmlBuilder},
};

/// 注入的 MIME 查找函数：扩展名 -> 内容类型
pub type MimeLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// 单次请求使用的静态文件上下文，由服务器在分发时生成快照。
#[derive(Clone)]
pub struct StaticContext {
    pub root: PathBuf,
    pub composer: HeaderComposer,
    pub mime: MimeLookup,
    pub gzip_enabled: bool,
    /// 关闭服务端推送时为 `None`
    pub push_rules: Option<Arc<PushRules>>,
    pub chunk_size: usize,
}

impl StaticContext {
    /// 查找内容类型，失败时回退到 `text/plain`
    pub fn content_type(&self, extension: &str) -> String {
        (self.mime)(extension).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    NotFound,
    /// 目录请求缺少结尾的 `/`
    Redirect(String),
    File { path: PathBuf, content_type: String },
}

/// 将 URL 路径解析为要执行的动作。
pub async fn resolve(ctx: &StaticContext, url_path: &str) -> Resolution {
    let decoded = match percent_decode_str(url_path).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => return Resolution::NotFound,
    };
    if decoded.split(['/', '\\']).any(|segment| segment == "..") {
        return Resolution::NotFound;
    }

    let file_path = ctx.root.join(decoded.trim_start_matches('/'));
    let metadata = match fs::metadata(&file_path).await {
        Ok(metadata) => metadata,
        Err(_) => return Resolution::NotFound,
    };

    if metadata.is_dir() {
        if !url_path.ends_with('/') {
            return Resolution::Redirect([url_path, "/"].concat());
        }
        let index = file_path.join(INDEX_FILE);
        return match fs::metadata(&index).await {
            Ok(meta) if meta.is_file() => Resolution::File {
                path: index,
                content_type: "text/html".to_string(),
            },
            _ => Resolution::NotFound,
        };
    }

    if metadata.is_file() {
        return Resolution::File {
            content_type: ctx.content_type(extension_of(&decoded)),
            path: file_path,
        };
    }
    Resolution::NotFound
}

/// 处理一次静态文件请求
pub async fn serve(
    ctx: &StaticContext,
    request: &Request,
    response: &mut Response<'_>,
) -> Result<(), Exception> {
    let id = request.id();
    match resolve(ctx, request.pathname()).await {
        Resolution::NotFound => {
            info!("[ID{}]请求的路径：{} 不存在，返回404", id, request.pathname());
            not_found(&ctx.composer, response).await
        }
        Resolution::Redirect(location) => {
            debug!("[ID{}]目录请求缺少结尾的'/'，重定向到{}", id, location);
            redirect(&ctx.composer, response, &location).await
        }
        Resolution::File { path, content_type } => {
            send_file(ctx, request, response, &path, &content_type).await
        }
    }
}

async fn send_file(
    ctx: &StaticContext,
    request: &Request,
    response: &mut Response<'_>,
    path: &Path,
    content_type: &str,
) -> Result<(), Exception> {
    let id = request.id();
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("[ID{}]无法打开文件{}：{}，返回404", id, path.display(), e);
            return not_found(&ctx.composer, response).await;
        }
    };

    let path_str = path.to_string_lossy();
    let strategy = ContentStrategy::select(extension_of(&path_str), ctx.gzip_enabled);
    debug!("[ID{}]文件：{}，内容策略：{:?}", id, path_str, strategy);
    if !response.write_head(&strategy.head(&ctx.composer, content_type)).await? {
        return Ok(());
    }

    if let Some(rules) = &ctx.push_rules {
        if let Some(mut pusher) = response.pusher() {
            push::cascade(ctx, &mut pusher, request, &path_str, rules).await;
        }
    }

    if response.is_finished() {
        return Ok(());
    }
    match stream_file(response, file, strategy.encoding(), ctx.chunk_size).await {
        Ok(total) => {
            debug!("[ID{}]文件传输完成，共读取 {} 字节", id, total);
            response.finish().await
        }
        Err(e) => {
            error!("[ID{}]传输文件{}失败：{}", id, path_str, e);
            response.abort();
            Err(e)
        }
    }
}

/// 按块读取文件并写出，可选地在流中进行 gzip 压缩。
///
/// 每块写出完成后才读取下一块，内存占用与文件大小无关。返回读取的原始字节数。
pub async fn stream_file(
    response: &mut Response<'_>,
    mut file: File,
    encoding: Option<HttpEncoding>,
    chunk_size: usize,
) -> Result<u64, Exception> {
    let mut buffer = vec![0u8; chunk_size];
    let mut encoder = encoding.map(|_| GzEncoder::new(Vec::new(), Compression::default()));
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        match encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(&buffer[..n])?;
                let compressed = std::mem::take(encoder.get_mut());
                response.write(Bytes::from(compressed)).await?;
            }
            None => response.write(Bytes::copy_from_slice(&buffer[..n])).await?,
        }
    }
    if let Some(encoder) = encoder {
        response.write(Bytes::from(encoder.finish()?)).await?;
    }
    Ok(total)
}

/// 404 响应，附带一个简短的 HTML 页面
pub async fn not_found(composer: &HeaderComposer, response: &mut Response<'_>) -> Result<(), Exception> {
    let head = composer.compose("text/html", 404, None, &[]);
    let page = HtmlBuilder::from_status_code(404, None).build();
    response.send(head, Bytes::from(page)).await
}

async fn redirect(
    composer: &HeaderComposer,
    response: &mut Response<'_>,
    location: &str,
) -> Result<(), Exception> {
    let head = composer.compose("text/html", 301, None, &[("Location", location)]);
    response.send(head, Bytes::new()).await
}
