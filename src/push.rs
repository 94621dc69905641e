// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务端推送模块
//!
//! 推送规则是有序的 (触发子串, 资源路径列表) 映射。一个文件被作为 HTTP/2 主响应
//! 发送时，所有触发子串出现在该文件路径中的规则都会生效，其资源依次被推送。
//!
//! 推送只有一层：[`push_asset`] 写出的推送响应不持有 [`Pusher`]，不会再触发推送。

use std::path::PathBuf;

use log::{debug, info, warn};
use tokio::fs::File;

use crate::{
    exception::Exception,
    header::ResponseHead,
    param::*,
    request::Request,
    response::{Pusher, Response},
    static_files::{stream_file, StaticContext},
    util::{collapse_slashes, extension_of},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushRules {
    rules: Vec<(String, Vec<String>)>,
}

impl PushRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并新的规则：已存在的触发子串原位替换，新的追加到末尾。
    pub fn merge(&mut self, rules: impl IntoIterator<Item = (String, Vec<String>)>) {
        for (trigger, assets) in rules {
            info!("设置服务端推送规则：{} -> {:?}", trigger, assets);
            match self.rules.iter_mut().find(|(t, _)| *t == trigger) {
                Some(rule) => rule.1 = assets,
                None => self.rules.push((trigger, assets)),
            }
        }
    }

    /// 折叠连续的 `/` 后，返回所有匹配规则的资源，按规则顺序拼接
    pub fn assets_for(&self, served_path: &str) -> Vec<String> {
        let normalized = collapse_slashes(served_path);
        self.rules
            .iter()
            .filter(|(trigger, _)| normalized.contains(trigger.as_str()))
            .flat_map(|(_, assets)| assets.iter().cloned())
            .collect()
    }

    pub fn get(&self, trigger: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|(t, _)| t == trigger)
            .map(|(_, assets)| assets.as_slice())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 推送 `served_path` 对应的全部资源，返回成功发出的 PUSH_PROMISE 数量。
///
/// 单个资源失败只记录日志并跳过，不影响主响应。
pub async fn cascade(
    ctx: &StaticContext,
    pusher: &mut Pusher<'_>,
    request: &Request,
    served_path: &str,
    rules: &PushRules,
) -> usize {
    let id = request.id();
    let mut pushed = 0;
    for asset in rules.assets_for(served_path) {
        match promise(ctx, pusher, request, &asset).await {
            Ok(()) => {
                info!("[ID{}]服务端推送：{}", id, asset);
                pushed += 1;
            }
            Err(e) => warn!("[ID{}]推送资源{}失败：{}", id, asset, e),
        }
    }
    pushed
}

/// 打开资源文件、发出 PUSH_PROMISE，并在独立任务中写出推送的内容
async fn promise(
    ctx: &StaticContext,
    pusher: &mut Pusher<'_>,
    request: &Request,
    asset: &str,
) -> Result<(), Exception> {
    let path = asset_path(ctx, asset)?;
    let file = File::open(&path)
        .await
        .map_err(|e| Exception::PushFailure(format!("{}：{}", path.display(), e)))?;

    let content_type = [ctx.content_type(extension_of(asset)).as_str(), CHARSET_SUFFIX].concat();
    let head = ctx
        .composer
        .compose(&content_type, 200, Some(HttpEncoding::Gzip), &[]);

    let response = pusher.push(push_uri(request, asset)?)?;
    tokio::spawn(push_asset(response, file, head, ctx.chunk_size));
    Ok(())
}

/// 写出一个推送响应。推送响应总是 gzip 压缩。
pub async fn push_asset(mut response: Response<'static>, file: File, head: ResponseHead, chunk_size: usize) {
    let id = response.id();
    let result = async {
        response.write_head(&head).await?;
        let total = stream_file(&mut response, file, Some(HttpEncoding::Gzip), chunk_size).await?;
        response.finish().await?;
        Ok::<u64, Exception>(total)
    }
    .await;
    match result {
        Ok(total) => debug!("[ID{}]推送资源写出完成，共 {} 字节", id, total),
        Err(e) => {
            warn!("[ID{}]推送资源写出失败：{}", id, e);
            response.abort();
        }
    }
}

fn asset_path(ctx: &StaticContext, asset: &str) -> Result<PathBuf, Exception> {
    if asset.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(Exception::PushFailure(format!("非法的推送路径：{}", asset)));
    }
    Ok(ctx.root.join(asset.trim_start_matches('/')))
}

/// 推送请求的 URI 沿用主请求的 scheme 与 authority
fn push_uri(request: &Request, asset: &str) -> Result<http::Uri, Exception> {
    let path = if asset.starts_with('/') {
        asset.to_string()
    } else {
        ["/", asset].concat()
    };
    let uri = format!(
        "{}://{}{}",
        request.scheme().unwrap_or("https"),
        request.host().unwrap_or("localhost"),
        path
    );
    uri.parse()
        .map_err(|e: http::uri::InvalidUri| Exception::PushFailure(format!("{}：{}", uri, e)))
}
