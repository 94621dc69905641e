// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # pushserve 启动程序
//!
//! 载入日志与 TOML 配置，按配置的工作线程数构建 Tokio 运行时，启动主监听
//! 与可选的 HTTP 重定向监听，然后运行后台管理控制台直到收到停机指令。

use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
};

use pushserve::{Config, Server};

const DEFAULT_CONFIG: &str = "config/development.toml";

fn main() {
    // 1. 初始化日志系统
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        std::process::exit(1);
    }

    // 2. 载入配置，命令行第一个参数可以指定配置文件
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::from_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("配置文件已载入：{}", config_path);

    // 3. 按配置的工作线程数构建运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads().max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建运行时：{}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(run(config));
    info!("服务器已关闭");
}

async fn run(config: Config) {
    let fallback_port = config.fallback_port();
    let port = config.port();
    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("无法创建服务器：{}", e);
            return;
        }
    };

    if let Some(fallback_port) = fallback_port {
        if let Err(e) = server.set_http_fallback(fallback_port).await {
            warn!("HTTP重定向未启动：{}", e);
        }
    }

    match server.listen(port).await {
        Ok(addr) => info!("服务端在{}上启动", addr),
        Err(e) => {
            error!("无法启动服务端：{}", e);
            return;
        }
    }

    tokio::select! {
        _ = console(&server) => {}
        _ = tokio::signal::ctrl_c() => info!("收到中断信号"),
    }
}

/// 后台管理控制台：`stop`、`status`、`help`
async fn console(server: &Server) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) => {
                // 标准输入关闭时不再接收指令，保持服务运行
                std::future::pending::<()>().await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("无法读取控制台输入：{}", e);
                continue;
            }
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器即将关闭...");
                break;
            }
            "status" => {
                let config = server.config();
                println!("== pushserve 状态 ==");
                println!("HTTP 版本：{}", config.http_version());
                println!("TLS：{}", config.uses_tls());
                println!("活动连接数：{}", server.active_connections());
                println!("推送规则数：{}", server.push_rules().len());
                println!("附加响应头数：{}", server.extra_headers().len());
                println!("====================");
            }
            "help" => {
                println!("== pushserve Help ==");
                println!("stop   - 关闭服务器");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "" => {}
            other => println!("未知指令：{}，输入 help 查看可用指令", other),
        }
    }
}
