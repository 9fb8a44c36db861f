// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/main.rs - 分拣识别服务主程序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use huishou::{
  backend::BackendSelector, config::ServiceArgs, gateway::ClassificationGateway, server,
};

/// 回收分拣识别服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "HUISHOU_LISTEN", default_value = "0.0.0.0:8080", value_name = "ADDR")]
  pub listen: SocketAddr,

  /// 上传图片大小上限（MB）
  #[arg(long, env = "HUISHOU_MAX_UPLOAD_MB", default_value = "16", value_name = "MB")]
  pub max_upload_mb: usize,

  #[command(flatten)]
  pub service: ServiceArgs,
}

/// 超大的配置值截断为 `usize::MAX`
fn upload_limit_bytes(max_upload_mb: usize) -> usize {
  max_upload_mb.saturating_mul(1024 * 1024)
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("监听地址: {}", args.listen);
  info!("类别表: {}", args.service.class_map.display());

  let config = args.service.into_config();
  let gateway = Arc::new(
    ClassificationGateway::from_config(config, BackendSelector::default())
      .await
      .context("服务初始化失败")?,
  );

  let (stop_tx, mut stop_rx) = watch::channel(false);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = stop_tx.send(true);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法注册中断信号处理")?;

  let app = server::router(gateway.clone(), upload_limit_bytes(args.max_upload_mb));
  let listener = tokio::net::TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("无法监听 {}", args.listen))?;
  info!("服务已启动: http://{}", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      let _ = stop_rx.wait_for(|stop| *stop).await;
    })
    .await
    .context("服务异常退出")?;

  gateway.shutdown().await;
  info!("服务已退出");
  Ok(())
}
