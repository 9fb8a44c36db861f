// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/bin/classify_once.rs - 单张图片分类工具
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use url::Url;

use huishou::{
  backend::BackendSelector, config::ServiceArgs, gateway::ClassificationGateway, url_file_path,
};
use tracing::info;

/// 对单张图片执行一次分类并输出 JSON
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片，例如 image:///tmp/bottle.jpg
  #[arg(long, value_name = "SOURCE")]
  pub image: Url,

  /// 记录扫描时使用的用户标识
  #[arg(long, value_name = "USER")]
  pub user_id: Option<String>,

  #[command(flatten)]
  pub service: ServiceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入图片: {}", args.image);

  if !matches!(args.image.scheme(), "image" | "file") {
    bail!("不支持的输入: {}", args.image);
  }
  let path = url_file_path(&args.image);
  let bytes = tokio::fs::read(&path)
    .await
    .with_context(|| format!("无法读取图片 {}", path.display()))?;

  let gateway = ClassificationGateway::from_config(args.service.into_config(), BackendSelector::default())
    .await
    .context("服务初始化失败")?;

  let outcome = gateway.classify(&bytes, args.user_id.as_deref()).await;
  gateway.shutdown().await;

  let result = outcome.context("分类失败")?;
  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(())
}
