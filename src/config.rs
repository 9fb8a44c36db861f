// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/config.rs - 服务配置
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

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use url::Url;

use crate::labels::ConfigError;

/// 远端推理的默认超时
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// 类别表加载失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ClassMapFallback {
  /// 直接报错，服务不启动
  #[default]
  Abort,
  /// 使用内置的默认类别
  Builtin,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
  pub endpoint: Url,
  pub token: Option<String>,
  pub timeout: Duration,
}

impl RemoteConfig {
  pub fn new(endpoint: Url) -> Self {
    Self {
      endpoint,
      token: None,
      timeout: REMOTE_TIMEOUT,
    }
  }
}

/// 启动时一次性解析出的配置，之后注入到各组件
#[derive(Debug, Clone)]
pub struct ServiceConfig {
  pub service_name: String,
  pub class_map: PathBuf,
  pub class_map_fallback: ClassMapFallback,
  pub model_meta: PathBuf,
  pub model: Option<Url>,
  pub remote: Option<RemoteConfig>,
  pub allow_dummy: bool,
  pub confidence: f32,
  pub annotate: bool,
  pub record: Option<Url>,
  pub record_queue: usize,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      service_name: "Waste Sort API".to_string(),
      class_map: PathBuf::from("shared/class_map.json"),
      class_map_fallback: ClassMapFallback::Abort,
      model_meta: PathBuf::from("shared/model_meta.json"),
      model: None,
      remote: None,
      allow_dummy: false,
      confidence: 0.25,
      annotate: false,
      record: None,
      record_queue: 256,
    }
  }
}

impl ServiceConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence) {
      return Err(ConfigError::Invalid(format!(
        "置信度阈值必须在 0 到 1 之间: {}",
        self.confidence
      )));
    }
    if self.record_queue == 0 {
      return Err(ConfigError::Invalid("记录队列长度不能为 0".to_string()));
    }
    if let Some(remote) = &self.remote {
      if !matches!(remote.endpoint.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
          "远端地址必须是 http(s): {}",
          remote.endpoint
        )));
      }
      if remote.timeout.is_zero() {
        return Err(ConfigError::Invalid("远端超时不能为 0".to_string()));
      }
    }
    Ok(())
  }
}

/// 两个可执行文件共用的后端参数
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
  /// 类别表 class_map.json 路径
  #[arg(long, env = "HUISHOU_CLASS_MAP", default_value = "shared/class_map.json")]
  pub class_map: PathBuf,

  /// 类别表加载失败时的处理方式
  #[arg(long, env = "HUISHOU_CLASS_MAP_FALLBACK", value_enum, default_value_t = ClassMapFallback::Abort)]
  pub class_map_fallback: ClassMapFallback,

  /// 模型元数据 model_meta.json 路径
  #[arg(long, env = "HUISHOU_MODEL_META", default_value = "shared/model_meta.json")]
  pub model_meta: PathBuf,

  /// 本地模型，例如 yolo26:///weights/best.rknn
  #[arg(long, env = "HUISHOU_MODEL", value_name = "MODEL")]
  pub model: Option<Url>,

  /// 远端推理服务地址，设置后优先使用
  #[arg(long, env = "HUISHOU_REMOTE_ENDPOINT", value_name = "URL")]
  pub remote: Option<Url>,

  /// 远端推理服务凭据
  #[arg(long, env = "HUISHOU_REMOTE_TOKEN", hide_env_values = true)]
  pub remote_token: Option<String>,

  /// 远端推理超时（秒）
  #[arg(long, env = "HUISHOU_REMOTE_TIMEOUT_SECS", default_value = "30")]
  pub remote_timeout_secs: u64,

  /// 没有可用模型时允许退回随机结果
  #[arg(long, env = "HUISHOU_ALLOW_DUMMY")]
  pub allow_dummy: bool,

  /// 检测置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "HUISHOU_CONFIDENCE", default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 在响应中附带标注后的图像
  #[arg(long, env = "HUISHOU_ANNOTATE")]
  pub annotate: bool,

  /// 扫描记录存储，例如 folder:///var/lib/huishou/scans
  #[arg(long, env = "HUISHOU_RECORD", value_name = "STORE")]
  pub record: Option<Url>,

  /// 扫描记录队列长度
  #[arg(long, env = "HUISHOU_RECORD_QUEUE", default_value = "256")]
  pub record_queue: usize,
}

impl ServiceArgs {
  pub fn into_config(self) -> ServiceConfig {
    let remote = self.remote.map(|endpoint| RemoteConfig {
      endpoint,
      token: self.remote_token,
      timeout: Duration::from_secs(self.remote_timeout_secs),
    });

    ServiceConfig {
      class_map: self.class_map,
      class_map_fallback: self.class_map_fallback,
      model_meta: self.model_meta,
      model: self.model,
      remote,
      allow_dummy: self.allow_dummy,
      confidence: self.confidence,
      annotate: self.annotate,
      record: self.record,
      record_queue: self.record_queue,
      ..ServiceConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
  }

  #[test]
  fn cli_defaults_are_safe() {
    let config = Cli::try_parse_from(["huishou"]).unwrap().service.into_config();
    assert!(!config.allow_dummy);
    assert_eq!(config.class_map_fallback, ClassMapFallback::Abort);
    assert!(config.remote.is_none());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn remote_args_build_remote_config() {
    let config = Cli::try_parse_from([
      "huishou",
      "--remote",
      "https://classifier.example.com/predict",
      "--remote-timeout-secs",
      "5",
      "--class-map-fallback",
      "builtin",
    ])
    .unwrap()
    .service
    .into_config();

    let remote = config.remote.unwrap();
    assert_eq!(remote.timeout, Duration::from_secs(5));
    assert_eq!(remote.endpoint.host_str(), Some("classifier.example.com"));
    assert_eq!(config.class_map_fallback, ClassMapFallback::Builtin);
  }

  #[test]
  fn validate_rejects_bad_values() {
    let config = ServiceConfig {
      confidence: 1.5,
      ..ServiceConfig::default()
    };
    assert!(config.validate().is_err());

    let config = ServiceConfig {
      remote: Some(RemoteConfig::new(Url::parse("ftp://example.com/x").unwrap())),
      ..ServiceConfig::default()
    };
    assert!(config.validate().is_err());
  }
}
