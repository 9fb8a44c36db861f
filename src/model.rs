// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model.rs - 检测模型接口
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
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[cfg(feature = "engine_rknpu")]
use crate::{FromUrl, FromUrlWithScheme};

/// 检测器输出的单个检测框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub class_id: u32,
  pub confidence: f32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bbox: Option<[f32; 4]>, // 归一化坐标 [x_min, y_min, x_max, y_max]
}

impl Detection {
  pub fn new(class_id: u32, confidence: f32) -> Self {
    Self {
      class_id,
      confidence,
      bbox: None,
    }
  }

  pub fn with_bbox(mut self, bbox: [f32; 4]) -> Self {
    self.bbox = Some(bbox);
    self
  }
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
  /// 后端已经绘制好的标注图（base64），目前只有远端服务会带回
  pub annotated_image: Option<String>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
      annotated_image: None,
    }
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型文件不存在: {0}")]
  ModelMissing(PathBuf),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("图像解码失败: {0}")]
  Decode(String),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("不支持的模型方案: {0}")]
  UnsupportedScheme(String),
}

/// 本地检测器：图像字节 -> 检测框，阻塞调用
pub trait Detector: Send + Sync {
  fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, EngineError>;

  /// 是否允许并发调用，不可重入的检测器由调用方串行化
  fn reentrant(&self) -> bool {
    false
  }

  fn engine(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
  pub confidence: f32,
  pub class_count: usize,
}

impl Default for EngineOptions {
  fn default() -> Self {
    Self {
      confidence: 0.25,
      class_count: 0,
    }
  }
}

/// 根据模型 URL 加载检测器
pub trait DetectorLoader: Send + Sync {
  fn load(&self, url: &Url, options: &EngineOptions) -> Result<Arc<dyn Detector>, EngineError>;
}

/// 按 URL 方案分派到编译进来的推理引擎
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineLoader;

impl DetectorLoader for EngineLoader {
  #[cfg_attr(not(feature = "engine_rknpu"), allow(unused_variables))]
  fn load(&self, url: &Url, options: &EngineOptions) -> Result<Arc<dyn Detector>, EngineError> {
    match url.scheme() {
      #[cfg(feature = "engine_rknpu")]
      Yolo26Builder::SCHEME => {
        let detector = Yolo26Builder::from_url(url)?
          .confidence(options.confidence)
          .class_count(options.class_count)
          .build()?;
        Ok(Arc::new(detector))
      }
      other => Err(EngineError::UnsupportedScheme(other.to_string())),
    }
  }
}

#[cfg(feature = "engine_rknpu")]
mod yolo26;
#[cfg(feature = "engine_rknpu")]
pub use self::yolo26::{Yolo26, Yolo26Builder};
