// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/gateway.rs - 分类网关
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

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  aggregate::{self, TopKEntry},
  backend::{BackendError, BackendSelector, ModelSlot, ReadinessStatus},
  config::ServiceConfig,
  labels::{ClassMap, ConfigError},
  model::Detection,
  record::{self, PersistenceError, ScanRecord, ScanRecorder},
  tips::{TipAdvisor, UNIDENTIFIED_TIP},
};

/// 返回给前端的统一结果，与后端种类无关
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
  pub prediction: String,
  pub confidence: f32,
  pub topk: Vec<TopKEntry>,
  pub tips: String,
  pub model_version: String,
  #[serde(rename = "annotated_image_base64")]
  pub annotated_image: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
  #[error("{0}")]
  Input(String),
  #[error("{0}")]
  BackendUnavailable(String),
  #[error("{0}")]
  Inference(String),
}

impl From<BackendError> for ClassifyError {
  fn from(err: BackendError) -> Self {
    match err {
      BackendError::Unavailable(_) => ClassifyError::BackendUnavailable(err.to_string()),
      BackendError::Inference(_) => ClassifyError::Inference(err.to_string()),
    }
  }
}

#[derive(Error, Debug)]
pub enum StartupError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("扫描记录存储无法打开: {0}")]
  Store(#[from] PersistenceError),
}

pub struct ClassificationGateway {
  slot: Arc<ModelSlot>,
  class_map: Arc<ClassMap>,
  tips: TipAdvisor,
  recorder: ScanRecorder,
  annotate: bool,
}

impl ClassificationGateway {
  pub fn new(slot: Arc<ModelSlot>, class_map: Arc<ClassMap>, recorder: ScanRecorder) -> Self {
    let annotate = slot.config().annotate;
    Self {
      slot,
      class_map,
      tips: TipAdvisor::default(),
      recorder,
      annotate,
    }
  }

  pub fn with_tips(mut self, tips: TipAdvisor) -> Self {
    self.tips = tips;
    self
  }

  /// 加载类别表、打开记录存储、选择后端
  ///
  /// 类别表或存储配置错误直接返回；后端不可用时网关照常构造，请求会得到 503。
  pub async fn from_config(
    config: ServiceConfig,
    selector: BackendSelector,
  ) -> Result<Self, StartupError> {
    config.validate()?;
    let class_map = Arc::new(ClassMap::load_with_fallback(
      &config.class_map,
      config.class_map_fallback,
    )?);

    let recorder = match &config.record {
      Some(url) => {
        info!("扫描记录存储: {}", url);
        ScanRecorder::spawn(record::open_store(url)?, config.record_queue)
      }
      None => {
        info!("未配置扫描记录存储");
        ScanRecorder::disabled()
      }
    };

    let slot = Arc::new(ModelSlot::new(selector, config, class_map.clone()));
    let readiness = slot.load().await;
    if readiness.status != ReadinessStatus::Ready {
      warn!(
        "推理后端未就绪 ({}), 分类请求将返回不可用",
        readiness.error.as_deref().unwrap_or(readiness.status.as_str())
      );
    }

    Ok(Self::new(slot, class_map, recorder))
  }

  pub fn slot(&self) -> &Arc<ModelSlot> {
    &self.slot
  }

  pub fn class_map(&self) -> &ClassMap {
    &self.class_map
  }

  pub async fn classify(
    &self,
    image: &[u8],
    user_id: Option<&str>,
  ) -> Result<ClassificationResult, ClassifyError> {
    if image.is_empty() {
      return Err(ClassifyError::Input("empty file".to_string()));
    }

    let backend = self.slot.active()?;
    let now = std::time::Instant::now();
    let mut detected = backend.detect(image).await?;
    let reduction = aggregate::reduce(&detected.items, &self.class_map);

    let tips = if reduction.is_identified() {
      self.tips.lookup(&reduction.prediction).to_string()
    } else {
      UNIDENTIFIED_TIP.to_string()
    };

    let annotated_image = match detected.annotated_image.take() {
      Some(encoded) => Some(encoded),
      None if self.annotate && !detected.is_empty() => {
        annotate_image(image.to_vec(), detected.items.to_vec()).await
      }
      None => None,
    };

    let model_version = backend.identity().model_version.clone();
    info!(
      "分类完成: {} ({:.3}), 候选 {} 个, 模型 {}, 耗时 {:.2?}",
      reduction.prediction,
      reduction.confidence,
      reduction.topk.len(),
      model_version,
      now.elapsed()
    );

    if reduction.is_identified() {
      self.recorder.record(ScanRecord {
        user_id: user_id.map(str::to_string),
        label: reduction.prediction.clone(),
        confidence: reduction.confidence,
        timestamp: Utc::now(),
        model_version: model_version.clone(),
      });
    }

    Ok(ClassificationResult {
      prediction: reduction.prediction,
      confidence: reduction.confidence,
      topk: reduction.topk,
      tips,
      model_version,
      annotated_image,
    })
  }

  pub async fn shutdown(&self) {
    self.recorder.shutdown().await;
  }
}

#[cfg(feature = "annotate_image")]
async fn annotate_image(image: Vec<u8>, detections: Vec<Detection>) -> Option<String> {
  let task =
    tokio::task::spawn_blocking(move || crate::annotate::annotate_base64(&image, &detections));
  match task.await {
    Ok(Ok(encoded)) => encoded,
    Ok(Err(e)) => {
      warn!("标注图像失败: {}", e);
      None
    }
    Err(e) => {
      warn!("标注任务异常退出: {}", e);
      None
    }
  }
}

#[cfg(not(feature = "annotate_image"))]
async fn annotate_image(_image: Vec<u8>, _detections: Vec<Detection>) -> Option<String> {
  warn!("未启用 annotate_image 特性，跳过标注");
  None
}
