// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/backend/local.rs - 本地模型后端
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

use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::{
  backend::{BackendError, BackendIdentity, BackendKind},
  model::{DetectResult, Detector},
};

pub const LOCAL_DEFAULT_VERSION: &str = "v1-yolo-default";

/// 可重入检测器允许的最大并发推理数
const REENTRANT_PERMITS: usize = 64;

/// 包装启动时加载的检测器，所有请求共享同一个句柄
pub struct LocalModel {
  detector: Arc<dyn Detector>,
  permits: Arc<Semaphore>,
  identity: BackendIdentity,
}

impl LocalModel {
  pub fn new(detector: Arc<dyn Detector>, version: &str, model_file: Option<PathBuf>) -> Self {
    let permits = if detector.reentrant() {
      REENTRANT_PERMITS
    } else {
      1
    };
    let identity = BackendIdentity::new(
      BackendKind::Local,
      format!("local:{}", detector.engine()),
      version,
    )
    .with_model_file(model_file);

    Self {
      detector,
      permits: Arc::new(Semaphore::new(permits)),
      identity,
    }
  }

  pub fn identity(&self) -> &BackendIdentity {
    &self.identity
  }

  pub async fn detect(&self, image: &[u8]) -> Result<DetectResult, BackendError> {
    let permit = self
      .permits
      .clone()
      .acquire_owned()
      .await
      .map_err(|_| BackendError::Unavailable("local model is shutting down".to_string()))?;

    let detector = self.detector.clone();
    let image = image.to_vec();
    let now = std::time::Instant::now();
    // 许可随阻塞任务一起释放，请求被取消时推理仍然独占模型
    let detections = tokio::task::spawn_blocking(move || {
      let _permit = permit;
      detector.detect(&image)
    })
    .await
    .map_err(|e| {
      error!("推理任务异常退出: {}", e);
      BackendError::Inference(format!("detector task failed: {}", e))
    })??;
    debug!("本地推理完成，耗时: {:.2?}", now.elapsed());

    Ok(detections.into())
  }
}
