// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/backend.rs - 推理后端
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

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{DetectResult, EngineError};

mod dummy;
mod local;
mod remote;
mod selector;

pub use self::dummy::DummyBackend;
pub use self::local::LocalModel;
pub use self::remote::RemoteCloud;
pub use self::selector::{BackendSelector, ModelSlot, Readiness, ReadinessStatus, SelectError};

/// 后端错误，消息会原样返回给调用方
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
  #[error("backend unavailable: {0}")]
  Unavailable(String),
  #[error("inference failed: {0}")]
  Inference(String),
}

impl From<EngineError> for BackendError {
  fn from(err: EngineError) -> Self {
    match err {
      EngineError::Decode(_) | EngineError::Inference(_) => BackendError::Inference(err.to_string()),
      EngineError::ModelMissing(_) | EngineError::Load(_) | EngineError::UnsupportedScheme(_) => {
        BackendError::Unavailable(err.to_string())
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
  Dummy,
  Local,
  Remote,
}

impl BackendKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      BackendKind::Dummy => "dummy",
      BackendKind::Local => "local",
      BackendKind::Remote => "remote",
    }
  }
}

/// 后端的静态身份，构造后不再变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendIdentity {
  pub kind: BackendKind,
  pub engine: String,
  pub model_version: String,
  pub model_file: Option<PathBuf>,
}

impl BackendIdentity {
  pub fn new(kind: BackendKind, engine: impl Into<String>, version: &str) -> Self {
    Self {
      kind,
      engine: engine.into(),
      model_version: format!("{}/{}", kind.as_str(), version),
      model_file: None,
    }
  }

  pub fn with_model_file(mut self, path: Option<PathBuf>) -> Self {
    self.model_file = path;
    self
  }
}

pub enum InferenceBackend {
  Dummy(DummyBackend),
  LocalModel(LocalModel),
  RemoteCloud(RemoteCloud),
}

impl InferenceBackend {
  pub async fn detect(&self, image: &[u8]) -> Result<DetectResult, BackendError> {
    let result = match self {
      InferenceBackend::Dummy(backend) => Ok(backend.detect()),
      InferenceBackend::LocalModel(backend) => backend.detect(image).await,
      InferenceBackend::RemoteCloud(backend) => backend.detect(image).await,
    }?;
    debug!(
      "后端 {} 返回 {} 个检测框",
      self.identity().engine,
      result.len()
    );
    Ok(result)
  }

  pub fn identity(&self) -> &BackendIdentity {
    match self {
      InferenceBackend::Dummy(backend) => backend.identity(),
      InferenceBackend::LocalModel(backend) => backend.identity(),
      InferenceBackend::RemoteCloud(backend) => backend.identity(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn model_version_names_variant_and_artifact() {
    let identity = BackendIdentity::new(BackendKind::Local, "local:yolo26", "v2-trashnet");
    assert_eq!(identity.model_version, "local/v2-trashnet");
  }

  #[test]
  fn engine_errors_map_by_cause() {
    assert!(matches!(
      BackendError::from(EngineError::Decode("bad jpeg".into())),
      BackendError::Inference(_)
    ));
    assert!(matches!(
      BackendError::from(EngineError::ModelMissing(PathBuf::from("/w.rknn"))),
      BackendError::Unavailable(_)
    ));
  }
}
