// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/server.rs - HTTP 接口
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

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
  backend::ModelSlot,
  gateway::{ClassificationGateway, ClassificationResult, ClassifyError},
  url_file_path,
};

#[derive(Clone)]
pub struct AppState {
  gateway: Arc<ClassificationGateway>,
  service_name: Arc<str>,
}

/// 错误统一返回 `{"error": "..."}`
pub struct ApiError(ClassifyError);

impl From<ClassifyError> for ApiError {
  fn from(err: ClassifyError) -> Self {
    ApiError(err)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      ClassifyError::Input(_) => StatusCode::BAD_REQUEST,
      ClassifyError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ClassifyError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
      warn!("分类请求失败 ({}): {}", status, self.0);
    }
    (status, Json(json!({ "error": self.0.to_string() }))).into_response()
  }
}

pub fn router(gateway: Arc<ClassificationGateway>, max_upload_bytes: usize) -> Router {
  let state = AppState {
    service_name: gateway.slot().config().service_name.as_str().into(),
    gateway,
  };

  Router::new()
    .route("/api/classify", post(classify))
    .route("/predict", post(classify))
    .route("/health", get(health))
    .route("/model-info", get(model_info))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .with_state(state)
}

fn bad_multipart(err: impl std::fmt::Display) -> ClassifyError {
  ClassifyError::Input(format!("invalid multipart body: {}", err))
}

async fn classify(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationResult>, ApiError> {
  let mut multipart = multipart.map_err(bad_multipart)?;
  let mut file = None;
  let mut user_id = None;

  while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
    let name = field.name().map(str::to_owned);
    match name.as_deref() {
      Some("file") => file = Some(field.bytes().await.map_err(bad_multipart)?),
      Some("user_id") => {
        let text = field.text().await.map_err(bad_multipart)?;
        let text = text.trim();
        if !text.is_empty() {
          user_id = Some(text.to_string());
        }
      }
      other => debug!("忽略表单字段: {:?}", other),
    }
  }

  let file = file.ok_or_else(|| ClassifyError::Input("missing file".to_string()))?;
  let result = state.gateway.classify(&file, user_id.as_deref()).await?;
  Ok(Json(result))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
  Json(json!({ "ok": true, "service": &*state.service_name }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
  pub status: &'static str,
  pub model_version: Option<String>,
  pub model_file_found: bool,
  pub model_size_mb: f64,
  pub engine: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ModelInfo {
  pub fn from_slot(slot: &ModelSlot) -> Self {
    let readiness = slot.readiness();
    let config = slot.config();

    let (engine, model_file) = match &readiness.identity {
      Some(identity) => (identity.engine.clone(), identity.model_file.clone()),
      None if config.remote.is_some() => ("remote".to_string(), None),
      None => match &config.model {
        Some(url) => (format!("local:{}", url.scheme()), Some(url_file_path(url))),
        None if config.allow_dummy => ("dummy".to_string(), None),
        None => ("none".to_string(), None),
      },
    };
    let (model_file_found, model_size_mb) = weights_file_size(model_file);

    ModelInfo {
      status: readiness.status.as_str(),
      model_version: readiness.identity.map(|identity| identity.model_version),
      model_file_found,
      model_size_mb,
      engine,
      error: readiness.error,
    }
  }
}

fn weights_file_size(path: Option<PathBuf>) -> (bool, f64) {
  match path.and_then(|p| std::fs::metadata(p).ok()) {
    Some(meta) if meta.is_file() => {
      let mb = meta.len() as f64 / (1024.0 * 1024.0);
      (true, (mb * 100.0).round() / 100.0)
    }
    _ => (false, 0.0),
  }
}

async fn model_info(State(state): State<AppState>) -> Json<ModelInfo> {
  Json(ModelInfo::from_slot(state.gateway.slot()))
}
