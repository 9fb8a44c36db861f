// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/backend/remote.rs - 远端推理后端
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

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::{
  aggregate::TopKEntry,
  backend::{BackendError, BackendIdentity, BackendKind},
  config::RemoteConfig,
  labels::ClassMap,
  model::{DetectResult, Detection},
};

pub const REMOTE_DEFAULT_VERSION: &str = "v1-yolo-cloud";

/// 远端应答：原始检测框，或云端服务的 topk 格式
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RemoteReply {
  Detections {
    detections: Vec<Detection>,
    #[serde(default)]
    annotated_image_base64: Option<String>,
  },
  TopK {
    topk: Vec<TopKEntry>,
    #[serde(default)]
    annotated_image_base64: Option<String>,
  },
}

/// 把图像转发给远端服务，不重试
pub struct RemoteCloud {
  client: reqwest::Client,
  endpoint: Url,
  token: Option<String>,
  class_map: Arc<ClassMap>,
  identity: BackendIdentity,
}

impl RemoteCloud {
  pub fn new(
    config: &RemoteConfig,
    class_map: Arc<ClassMap>,
    version: &str,
  ) -> Result<Self, BackendError> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| BackendError::Unavailable(format!("cannot build http client: {}", e)))?;

    Ok(Self {
      client,
      endpoint: config.endpoint.clone(),
      token: config.token.clone(),
      class_map,
      identity: BackendIdentity::new(BackendKind::Remote, "remote", version),
    })
  }

  pub fn identity(&self) -> &BackendIdentity {
    &self.identity
  }

  pub async fn detect(&self, image: &[u8]) -> Result<DetectResult, BackendError> {
    let form = Form::new().part("file", Part::bytes(image.to_vec()).file_name("upload"));
    let mut request = self.client.post(self.endpoint.clone()).multipart(form);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| {
      warn!("远端推理请求失败: {}", e);
      if e.is_timeout() {
        BackendError::Unavailable("remote endpoint timed out".to_string())
      } else {
        BackendError::Unavailable(format!("remote endpoint unreachable: {}", e))
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      warn!("远端推理返回错误状态: {}", status);
      return Err(BackendError::Unavailable(format!(
        "remote endpoint returned {}",
        status
      )));
    }

    let reply: RemoteReply = response.json().await.map_err(|e| {
      if e.is_decode() {
        BackendError::Inference(format!("malformed remote reply: {}", e))
      } else {
        BackendError::Unavailable(format!("remote reply interrupted: {}", e))
      }
    })?;
    debug!("远端应答: {:?}", reply);

    Ok(self.decode_reply(reply))
  }

  fn decode_reply(&self, reply: RemoteReply) -> DetectResult {
    match reply {
      RemoteReply::Detections {
        detections,
        annotated_image_base64,
      } => DetectResult {
        items: detections.into_boxed_slice(),
        annotated_image: annotated_image_base64,
      },
      RemoteReply::TopK {
        topk,
        annotated_image_base64,
      } => {
        let items: Vec<Detection> = topk
          .into_iter()
          .filter_map(|entry| match self.class_map.index_of(&entry.label) {
            Some(class_id) => Some(Detection::new(class_id, entry.score)),
            None => {
              warn!("远端返回了类别表之外的标签: {}", entry.label);
              None
            }
          })
          .collect();
        DetectResult {
          items: items.into_boxed_slice(),
          annotated_image: annotated_image_base64,
        }
      }
    }
  }
}
