// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/backend/selector.rs - 后端选择与模型就绪状态
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

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
  backend::{
    BackendError, BackendIdentity, DummyBackend, InferenceBackend, LocalModel, RemoteCloud,
    local::LOCAL_DEFAULT_VERSION, remote::REMOTE_DEFAULT_VERSION,
  },
  config::ServiceConfig,
  labels::{ClassMap, ConfigError, ModelMeta},
  model::{DetectorLoader, EngineLoader, EngineOptions},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum SelectError {
  #[error("no inference backend available")]
  NoBackendAvailable,
  #[error("model failed to load: {0}")]
  LoadFailed(String),
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
}

/// 选择策略：远端优先，其次本地模型，随机后端只在显式允许时使用
#[derive(Clone)]
pub struct BackendSelector {
  loader: Arc<dyn DetectorLoader>,
}

impl Default for BackendSelector {
  fn default() -> Self {
    Self::with_loader(Arc::new(EngineLoader))
  }
}

impl BackendSelector {
  pub fn with_loader(loader: Arc<dyn DetectorLoader>) -> Self {
    Self { loader }
  }

  /// 阻塞调用：本地模型在这里完成加载
  pub fn select(
    &self,
    config: &ServiceConfig,
    class_map: &Arc<ClassMap>,
  ) -> Result<InferenceBackend, SelectError> {
    if let Some(remote) = &config.remote {
      let meta = ModelMeta::load(&config.model_meta, REMOTE_DEFAULT_VERSION)?;
      info!("使用远端推理服务: {}", remote.endpoint);
      let backend = RemoteCloud::new(remote, class_map.clone(), &meta.version)
        .map_err(|e| SelectError::LoadFailed(e.to_string()))?;
      return Ok(InferenceBackend::RemoteCloud(backend));
    }

    if let Some(model) = &config.model {
      let meta = ModelMeta::load(&config.model_meta, LOCAL_DEFAULT_VERSION)?;
      let options = EngineOptions {
        confidence: config.confidence,
        class_count: class_map.class_count(),
      };
      info!("加载本地模型: {}", model);
      match self.loader.load(model, &options) {
        Ok(detector) => {
          let backend = LocalModel::new(detector, &meta.version, Some(url_file_path(model)));
          return Ok(InferenceBackend::LocalModel(backend));
        }
        Err(e) if config.allow_dummy => {
          warn!("本地模型加载失败 ({})，按配置退回随机后端", e);
        }
        Err(e) => {
          error!("本地模型加载失败: {}", e);
          return Err(SelectError::LoadFailed(e.to_string()));
        }
      }
    }

    if config.allow_dummy {
      warn!("使用随机占位后端，预测结果没有意义");
      return Ok(InferenceBackend::Dummy(DummyBackend::new(class_map)));
    }

    Err(SelectError::NoBackendAvailable)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStatus {
  Unloaded,
  Loading,
  Ready,
  LoadFailed,
}

impl ReadinessStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReadinessStatus::Unloaded => "unloaded",
      ReadinessStatus::Loading => "loading",
      ReadinessStatus::Ready => "ready",
      ReadinessStatus::LoadFailed => "load_failed",
    }
  }
}

/// 状态快照
#[derive(Debug, Clone)]
pub struct Readiness {
  pub status: ReadinessStatus,
  pub identity: Option<BackendIdentity>,
  pub error: Option<String>,
}

enum SlotState {
  Unloaded,
  Loading,
  Ready(Arc<InferenceBackend>),
  LoadFailed(String),
}

/// 持有当前后端的服务对象
///
/// 状态转换为 `Unloaded -> Loading -> {Ready, LoadFailed}`。
/// `Loading` 期间的请求立即失败而不是等待；`LoadFailed` 只有 [`ModelSlot::reload`] 能离开。
/// 请求在读锁下克隆 `Arc`。重新加载期间旧后端继续服务，新后端就绪后才替换句柄；
/// 重新加载失败时保留旧后端。
pub struct ModelSlot {
  state: RwLock<SlotState>,
  selector: BackendSelector,
  config: RwLock<ServiceConfig>,
  class_map: Arc<ClassMap>,
  loading: Mutex<()>,
}

impl ModelSlot {
  pub fn new(selector: BackendSelector, config: ServiceConfig, class_map: Arc<ClassMap>) -> Self {
    Self {
      state: RwLock::new(SlotState::Unloaded),
      selector,
      config: RwLock::new(config),
      class_map,
      loading: Mutex::new(()),
    }
  }

  /// 直接装入已构造好的后端
  pub fn with_backend(
    backend: InferenceBackend,
    config: ServiceConfig,
    class_map: Arc<ClassMap>,
  ) -> Self {
    let slot = Self::new(BackendSelector::default(), config, class_map);
    slot.set_state(SlotState::Ready(Arc::new(backend)));
    slot
  }

  /// 当前后端对应的配置
  pub fn config(&self) -> ServiceConfig {
    self
      .config
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn set_state(&self, state: SlotState) {
    *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
  }

  fn set_config(&self, config: ServiceConfig) {
    *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
  }

  fn is_serving(&self) -> bool {
    matches!(
      *self.state.read().unwrap_or_else(PoisonError::into_inner),
      SlotState::Ready(_)
    )
  }

  pub async fn load(&self) -> Readiness {
    let _guard = self.loading.lock().await;
    let _ = self.select_into(self.config()).await;
    self.readiness()
  }

  /// 按新配置重新选择后端，由外部在配置变化后触发
  ///
  /// 选择失败时返回错误；如果之前已有可用后端，它会继续服务。
  pub async fn reload(&self, config: ServiceConfig) -> Result<Readiness, SelectError> {
    let _guard = self.loading.lock().await;
    info!("重新加载推理后端");
    self.select_into(config).await?;
    Ok(self.readiness())
  }

  /// 调用方须持有 `loading` 锁
  async fn select_into(&self, config: ServiceConfig) -> Result<(), SelectError> {
    let serving = self.is_serving();
    if !serving {
      self.set_state(SlotState::Loading);
    }

    let selector = self.selector.clone();
    let class_map = self.class_map.clone();
    let candidate = config.clone();
    let selected = tokio::task::spawn_blocking(move || selector.select(&candidate, &class_map))
      .await
      .unwrap_or_else(|e| Err(SelectError::LoadFailed(format!("loader task failed: {}", e))));

    match selected {
      Ok(backend) => {
        info!(
          "后端就绪: {} ({})",
          backend.identity().engine,
          backend.identity().model_version
        );
        self.set_config(config);
        self.set_state(SlotState::Ready(Arc::new(backend)));
        Ok(())
      }
      Err(e) if serving => {
        warn!("重新加载失败，继续使用当前后端: {}", e);
        Err(e)
      }
      Err(e) => {
        error!("后端不可用: {}", e);
        self.set_config(config);
        self.set_state(SlotState::LoadFailed(e.to_string()));
        Err(e)
      }
    }
  }

  pub fn active(&self) -> Result<Arc<InferenceBackend>, BackendError> {
    match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
      SlotState::Ready(backend) => Ok(backend.clone()),
      SlotState::Loading => Err(BackendError::Unavailable("model is loading".to_string())),
      SlotState::Unloaded => Err(BackendError::Unavailable("model is not loaded".to_string())),
      SlotState::LoadFailed(reason) => Err(BackendError::Unavailable(reason.clone())),
    }
  }

  pub fn readiness(&self) -> Readiness {
    match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
      SlotState::Unloaded => Readiness {
        status: ReadinessStatus::Unloaded,
        identity: None,
        error: None,
      },
      SlotState::Loading => Readiness {
        status: ReadinessStatus::Loading,
        identity: None,
        error: None,
      },
      SlotState::Ready(backend) => Readiness {
        status: ReadinessStatus::Ready,
        identity: Some(backend.identity().clone()),
        error: None,
      },
      SlotState::LoadFailed(reason) => Readiness {
        status: ReadinessStatus::LoadFailed,
        identity: None,
        error: Some(reason.clone()),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    backend::BackendKind,
    config::RemoteConfig,
    model::{Detection, Detector, EngineError},
  };
  use std::sync::Barrier;
  use url::Url;

  struct FixedDetector;

  impl Detector for FixedDetector {
    fn detect(&self, _: &[u8]) -> Result<Vec<Detection>, EngineError> {
      Ok(vec![Detection::new(0, 0.5)])
    }

    fn engine(&self) -> &str {
      "fixed"
    }
  }

  struct StaticLoader(bool);

  impl DetectorLoader for StaticLoader {
    fn load(&self, url: &Url, _: &EngineOptions) -> Result<Arc<dyn Detector>, EngineError> {
      if self.0 {
        Ok(Arc::new(FixedDetector))
      } else {
        Err(EngineError::ModelMissing(url_file_path(url)))
      }
    }
  }

  fn config() -> ServiceConfig {
    ServiceConfig {
      model_meta: "/nonexistent/model_meta.json".into(),
      ..ServiceConfig::default()
    }
  }

  fn kind_of(result: Result<InferenceBackend, SelectError>) -> BackendKind {
    result.map(|b| b.identity().kind).unwrap()
  }

  #[test]
  fn remote_wins_when_configured() {
    let config = ServiceConfig {
      remote: Some(RemoteConfig::new(Url::parse("http://127.0.0.1:1/").unwrap())),
      model: Some(Url::parse("fixed:///w.bin").unwrap()),
      ..config()
    };
    let selector = BackendSelector::with_loader(Arc::new(StaticLoader(true)));
    let map = Arc::new(ClassMap::builtin());
    assert_eq!(kind_of(selector.select(&config, &map)), BackendKind::Remote);
  }

  #[test]
  fn local_model_when_weights_load() {
    let config = ServiceConfig {
      model: Some(Url::parse("fixed:///w.bin").unwrap()),
      ..config()
    };
    let selector = BackendSelector::with_loader(Arc::new(StaticLoader(true)));
    let backend = selector
      .select(&config, &Arc::new(ClassMap::builtin()))
      .unwrap();
    assert_eq!(backend.identity().kind, BackendKind::Local);
    assert_eq!(backend.identity().model_version, "local/v1-yolo-default");
  }

  #[test]
  fn failed_weights_only_fall_back_when_allowed() {
    let selector = BackendSelector::with_loader(Arc::new(StaticLoader(false)));
    let map = Arc::new(ClassMap::builtin());
    let config = ServiceConfig {
      model: Some(Url::parse("fixed:///w.bin").unwrap()),
      ..config()
    };
    assert!(matches!(
      selector.select(&config, &map),
      Err(SelectError::LoadFailed(_))
    ));

    let config = ServiceConfig {
      allow_dummy: true,
      ..config
    };
    assert_eq!(kind_of(selector.select(&config, &map)), BackendKind::Dummy);
  }

  #[test]
  fn nothing_configured_is_hard_failure() {
    let selector = BackendSelector::default();
    assert!(matches!(
      selector.select(&config(), &Arc::new(ClassMap::builtin())),
      Err(SelectError::NoBackendAvailable)
    ));
  }

  #[tokio::test]
  async fn slot_walks_through_states() {
    let map = Arc::new(ClassMap::builtin());
    let slot = ModelSlot::new(
      BackendSelector::with_loader(Arc::new(StaticLoader(false))),
      ServiceConfig {
        model: Some(Url::parse("fixed:///w.bin").unwrap()),
        ..config()
      },
      map,
    );
    assert_eq!(slot.readiness().status, ReadinessStatus::Unloaded);
    assert!(slot.active().is_err());

    let readiness = slot.load().await;
    assert_eq!(readiness.status, ReadinessStatus::LoadFailed);
    assert!(readiness.error.unwrap().contains("w.bin"));
    assert!(matches!(slot.active(), Err(BackendError::Unavailable(_))));
  }

  #[tokio::test]
  async fn reload_swaps_handle_without_breaking_holders() {
    let map = Arc::new(ClassMap::builtin());
    let local = ServiceConfig {
      model: Some(Url::parse("fixed:///w.bin").unwrap()),
      ..config()
    };
    let slot = ModelSlot::new(
      BackendSelector::with_loader(Arc::new(StaticLoader(true))),
      local.clone(),
      map,
    );
    assert_eq!(slot.load().await.status, ReadinessStatus::Ready);
    let held = slot.active().unwrap();

    assert_eq!(slot.reload(local).await.unwrap().status, ReadinessStatus::Ready);
    let fresh = slot.active().unwrap();
    assert!(!Arc::ptr_eq(&held, &fresh));
    assert_eq!(held.detect(b"img").await.unwrap().len(), 1);

    let dummy = ServiceConfig {
      allow_dummy: true,
      ..config()
    };
    let readiness = slot.reload(dummy).await.unwrap();
    assert_eq!(readiness.identity.unwrap().kind, BackendKind::Dummy);
    assert!(slot.config().allow_dummy);
  }

  #[tokio::test]
  async fn failed_reload_keeps_serving_backend() {
    let map = Arc::new(ClassMap::builtin());
    let local = ServiceConfig {
      model: Some(Url::parse("fixed:///w.bin").unwrap()),
      ..config()
    };
    let slot = ModelSlot::new(
      BackendSelector::with_loader(Arc::new(StaticLoader(true))),
      local,
      map,
    );
    slot.load().await;
    let before = slot.active().unwrap();

    assert!(matches!(
      slot.reload(config()).await,
      Err(SelectError::NoBackendAvailable)
    ));
    let readiness = slot.readiness();
    assert_eq!(readiness.status, ReadinessStatus::Ready);
    assert!(Arc::ptr_eq(&before, &slot.active().unwrap()));
    assert!(slot.config().model.is_some());
  }

  /// 加载时停在屏障上，直到测试放行
  struct GatedLoader {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
  }

  impl DetectorLoader for GatedLoader {
    fn load(&self, _: &Url, _: &EngineOptions) -> Result<Arc<dyn Detector>, EngineError> {
      self.entered.wait();
      self.release.wait();
      Ok(Arc::new(FixedDetector))
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn requests_fail_fast_while_loading() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let loader = GatedLoader {
      entered: entered.clone(),
      release: release.clone(),
    };
    let slot = Arc::new(ModelSlot::new(
      BackendSelector::with_loader(Arc::new(loader)),
      ServiceConfig {
        model: Some(Url::parse("fixed:///w.bin").unwrap()),
        ..config()
      },
      Arc::new(ClassMap::builtin()),
    ));

    let loading = tokio::spawn({
      let slot = slot.clone();
      async move { slot.load().await }
    });
    tokio::task::spawn_blocking(move || entered.wait())
      .await
      .unwrap();

    assert_eq!(slot.readiness().status, ReadinessStatus::Loading);
    assert_eq!(
      slot.active().err(),
      Some(BackendError::Unavailable("model is loading".to_string()))
    );

    tokio::task::spawn_blocking(move || release.wait())
      .await
      .unwrap();
    assert_eq!(loading.await.unwrap().status, ReadinessStatus::Ready);
    assert!(slot.active().is_ok());
  }
}
