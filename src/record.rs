// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/record.rs - 扫描记录
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

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::FromUrl;
#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryRecordStore;

/// 一次完成的分类，追加写入，不会更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
  pub user_id: Option<String>,
  pub label: String,
  pub confidence: f32,
  pub timestamp: DateTime<Utc>,
  pub model_version: String,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("存储不可用: {0}")]
  Unavailable(String),
}

#[async_trait]
pub trait ScanStore: Send + Sync {
  async fn record(&self, record: &ScanRecord) -> Result<(), PersistenceError>;
}

/// 只写日志的存储，`log:` 方案
pub struct LogScanStore;

impl FromUrl for LogScanStore {
  type Error = PersistenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "log" {
      return Err(PersistenceError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogScanStore)
  }
}

#[async_trait]
impl ScanStore for LogScanStore {
  async fn record(&self, record: &ScanRecord) -> Result<(), PersistenceError> {
    info!(
      "扫描记录: 用户 {} 标签 {} 置信度 {:.3} 模型 {}",
      record.user_id.as_deref().unwrap_or("-"),
      record.label,
      record.confidence,
      record.model_version
    );
    Ok(())
  }
}

/// 按 URL 方案打开扫描记录存储
pub fn open_store(url: &Url) -> Result<Arc<dyn ScanStore>, PersistenceError> {
  match url.scheme() {
    #[cfg(feature = "directory_record")]
    DirectoryRecordStore::SCHEME => Ok(Arc::new(DirectoryRecordStore::from_url(url)?)),
    "log" => Ok(Arc::new(LogScanStore::from_url(url)?)),
    other => Err(PersistenceError::SchemeMismatch(other.to_string())),
  }
}

/// 把扫描记录放进有界队列，由后台任务写入存储
///
/// 队列满或存储失败只记日志，不影响分类响应。
pub struct ScanRecorder {
  sender: Mutex<Option<mpsc::Sender<ScanRecord>>>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScanRecorder {
  pub fn disabled() -> Self {
    Self {
      sender: Mutex::new(None),
      worker: Mutex::new(None),
    }
  }

  /// 需要在 tokio 运行时内调用
  pub fn spawn(store: Arc<dyn ScanStore>, capacity: usize) -> Self {
    let (tx, mut rx) = mpsc::channel::<ScanRecord>(capacity.max(1));
    let worker = tokio::spawn(async move {
      while let Some(record) = rx.recv().await {
        match store.record(&record).await {
          Ok(()) => debug!("扫描记录已保存: {}", record.label),
          Err(e) => warn!("扫描记录保存失败: {}", e),
        }
      }
      debug!("扫描记录队列已关闭");
    });

    Self {
      sender: Mutex::new(Some(tx)),
      worker: Mutex::new(Some(worker)),
    }
  }

  pub fn record(&self, record: ScanRecord) {
    let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(sender) = sender.as_ref() else {
      return;
    };
    match sender.try_send(record) {
      Ok(()) => {}
      Err(TrySendError::Full(record)) => {
        warn!("扫描记录队列已满，丢弃记录: {}", record.label)
      }
      Err(TrySendError::Closed(record)) => {
        warn!("扫描记录队列已关闭，丢弃记录: {}", record.label)
      }
    }
  }

  /// 关闭队列并等待已排队的记录写完
  pub async fn shutdown(&self) {
    self
      .sender
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let worker = self
      .worker
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(worker) = worker
      && let Err(e) = worker.await
    {
      warn!("扫描记录任务异常退出: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::Notify;

  #[derive(Default)]
  struct MemoryStore {
    records: tokio::sync::Mutex<Vec<ScanRecord>>,
  }

  #[async_trait]
  impl ScanStore for MemoryStore {
    async fn record(&self, record: &ScanRecord) -> Result<(), PersistenceError> {
      self.records.lock().await.push(record.clone());
      Ok(())
    }
  }

  struct FailingStore;

  #[async_trait]
  impl ScanStore for FailingStore {
    async fn record(&self, _: &ScanRecord) -> Result<(), PersistenceError> {
      Err(PersistenceError::Unavailable("store offline".to_string()))
    }
  }

  struct BlockedStore(Arc<Notify>);

  #[async_trait]
  impl ScanStore for BlockedStore {
    async fn record(&self, _: &ScanRecord) -> Result<(), PersistenceError> {
      self.0.notified().await;
      Ok(())
    }
  }

  fn scan(label: &str) -> ScanRecord {
    ScanRecord {
      user_id: Some("user-1".to_string()),
      label: label.to_string(),
      confidence: 0.8,
      timestamp: Utc::now(),
      model_version: "local/v1".to_string(),
    }
  }

  #[tokio::test]
  async fn shutdown_drains_queue() {
    let store = Arc::new(MemoryStore::default());
    let recorder = ScanRecorder::spawn(store.clone(), 8);
    recorder.record(scan("glass"));
    recorder.record(scan("paper"));
    recorder.shutdown().await;

    let labels: Vec<_> = store
      .records
      .lock()
      .await
      .iter()
      .map(|r| r.label.clone())
      .collect();
    assert_eq!(labels, ["glass", "paper"]);

    // 关闭后的记录被静默丢弃
    recorder.record(scan("metal"));
    assert_eq!(store.records.lock().await.len(), 2);
  }

  #[tokio::test]
  async fn store_failures_stay_contained() {
    let recorder = ScanRecorder::spawn(Arc::new(FailingStore), 4);
    recorder.record(scan("glass"));
    recorder.shutdown().await;
  }

  #[tokio::test]
  async fn full_queue_never_blocks() {
    let gate = Arc::new(Notify::new());
    let recorder = ScanRecorder::spawn(Arc::new(BlockedStore(gate.clone())), 1);
    for _ in 0..16 {
      recorder.record(scan("plastic"));
    }
    gate.notify_one();
    gate.notify_one();
    recorder.shutdown().await;
  }

  #[test]
  fn unknown_store_scheme_is_rejected() {
    let url = Url::parse("firestore://project/scans").unwrap();
    assert!(matches!(
      open_store(&url),
      Err(PersistenceError::SchemeMismatch(s)) if s == "firestore"
    ));
    assert!(open_store(&Url::parse("log:scans").unwrap()).is_ok());
  }
}
