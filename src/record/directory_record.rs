// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/record/directory_record.rs - 目录扫描记录
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

use async_trait::async_trait;
use chrono::Datelike;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  record::{PersistenceError, ScanRecord, ScanStore},
  url_file_path,
};

const SCAN_FILE: &str = "scans.jsonl";

/// 每条扫描记录写成一行 JSON，按日期分目录：`<dir>/<yyyy>/<mm>/<dd>/scans.jsonl`
pub struct DirectoryRecordStore {
  directory: PathBuf,
}

impl FromUrlWithScheme for DirectoryRecordStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordStore {
  type Error = PersistenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PersistenceError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(DirectoryRecordStore {
      directory: url_file_path(url),
    })
  }
}

impl DirectoryRecordStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  fn record_path(&self, record: &ScanRecord) -> PathBuf {
    let ts = record.timestamp;
    self
      .directory
      .join(ts.year().to_string())
      .join(format!("{:02}", ts.month()))
      .join(format!("{:02}", ts.day()))
      .join(SCAN_FILE)
  }
}

#[async_trait]
impl ScanStore for DirectoryRecordStore {
  async fn record(&self, record: &ScanRecord) -> Result<(), PersistenceError> {
    let path = self.record_path(record);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
  }
}
