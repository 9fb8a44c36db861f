// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/labels.rs - 类别表与模型元数据
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

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ClassMapFallback;

/// 未知类别编号对应的标签
pub const UNKNOWN_LABEL: &str = "unknown";

const BUILTIN_LABELS: [&str; 6] = ["glass", "paper", "cardboard", "plastic", "metal", "trash"];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件不存在: {0}")]
  Missing(PathBuf),
  #[error("读取配置文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("配置文件 {path} 格式错误: {source}")]
  Malformed {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("类别编号无效: {0:?}")]
  InvalidIndex(String),
  #[error("类别表为空: {0}")]
  Empty(PathBuf),
  #[error("配置无效: {0}")]
  Invalid(String),
}

fn read_config_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
  match std::fs::read(path) {
    Ok(data) => Ok(data),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      Err(ConfigError::Missing(path.to_path_buf()))
    }
    Err(source) => Err(ConfigError::Io {
      path: path.to_path_buf(),
      source,
    }),
  }
}

#[derive(Deserialize)]
struct ClassMapFile {
  index_to_name: BTreeMap<String, String>,
}

/// 类别编号到标签名的映射，加载后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
  labels: BTreeMap<u32, String>,
}

impl ClassMap {
  /// 从 `class_map.json` 加载，格式为 `{"index_to_name": {"0": "glass", ...}}`
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    info!("加载类别表: {}", path.display());
    let data = read_config_file(path)?;
    let file: ClassMapFile =
      serde_json::from_slice(&data).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
      })?;

    let mut labels = BTreeMap::new();
    for (key, name) in file.index_to_name {
      let index = key
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidIndex(key.clone()))?;
      labels.insert(index, name);
    }

    if labels.is_empty() {
      return Err(ConfigError::Empty(path.to_path_buf()));
    }

    debug!("类别表: {:?}", labels);
    info!("类别表加载完成，共 {} 个类别", labels.len());
    Ok(ClassMap { labels })
  }

  /// 按配置的策略加载：`Abort` 时把错误交给调用方，`Builtin` 时退回内置类别
  pub fn load_with_fallback(path: &Path, fallback: ClassMapFallback) -> Result<Self, ConfigError> {
    match (Self::load(path), fallback) {
      (Ok(map), _) => Ok(map),
      (Err(e), ClassMapFallback::Abort) => Err(e),
      (Err(e), ClassMapFallback::Builtin) => {
        warn!("类别表不可用 ({})，改用内置类别", e);
        Ok(Self::builtin())
      }
    }
  }

  pub fn builtin() -> Self {
    Self::from_labels(BUILTIN_LABELS)
  }

  /// 按顺序编号构造类别表
  pub fn from_labels<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels = labels
      .into_iter()
      .enumerate()
      .map(|(i, name)| (i as u32, name.into()))
      .collect();
    ClassMap { labels }
  }

  pub fn from_pairs<I, S>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (u32, S)>,
    S: Into<String>,
  {
    let labels = pairs
      .into_iter()
      .map(|(i, name)| (i, name.into()))
      .collect();
    ClassMap { labels }
  }

  /// 未知编号返回 [`UNKNOWN_LABEL`]，不报错
  pub fn lookup(&self, class_id: u32) -> &str {
    self
      .labels
      .get(&class_id)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  /// 标签名反查编号，大小写不敏感
  pub fn index_of(&self, label: &str) -> Option<u32> {
    self
      .labels
      .iter()
      .find(|(_, name)| name.eq_ignore_ascii_case(label))
      .map(|(&index, _)| index)
  }

  pub fn labels(&self) -> impl Iterator<Item = &str> {
    self.labels.values().map(String::as_str)
  }

  pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
    self.labels.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 最大编号 + 1，即检测头需要覆盖的类别数
  pub fn class_count(&self) -> usize {
    self
      .labels
      .keys()
      .next_back()
      .map(|&max| max as usize + 1)
      .unwrap_or(0)
  }
}

#[derive(Deserialize)]
struct ModelMetaFile {
  version: Option<String>,
}

/// `model_meta.json` 中的模型元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
  pub version: String,
}

impl ModelMeta {
  /// 文件缺失时使用 `default_version`，文件存在但格式错误时返回错误
  pub fn load(path: &Path, default_version: &str) -> Result<Self, ConfigError> {
    let data = match read_config_file(path) {
      Ok(data) => data,
      Err(ConfigError::Missing(path)) => {
        warn!(
          "模型元数据不存在: {}，使用默认版本 {}",
          path.display(),
          default_version
        );
        return Ok(ModelMeta {
          version: default_version.to_string(),
        });
      }
      Err(e) => return Err(e),
    };

    let file: ModelMetaFile =
      serde_json::from_slice(&data).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
      })?;

    let version = file
      .version
      .filter(|v| !v.trim().is_empty())
      .unwrap_or_else(|| default_version.to_string());
    info!("模型版本: {}", version);
    Ok(ModelMeta { version })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  #[test]
  fn loads_index_to_name_mapping() {
    let file = write_temp(r#"{"index_to_name": {"0": "glass", "1": "paper", "5": "trash"}}"#);
    let map = ClassMap::load(file.path()).unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(map.lookup(0), "glass");
    assert_eq!(map.lookup(5), "trash");
    assert_eq!(map.class_count(), 6);
  }

  #[test]
  fn unknown_id_maps_to_sentinel() {
    let map = ClassMap::from_labels(["glass"]);
    assert_eq!(map.lookup(42), UNKNOWN_LABEL);
  }

  #[test]
  fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClassMap::load(&dir.path().join("class_map.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)));
  }

  #[test]
  fn malformed_file_is_config_error() {
    let file = write_temp(r#"{"names": ["glass"]}"#);
    assert!(matches!(
      ClassMap::load(file.path()),
      Err(ConfigError::Malformed { .. })
    ));

    let file = write_temp(r#"{"index_to_name": {"zero": "glass"}}"#);
    assert!(matches!(
      ClassMap::load(file.path()),
      Err(ConfigError::InvalidIndex(_))
    ));

    let file = write_temp(r#"{"index_to_name": {}}"#);
    assert!(matches!(
      ClassMap::load(file.path()),
      Err(ConfigError::Empty(_))
    ));
  }

  #[test]
  fn fallback_policy_is_explicit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class_map.json");
    assert!(ClassMap::load_with_fallback(&path, ClassMapFallback::Abort).is_err());

    let map = ClassMap::load_with_fallback(&path, ClassMapFallback::Builtin).unwrap();
    assert_eq!(map, ClassMap::builtin());
    assert_eq!(map.lookup(3), "plastic");
  }

  #[test]
  fn index_of_ignores_case() {
    let map = ClassMap::from_pairs([(0, "glass"), (2, "plastic")]);
    assert_eq!(map.index_of("PLASTIC"), Some(2));
    assert_eq!(map.index_of("metal"), None);
  }

  #[test]
  fn model_meta_defaults_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let meta = ModelMeta::load(&dir.path().join("model_meta.json"), "v1-yolo-default").unwrap();
    assert_eq!(meta.version, "v1-yolo-default");

    let file = write_temp(r#"{"version": "v3-trashnet"}"#);
    let meta = ModelMeta::load(file.path(), "v1-yolo-default").unwrap();
    assert_eq!(meta.version, "v3-trashnet");

    let file = write_temp("not json");
    assert!(ModelMeta::load(file.path(), "v1-yolo-default").is_err());
  }
}
