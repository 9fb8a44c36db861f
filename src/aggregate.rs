// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/aggregate.rs - 检测结果归并
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

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{labels::ClassMap, model::Detection};

/// 没有任何检测结果时的预测标签
pub const UNIDENTIFIED: &str = "unidentified";

/// 序列化为 `["PLASTIC", 0.81]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f32)", into = "(String, f32)")]
pub struct TopKEntry {
  pub label: String,
  pub score: f32,
}

impl TopKEntry {
  pub fn new(label: impl Into<String>, score: f32) -> Self {
    Self {
      label: label.into(),
      score,
    }
  }
}

impl From<(String, f32)> for TopKEntry {
  fn from((label, score): (String, f32)) -> Self {
    Self { label, score }
  }
}

impl From<TopKEntry> for (String, f32) {
  fn from(entry: TopKEntry) -> Self {
    (entry.label, entry.score)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
  pub topk: Vec<TopKEntry>,
  pub prediction: String,
  pub confidence: f32,
}

impl Reduction {
  pub fn unidentified() -> Self {
    Self {
      topk: Vec::new(),
      prediction: UNIDENTIFIED.to_string(),
      confidence: 0.0,
    }
  }

  pub fn is_identified(&self) -> bool {
    !self.topk.is_empty()
  }
}

/// 把一组检测框归并成按分数降序、每个标签一项的列表
///
/// 同一标签的多个框只保留最高置信度，不做平均。
/// 分数相同的标签按字典序升序排列，结果与输入顺序无关。
pub fn reduce(detections: &[Detection], class_map: &ClassMap) -> Reduction {
  let mut best: HashMap<&str, f32> = HashMap::new();

  for det in detections {
    if !det.confidence.is_finite() {
      debug!("忽略非法置信度: {:?}", det);
      continue;
    }
    // + 0.0 把 -0.0 归一为 0.0
    let confidence = det.confidence.clamp(0.0, 1.0) + 0.0;
    let label = class_map.lookup(det.class_id);
    best
      .entry(label)
      .and_modify(|score| *score = score.max(confidence))
      .or_insert(confidence);
  }

  let mut topk: Vec<TopKEntry> = best
    .into_iter()
    .map(|(label, score)| TopKEntry::new(label, score))
    .collect();
  topk.sort_by(|a, b| {
    b.score
      .total_cmp(&a.score)
      .then_with(|| a.label.cmp(&b.label))
  });

  match topk.first() {
    Some(top) => Reduction {
      prediction: top.label.clone(),
      confidence: top.score,
      topk,
    },
    None => Reduction::unidentified(),
  }
}
