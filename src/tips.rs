// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/tips.rs - 分类投放建议
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

pub const DEFAULT_TIP: &str = "Sorting instructions not found. Check local guidelines.";
pub const UNIDENTIFIED_TIP: &str =
  "Could not identify the item. Please ensure the item is clearly visible.";

const MATERIAL_TIPS: [(&str, &str); 6] = [
  (
    "BIODEGRADABLE",
    "Place in a compost bin or designated organics waste container.",
  ),
  ("CARDBOARD", "Break down boxes flat before recycling."),
  (
    "GLASS",
    "Empty, rinse, and place in the glass bin. Labels are okay.",
  ),
  (
    "METAL",
    "Ensure cans are clean and dry. No sharp scrap metal.",
  ),
  (
    "PAPER",
    "Keep dry and flatten before placing in the paper bin.",
  ),
  (
    "PLASTIC",
    "Empty and rinse container. If it's a bottle/jug, put the cap back on.",
  ),
];

/// 标签到投放建议的静态映射，标签按大写匹配
#[derive(Debug, Clone)]
pub struct TipAdvisor {
  tips: HashMap<String, String>,
  fallback: String,
}

impl Default for TipAdvisor {
  fn default() -> Self {
    Self {
      tips: MATERIAL_TIPS
        .iter()
        .map(|(label, tip)| (label.to_string(), tip.to_string()))
        .collect(),
      fallback: DEFAULT_TIP.to_string(),
    }
  }
}

impl TipAdvisor {
  pub fn with_tip(mut self, label: &str, tip: impl Into<String>) -> Self {
    self.tips.insert(label.to_ascii_uppercase(), tip.into());
    self
  }

  pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
    self.fallback = fallback.into();
    self
  }

  pub fn lookup(&self, label: &str) -> &str {
    self
      .tips
      .get(&label.to_ascii_uppercase())
      .map(String::as_str)
      .unwrap_or(&self.fallback)
  }
}
