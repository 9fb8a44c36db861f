// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/backend/dummy.rs - 随机占位后端
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

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::{
  backend::{BackendIdentity, BackendKind},
  labels::ClassMap,
  model::{DetectResult, Detection},
};

pub const DUMMY_VERSION: &str = "v0-dummy";
const DUMMY_CONFIDENCE: std::ops::RangeInclusive<f32> = 0.75..=0.98;
const DUMMY_RUNNERS_UP: usize = 4;

/// 没有训练好的模型时使用，按类别表均匀抽样生成检测结果
pub struct DummyBackend {
  class_ids: Vec<u32>,
  rng: Mutex<StdRng>,
  identity: BackendIdentity,
}

impl DummyBackend {
  pub fn new(class_map: &ClassMap) -> Self {
    Self::with_rng(class_map, StdRng::from_entropy())
  }

  pub fn with_seed(class_map: &ClassMap, seed: u64) -> Self {
    Self::with_rng(class_map, StdRng::seed_from_u64(seed))
  }

  fn with_rng(class_map: &ClassMap, rng: StdRng) -> Self {
    Self {
      class_ids: class_map.ids().collect(),
      rng: Mutex::new(rng),
      identity: BackendIdentity::new(BackendKind::Dummy, "dummy", DUMMY_VERSION),
    }
  }

  pub fn identity(&self) -> &BackendIdentity {
    &self.identity
  }

  pub fn detect(&self) -> DetectResult {
    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

    let Some(&top) = self.class_ids.choose(&mut *rng) else {
      return DetectResult::default();
    };
    let confidence = rng.gen_range(DUMMY_CONFIDENCE);
    let mut items = vec![Detection::new(top, confidence)];

    let mut others: Vec<u32> = self
      .class_ids
      .iter()
      .copied()
      .filter(|&id| id != top)
      .collect();
    others.shuffle(&mut *rng);

    // 其余类别分掉剩下的概率
    let mut remaining = 1.0 - confidence;
    for id in others.into_iter().take(DUMMY_RUNNERS_UP) {
      let score = rng.gen_range(0.0..=remaining);
      remaining -= score;
      items.push(Detection::new(id, score));
    }

    items.into()
  }
}
