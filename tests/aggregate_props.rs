// 该文件是 Huishou （回收分拣） 项目的一部分。
// tests/aggregate_props.rs - 检测结果归并的性质测试
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

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use huishou::{
  aggregate::{UNIDENTIFIED, reduce},
  labels::ClassMap,
  model::Detection,
};

fn waste_map() -> ClassMap {
  ClassMap::from_pairs([
    (0, "GLASS"),
    (1, "PAPER"),
    (2, "PLASTIC"),
    (3, "METAL"),
    (4, "CARDBOARD"),
  ])
}

fn detections() -> impl Strategy<Value = Vec<Detection>> {
  // 编号 5..7 不在类别表里，会归到 unknown
  prop::collection::vec(
    (0u32..7, 0.0f32..=1.0).prop_map(|(id, conf)| Detection::new(id, conf)),
    0..24,
  )
}

proptest! {
  #[test]
  fn topk_sorted_with_label_tiebreak(dets in detections()) {
    let result = reduce(&dets, &waste_map());
    for pair in result.topk.windows(2) {
      prop_assert!(
        pair[0].score > pair[1].score
          || (pair[0].score == pair[1].score && pair[0].label < pair[1].label),
        "顺序错误: {:?}",
        pair
      );
    }
  }

  #[test]
  fn labels_unique_and_max_reduced(dets in detections()) {
    let map = waste_map();
    let result = reduce(&dets, &map);

    let mut expected: HashMap<&str, f32> = HashMap::new();
    for det in &dets {
      let score = expected.entry(map.lookup(det.class_id)).or_insert(0.0);
      *score = score.max(det.confidence);
    }

    let labels: HashSet<&str> = result.topk.iter().map(|e| e.label.as_str()).collect();
    prop_assert_eq!(labels.len(), result.topk.len());
    prop_assert_eq!(result.topk.len(), expected.len());
    for entry in &result.topk {
      prop_assert_eq!(Some(&entry.score), expected.get(entry.label.as_str()));
    }
  }

  #[test]
  fn prediction_is_first_entry(dets in detections()) {
    let result = reduce(&dets, &waste_map());
    match result.topk.first() {
      Some(top) => {
        prop_assert_eq!(&result.prediction, &top.label);
        prop_assert_eq!(result.confidence, top.score);
      }
      None => {
        prop_assert!(dets.is_empty());
        prop_assert_eq!(result.prediction.as_str(), UNIDENTIFIED);
        prop_assert_eq!(result.confidence, 0.0);
      }
    }
  }

  #[test]
  fn input_order_does_not_matter(dets in detections(), seed in any::<u64>()) {
    let map = waste_map();
    let mut shuffled = dets.clone();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    prop_assert_eq!(reduce(&dets, &map), reduce(&shuffled, &map));
  }
}

#[test]
fn duplicate_boxes_keep_highest_score() {
  let dets = [
    Detection::new(2, 0.81),
    Detection::new(2, 0.60),
    Detection::new(0, 0.40),
  ];
  let result = reduce(&dets, &waste_map());
  assert_eq!(result.prediction, "PLASTIC");
  assert_eq!(result.confidence, 0.81);
  let topk: Vec<(&str, f32)> = result
    .topk
    .iter()
    .map(|e| (e.label.as_str(), e.score))
    .collect();
  assert_eq!(topk, vec![("PLASTIC", 0.81), ("GLASS", 0.40)]);
}

#[test]
fn no_detections_is_unidentified() {
  let result = reduce(&[], &waste_map());
  assert_eq!(result.prediction, UNIDENTIFIED);
  assert_eq!(result.confidence, 0.0);
  assert!(result.topk.is_empty());
}
