// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 检测器
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
use std::sync::Mutex;

use image::imageops::FilterType;
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detection, Detector, EngineError},
  url_file_path,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_INPUT_W: u32 = 640;
const YOLO26_INPUT_H: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

impl From<rknpu::Error> for EngineError {
  fn from(err: rknpu::Error) -> Self {
    EngineError::Inference(err.to_string())
  }
}

/// RKNN 上下文不可重入，所有推理经由互斥锁串行
pub struct Yolo26 {
  context: Mutex<Context>,
  confidence: f32,
  class_count: usize,
}

pub struct Yolo26Builder {
  model_path: PathBuf,
  flags: InitFlags,
  confidence: f32,
  class_count: usize,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::UnsupportedScheme(url.scheme().to_string()));
    }

    Ok(Yolo26Builder {
      model_path: url_file_path(url),
      flags: InitFlags::default(),
      confidence: 0.25,
      class_count: 0,
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  /// 期望的类别数，0 表示按输出张量推断
  pub fn class_count(mut self, class_count: usize) -> Self {
    self.class_count = class_count;
    self
  }

  pub fn build(self) -> Result<Yolo26, EngineError> {
    info!("加载模型文件: {}", self.model_path.display());
    if !self.model_path.exists() {
      return Err(EngineError::ModelMissing(self.model_path));
    }
    let model_data =
      std::fs::read(&self.model_path).map_err(|e| EngineError::Load(e.to_string()))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context =
      Context::new(&model_data, self.flags).map_err(|e| EngineError::Load(e.to_string()))?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| EngineError::Load(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| EngineError::Load(format!("无法获取输出数量: {}", e)))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      error!(
        "模型输入/输出数量不符: 期望 {}/{}, 实际 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(EngineError::Load(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }

    info!("模型加载完成");
    Ok(Yolo26 {
      context: Mutex::new(context),
      confidence: self.confidence,
      class_count: self.class_count,
    })
  }
}

/// 解码并缩放到模型输入尺寸，输出 NHWC 排列的 RGB 字节
fn preprocess(image: &[u8]) -> Result<Vec<u8>, EngineError> {
  let decoded = image::load_from_memory(image).map_err(|e| EngineError::Decode(e.to_string()))?;
  let resized = image::imageops::resize(
    &decoded.to_rgb8(),
    YOLO26_INPUT_W,
    YOLO26_INPUT_H,
    FilterType::Triangle,
  );
  Ok(resized.into_raw())
}

/// 根据张量大小区分回归和分类输出，返回 (reg, cls, 类别数)
fn split_reg_cls<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  spatial: usize,
) -> Option<(&'a [f32], &'a [f32], usize)> {
  let reg_expected = 4 * spatial;
  let classes = |len: usize| (len % spatial == 0 && len > 0).then_some(len / spatial);

  if tensor1.len() == reg_expected {
    classes(tensor2.len()).map(|n| (tensor1, tensor2, n))
  } else if tensor2.len() == reg_expected {
    classes(tensor1.len()).map(|n| (tensor2, tensor1, n))
  } else {
    None
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

impl Yolo26 {
  fn decode_head(
    &self,
    reg: &[f32],
    cls: &[f32],
    classes: usize,
    (map_h, map_w): (usize, usize),
    stride: f32,
    items: &mut Vec<Detection>,
  ) {
    let spatial = map_h * map_w;
    let (in_w, in_h) = (YOLO26_INPUT_W as f32, YOLO26_INPUT_H as f32);

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;

        let (class_id, logit) = (0..classes)
          .map(|c| (c, cls[c * spatial + idx]))
          .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        let score = sigmoid(logit);
        if score <= self.confidence {
          continue;
        }

        let grid_x = w as f32 + 0.5;
        let grid_y = h as f32 + 0.5;
        let x_min = ((grid_x - reg[idx]) * stride).clamp(0.0, in_w);
        let y_min = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, in_h);
        let x_max = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, in_w);
        let y_max = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, in_h);

        items.push(
          Detection::new(class_id as u32, score)
            .with_bbox([x_min / in_w, y_min / in_h, x_max / in_w, y_max / in_h]),
        );
      }
    }
  }

  fn postprocess(&self, output: &rknpu::Output) -> Vec<Detection> {
    let mut items = Vec::new();

    for (head_idx, (&size, stride)) in YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate() {
      let spatial = size.0 * size.1;
      let (first, second) = match (output.get_f32(head_idx * 2), output.get_f32(head_idx * 2 + 1)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
          error!("获取检测头 {} 的输出失败: {}", head_idx, e);
          continue;
        }
      };

      let Some((reg, cls, classes)) = split_reg_cls(first, second, spatial) else {
        error!(
          "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 空间大小: {}",
          head_idx,
          first.len(),
          second.len(),
          spatial
        );
        continue;
      };
      if self.class_count > 0 && classes != self.class_count {
        warn!(
          "检测头 {}: 模型类别数 {} 与类别表 {} 不一致",
          head_idx, classes, self.class_count
        );
      }

      self.decode_head(reg, cls, classes, size, stride, &mut items);
    }

    debug!("检测到 {} 个物体", items.len());
    items
  }
}

impl Detector for Yolo26 {
  fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, EngineError> {
    let input = preprocess(image)?;

    let context = self
      .context
      .lock()
      .map_err(|_| EngineError::Inference("推理上下文已损坏".to_string()))?;
    debug!("设置模型输入");
    context.set_input(0, &input, TensorFormat::NHWC, TensorType::UInt8)?;
    debug!("执行模型推理");
    context.run()?;
    let output = context.get_outputs()?;

    Ok(self.postprocess(&output))
  }

  fn engine(&self) -> &str {
    Yolo26Builder::SCHEME
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn split_detects_swapped_outputs() {
    let reg = vec![0.0; 4 * 4];
    let cls = vec![0.0; 6 * 4];
    let (r, c, n) = split_reg_cls(&cls, &reg, 4).unwrap();
    assert_eq!(r.len(), 16);
    assert_eq!(c.len(), 24);
    assert_eq!(n, 6);
    assert!(split_reg_cls(&[0.0; 3], &[0.0; 5], 4).is_none());
  }
}
