// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/annotate.rs - 检测结果标注
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

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::model::Detection;

const BOX_THICKNESS: i32 = 2;
const TAG_SIZE: u32 = 12;
const PALETTE: [[u8; 3]; 6] = [
  [0, 0, 255],
  [0, 160, 0],
  [230, 120, 0],
  [200, 0, 200],
  [0, 170, 200],
  [200, 30, 30],
];

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
}

/// 同一类别始终使用同一颜色
fn class_color(class_id: u32) -> Rgb<u8> {
  Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// bbox 为归一化坐标 [x_min, y_min, x_max, y_max]，超出图像的部分被裁掉
fn pixel_rect(image: &RgbImage, bbox: &[f32; 4]) -> Option<Rect> {
  let (w, h) = (image.width() as f32, image.height() as f32);
  let x_min = (bbox[0] * w).floor().clamp(0.0, w - 1.0) as i32;
  let y_min = (bbox[1] * h).floor().clamp(0.0, h - 1.0) as i32;
  let x_max = (bbox[2] * w).ceil().clamp(0.0, w - 1.0) as i32;
  let y_max = (bbox[3] * h).ceil().clamp(0.0, h - 1.0) as i32;

  if x_min >= x_max || y_min >= y_max {
    return None;
  }
  Some(Rect::at(x_min, y_min).of_size((x_max - x_min) as u32, (y_max - y_min) as u32))
}

pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) -> usize {
  let mut drawn = 0;
  for det in detections {
    let Some(rect) = det.bbox.as_ref().and_then(|bbox| pixel_rect(image, bbox)) else {
      continue;
    };
    let color = class_color(det.class_id);

    for t in 0..BOX_THICKNESS {
      let width = rect.width().saturating_sub(2 * t as u32);
      let height = rect.height().saturating_sub(2 * t as u32);
      if width == 0 || height == 0 {
        break;
      }
      draw_hollow_rect_mut(
        image,
        Rect::at(rect.left() + t, rect.top() + t).of_size(width, height),
        color,
      );
    }

    // 左上角的色块标出类别
    let tag = Rect::at(rect.left(), rect.top())
      .of_size(TAG_SIZE.min(rect.width()), TAG_SIZE.min(rect.height()));
    draw_filled_rect_mut(image, tag, color);
    drawn += 1;
  }
  drawn
}

/// 在原图上画出检测框，返回 JPEG 的 base64；没有可画的框时返回 `None`
pub fn annotate_base64(
  image: &[u8],
  detections: &[Detection],
) -> Result<Option<String>, AnnotateError> {
  if detections.iter().all(|d| d.bbox.is_none()) {
    return Ok(None);
  }

  let mut canvas = image::load_from_memory(image)?.to_rgb8();
  if draw_detections(&mut canvas, detections) == 0 {
    return Ok(None);
  }

  let mut encoded = Cursor::new(Vec::new());
  canvas.write_to(&mut encoded, ImageFormat::Jpeg)?;
  Ok(Some(STANDARD.encode(encoded.into_inner())))
}
