// 该文件是 PicHand 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::{debug, warn};

use crate::{output::PreviewError, pipeline::Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 20;

/// 未指定字体时依次尝试的系统字体
const FONT_CANDIDATES: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let font = FONT_CANDIDATES
      .iter()
      .find_map(|path| load_font(Path::new(path)).ok());
    if font.is_none() {
      warn!("未找到可用的系统字体，预览图将不绘制标签文字");
    }
    Self::with_font(font)
  }
}

pub fn load_font(path: &Path) -> Result<FontArc, PreviewError> {
  let data =
    std::fs::read(path).map_err(|e| PreviewError::FontReadError(path.to_path_buf(), e))?;
  let font =
    FontArc::try_from_vec(data).map_err(|e| PreviewError::InvalidFont(path.to_path_buf(), e))?;
  debug!("加载字体: {}", path.display());
  Ok(font)
}

impl Draw {
  pub fn with_font(font: Option<FontArc>) -> Self {
    // 按类别分配颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      colors,
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color_for(&self, label: &str) -> Rgb<u8> {
    let hash = label
      .bytes()
      .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    self.colors[hash % self.colors.len()]
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_bbox_with_label(image, detection, self.color_for(detection.label()));
    }
  }

  // 边框外沿恰好落在 (xmin, ymin) - (xmax, ymax)，向内加粗
  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let bbox = detection.bbox();
    let x_min = (bbox.xmin().round() as i32).clamp(0, w - 1);
    let y_min = (bbox.ymin().round() as i32).clamp(0, h - 1);
    let x_max = (bbox.xmax().round() as i32).clamp(0, w - 1);
    let y_max = (bbox.ymax().round() as i32).clamp(0, h - 1);

    for thickness in 0..BOX_THICKNESS {
      let (x0, y0) = (x_min + thickness, y_min + thickness);
      let (x1, y1) = (x_max - thickness, y_max - thickness);
      if x0 > x1 || y0 > y1 {
        break;
      }
      let rect = Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    // 创建标签文本
    let label = format!("{} {:.2}", detection.label(), detection.confidence());
    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([255u8, 255u8, 255u8]); // 白色文本

    // 估算文本大小（粗略估计）
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景放在边框上方
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipeline::BoundingBox;

  const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

  fn ace() -> Detection {
    Detection::new("Ace", 0.91, BoundingBox::from_corners(10.0, 10.0, 50.0, 90.0).unwrap()).unwrap()
  }

  #[test]
  fn box_corners_land_on_bbox_corners() {
    let draw = Draw::with_font(None);
    let mut image = RgbImage::from_pixel(120, 100, BACKGROUND);
    draw.draw_detections_on_image(&mut image, &[ace()]);

    let color = draw.color_for("Ace");
    for (x, y) in [(10, 10), (50, 10), (10, 90), (50, 90), (11, 11), (49, 89)] {
      assert_eq!(*image.get_pixel(x, y), color, "pixel ({x}, {y})");
    }
    // 边框外与框内部保持不变
    assert_eq!(*image.get_pixel(9, 9), BACKGROUND);
    assert_eq!(*image.get_pixel(51, 91), BACKGROUND);
    assert_eq!(*image.get_pixel(30, 50), BACKGROUND);
  }

  #[test]
  fn out_of_image_boxes_are_clamped() {
    let draw = Draw::with_font(None);
    let mut image = RgbImage::from_pixel(20, 20, BACKGROUND);
    let det = Detection::new(
      "King",
      0.5,
      BoundingBox::from_corners(-5.0, -5.0, 40.0, 40.0).unwrap(),
    )
    .unwrap();
    draw.draw_detections_on_image(&mut image, &[det]);
    assert_eq!(*image.get_pixel(0, 0), draw.color_for("King"));
    assert_eq!(*image.get_pixel(19, 19), draw.color_for("King"));
  }

  #[test]
  fn degenerate_box_is_a_single_pixel() {
    let draw = Draw::with_font(None);
    let mut image = RgbImage::from_pixel(10, 10, BACKGROUND);
    let det = Detection::new(
      "Two",
      0.5,
      BoundingBox::from_corners(4.0, 4.0, 4.0, 4.0).unwrap(),
    )
    .unwrap();
    draw.draw_detections_on_image(&mut image, &[det]);
    assert_eq!(*image.get_pixel(4, 4), draw.color_for("Two"));
    assert_eq!(*image.get_pixel(5, 5), BACKGROUND);
  }

  #[test]
  fn colors_are_stable_per_label() {
    let draw = Draw::with_font(None);
    assert_eq!(draw.color_for("Ace"), draw.color_for("Ace"));
  }

  #[test]
  fn font_errors_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.ttf");
    assert!(matches!(
      load_font(&missing),
      Err(PreviewError::FontReadError(_, _))
    ));

    let garbage = dir.path().join("garbage.ttf");
    std::fs::write(&garbage, b"not a font").unwrap();
    assert!(matches!(
      load_font(&garbage),
      Err(PreviewError::InvalidFont(_, _))
    ));
  }
}
