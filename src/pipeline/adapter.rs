// 该文件是 PicHand 项目的一部分。
// src/pipeline/adapter.rs - 原始检测结果适配
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

use thiserror::Error;
use tracing::warn;

use crate::model::{LabelTable, RawDetection, RawLabel};

pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidDetectionEntry {
  #[error("坐标不是有限值: {0:?}")]
  NonFiniteBox([f32; 4]),
  #[error("置信度不是有限值: {0}")]
  NonFiniteConfidence(f32),
}

/// 轴对齐边界框，图像像素坐标，保证坐标均为有限值且 `xmin <= xmax`、`ymin <= ymax`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  xmin: f32,
  ymin: f32,
  xmax: f32,
  ymax: f32,
}

impl BoundingBox {
  /// 两个角点顺序颠倒时交换；任一坐标不是有限值时返回错误
  pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Result<Self, InvalidDetectionEntry> {
    let corners = [x0, y0, x1, y1];
    if corners.iter().any(|v| !v.is_finite()) {
      return Err(InvalidDetectionEntry::NonFiniteBox(corners));
    }
    Ok(Self {
      xmin: x0.min(x1),
      ymin: y0.min(y1),
      xmax: x0.max(x1),
      ymax: y0.max(y1),
    })
  }

  pub fn xmin(&self) -> f32 {
    self.xmin
  }

  pub fn ymin(&self) -> f32 {
    self.ymin
  }

  pub fn xmax(&self) -> f32 {
    self.xmax
  }

  pub fn ymax(&self) -> f32 {
    self.ymax
  }

  pub fn width(&self) -> f32 {
    self.xmax - self.xmin
  }

  pub fn height(&self) -> f32 {
    self.ymax - self.ymin
  }
}

/// 一个被识别出的目标实例，创建后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  label: String,
  confidence: f32,
  bbox: BoundingBox,
}

impl Detection {
  /// 空标签记为 `unknown`，置信度截断到 [0, 1]，非有限置信度返回错误
  pub fn new(
    label: impl Into<String>,
    confidence: f32,
    bbox: BoundingBox,
  ) -> Result<Self, InvalidDetectionEntry> {
    if !confidence.is_finite() {
      return Err(InvalidDetectionEntry::NonFiniteConfidence(confidence));
    }
    let label = label.into();
    Ok(Self {
      label: if label.is_empty() {
        UNKNOWN_LABEL.to_string()
      } else {
        label
      },
      confidence: confidence.clamp(0.0, 1.0),
      bbox,
    })
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn bbox(&self) -> &BoundingBox {
    &self.bbox
  }
}

/// 将一条检测器原生输出转换为 `Detection`，不产生副作用
pub fn adapt(raw: &RawDetection, labels: &LabelTable) -> Result<Detection, InvalidDetectionEntry> {
  let [x0, y0, x1, y1] = raw.bbox;
  let bbox = BoundingBox::from_corners(x0, y0, x1, y1)?;

  let label = match &raw.label {
    RawLabel::Name(name) => name.trim(),
    RawLabel::Index(index) => labels.resolve(*index).unwrap_or(UNKNOWN_LABEL),
  };

  Detection::new(label, raw.score, bbox)
}

/// 适配全部条目，跳过无效条目并返回跳过的数量
pub fn adapt_all(raws: &[RawDetection], labels: &LabelTable) -> (Vec<Detection>, usize) {
  let mut detections = Vec::with_capacity(raws.len());
  let mut skipped = 0;
  for (index, raw) in raws.iter().enumerate() {
    match adapt(raw, labels) {
      Ok(detection) => {
        if let RawLabel::Index(class) = &raw.label
          && labels.resolve(*class).is_none()
        {
          warn!("类别索引 {} 不在标签表中 (共 {} 类)", class, labels.len());
        }
        detections.push(detection);
      }
      Err(e) => {
        warn!("跳过第 {} 条检测结果: {}", index, e);
        skipped += 1;
      }
    }
  }
  (detections, skipped)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cards() -> LabelTable {
    LabelTable::new(["Ace", "King"])
  }

  #[test]
  fn named_entry_keeps_label_and_box() {
    let raw = RawDetection::named("Ace", 0.91, [10.0, 10.0, 50.0, 90.0]);
    let det = adapt(&raw, &cards()).unwrap();
    assert_eq!(det.label(), "Ace");
    assert_eq!(det.confidence(), 0.91);
    assert_eq!(
      *det.bbox(),
      BoundingBox::from_corners(10.0, 10.0, 50.0, 90.0).unwrap()
    );
  }

  #[test]
  fn index_is_resolved_through_label_table() {
    let raw = RawDetection::indexed(1, 0.5, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(adapt(&raw, &cards()).unwrap().label(), "King");
  }

  #[test]
  fn unresolvable_index_becomes_unknown() {
    let raw = RawDetection::indexed(7, 0.5, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(adapt(&raw, &cards()).unwrap().label(), UNKNOWN_LABEL);
  }

  #[test]
  fn empty_name_becomes_unknown() {
    let raw = RawDetection::named("  ", 0.5, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(adapt(&raw, &cards()).unwrap().label(), UNKNOWN_LABEL);
  }

  #[test]
  fn swapped_corners_are_normalized() {
    let raw = RawDetection::named("Ace", 0.5, [50.0, 90.0, 10.0, 10.0]);
    let bbox = *adapt(&raw, &cards()).unwrap().bbox();
    assert!(bbox.xmin() <= bbox.xmax() && bbox.ymin() <= bbox.ymax());
    assert_eq!((bbox.width(), bbox.height()), (40.0, 80.0));
  }

  #[test]
  fn confidence_is_clamped() {
    let raw = RawDetection::named("Ace", 1.2, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(adapt(&raw, &cards()).unwrap().confidence(), 1.0);
  }

  #[test]
  fn non_finite_values_are_rejected() {
    let bad_box = RawDetection::named("Ace", 0.5, [0.0, f32::NAN, 1.0, 1.0]);
    assert!(matches!(
      adapt(&bad_box, &cards()),
      Err(InvalidDetectionEntry::NonFiniteBox(_))
    ));
    let bad_score = RawDetection::named("Ace", f32::INFINITY, [0.0, 0.0, 1.0, 1.0]);
    assert!(matches!(
      adapt(&bad_score, &cards()),
      Err(InvalidDetectionEntry::NonFiniteConfidence(_))
    ));
  }

  #[test]
  fn adapt_all_skips_and_counts_invalid_entries() {
    let raws = vec![
      RawDetection::named("Ace", 0.9, [0.0, 0.0, 1.0, 1.0]),
      RawDetection::named("King", f32::NAN, [0.0, 0.0, 1.0, 1.0]),
      RawDetection::indexed(1, 0.4, [0.0, 0.0, f32::INFINITY, 1.0]),
      RawDetection::indexed(0, 0.3, [2.0, 2.0, 3.0, 3.0]),
    ];
    let (detections, skipped) = adapt_all(&raws, &cards());
    assert_eq!(skipped, 2);
    let labels: Vec<&str> = detections.iter().map(Detection::label).collect();
    assert_eq!(labels, vec!["Ace", "Ace"]);
  }

  #[test]
  fn swapped_corners_cannot_hide_nan() {
    // f32::min 会丢弃 NaN，必须在比较前检查
    assert!(matches!(
      BoundingBox::from_corners(f32::NAN, 0.0, 1.0, 1.0),
      Err(InvalidDetectionEntry::NonFiniteBox(_))
    ));
  }

  #[test]
  fn detection_rejects_non_finite_confidence() {
    let bbox = BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0).unwrap();
    assert!(matches!(
      Detection::new("Ace", f32::NAN, bbox),
      Err(InvalidDetectionEntry::NonFiniteConfidence(_))
    ));
    assert!(Detection::new("Ace", f32::NEG_INFINITY, bbox).is_err());
  }
}
