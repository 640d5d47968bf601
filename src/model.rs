// 该文件是 PicHand 项目的一部分。
// src/model.rs - 检测模型接口
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod labels;
pub use self::labels::{COCO_CLASSES, LabelTable};

mod replay;
pub use self::replay::{ReplayDetector, ReplayError};

#[cfg(feature = "model_onnx")]
mod onnx_yolo;
#[cfg(feature = "model_onnx")]
pub use self::onnx_yolo::{OnnxError, OnnxYoloDetector};

/// 检测器：给定图像路径，返回未经过滤的原始检测结果
pub trait Detector {
  type Error;

  /// `confidence_floor` 为检测器自身可选的置信度下限，调用方仍需自行过滤
  fn detect(
    &self,
    image_path: &Path,
    confidence_floor: Option<f32>,
  ) -> Result<Vec<RawDetection>, Self::Error>;

  /// 类别索引到名称的映射表
  fn labels(&self) -> &LabelTable;
}

/// 检测器原生输出的类别标识
#[derive(Debug, Clone, PartialEq)]
pub enum RawLabel {
  Name(String),
  Index(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub label: RawLabel,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，图像像素坐标
}

impl RawDetection {
  pub fn named(name: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: RawLabel::Name(name.into()),
      score,
      bbox,
    }
  }

  pub fn indexed(class_id: u32, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: RawLabel::Index(class_id),
      score,
      bbox,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放检测器错误: {0}")]
  ReplayError(#[from] ReplayError),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 检测器错误: {0}")]
  OnnxError(#[from] OnnxError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum ModelWrapper {
  Replay(ReplayDetector),
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxYoloDetector),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayDetector::SCHEME => Ok(ModelWrapper::Replay(ReplayDetector::from_url(url)?)),
      #[cfg(feature = "model_onnx")]
      OnnxYoloDetector::SCHEME => Ok(ModelWrapper::Onnx(OnnxYoloDetector::from_url(url)?)),
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Detector for ModelWrapper {
  type Error = ModelError;

  fn detect(
    &self,
    image_path: &Path,
    confidence_floor: Option<f32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    match self {
      ModelWrapper::Replay(detector) => detector
        .detect(image_path, confidence_floor)
        .map_err(ModelError::from),
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(detector) => detector
        .detect(image_path, confidence_floor)
        .map_err(ModelError::from),
    }
  }

  fn labels(&self) -> &LabelTable {
    match self {
      ModelWrapper::Replay(detector) => detector.labels(),
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(detector) => detector.labels(),
    }
  }
}
