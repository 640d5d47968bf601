// 该文件是 PicHand 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 [0, 1] 之间, 实际为 {0}")]
  ThresholdOutOfRange(f32),
  #[error("无法解析置信度阈值: {0}")]
  ThresholdParse(String),
}

/// 取值范围 [0, 1] 的置信度阈值，越界值在构造时拒绝而非截断
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
  pub fn new(value: f32) -> Result<Self, ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
      Ok(Self(value))
    } else {
      Err(ConfigError::ThresholdOutOfRange(value))
    }
  }

  pub fn value(self) -> f32 {
    self.0
  }
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    Self(DEFAULT_CONFIDENCE_THRESHOLD)
  }
}

impl FromStr for ConfidenceThreshold {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value: f32 = s
      .trim()
      .parse()
      .map_err(|_| ConfigError::ThresholdParse(s.to_string()))?;
    Self::new(value)
  }
}

impl fmt::Display for ConfidenceThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// 单次检测运行的全部配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 待检测图像
  pub image_path: PathBuf,
  /// 模型/权重引用，例如 `replay:///data/hand.json` 或 `onnx:///models/card.onnx`
  pub model_reference: Url,
  /// 检测结果 JSON 的写入位置
  pub output_path: PathBuf,
  pub confidence_threshold: ConfidenceThreshold,
  /// 预览图输出，例如 `image:///tmp/preview.png`；为空时跳过
  pub preview: Option<Url>,
  /// 预览图是否绘制过滤前的全部检测结果
  pub preview_unfiltered: bool,
}

impl PipelineConfig {
  pub fn new(
    image_path: impl Into<PathBuf>,
    model_reference: Url,
    output_path: impl Into<PathBuf>,
  ) -> Self {
    Self {
      image_path: image_path.into(),
      model_reference,
      output_path: output_path.into(),
      confidence_threshold: ConfidenceThreshold::default(),
      preview: None,
      preview_unfiltered: false,
    }
  }

  pub fn with_threshold(mut self, threshold: ConfidenceThreshold) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_preview(mut self, preview: Url, unfiltered: bool) -> Self {
    self.preview = Some(preview);
    self.preview_unfiltered = unfiltered;
    self
  }
}
