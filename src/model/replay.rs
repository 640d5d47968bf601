// 该文件是 PicHand 项目的一部分。
// src/model/replay.rs - 回放已导出的检测器原始输出
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detector, LabelTable, RawDetection, RawLabel},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取原始检测文件 {0}: {1}")]
  ReadError(PathBuf, std::io::Error),
  #[error("原始检测文件格式错误 {0}: {1}")]
  FormatError(PathBuf, serde_json::Error),
  #[error("无法读取图像 {0}: {1}")]
  ImageUnreadable(PathBuf, std::io::Error),
  #[error("图像路径不是文件: {0}")]
  ImageNotAFile(PathBuf),
}

/// 与 `results.pandas().xyxy[0]` 导出的行一致
#[derive(Debug, Deserialize)]
struct ReplayRow {
  xmin: f32,
  ymin: f32,
  xmax: f32,
  ymax: f32,
  confidence: f32,
  #[serde(default)]
  name: Option<String>,
  #[serde(default, rename = "class")]
  class_id: Option<u32>,
}

impl From<ReplayRow> for RawDetection {
  fn from(row: ReplayRow) -> Self {
    let label = match (row.name, row.class_id) {
      (Some(name), _) if !name.is_empty() => RawLabel::Name(name),
      (_, Some(class_id)) => RawLabel::Index(class_id),
      (name, None) => RawLabel::Name(name.unwrap_or_default()),
    };
    RawDetection {
      label,
      score: row.confidence,
      bbox: [row.xmin, row.ymin, row.xmax, row.ymax],
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayFile {
  Document {
    #[serde(default)]
    labels: Vec<String>,
    detections: Vec<ReplayRow>,
  },
  Rows(Vec<ReplayRow>),
}

/// 回放检测器：读取一次模型运行导出的原始检测结果
pub struct ReplayDetector {
  source: PathBuf,
  labels: LabelTable,
  rows: Vec<RawDetection>,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayError::SchemeMismatch);
    }
    Self::load(Path::new(url.path()))
  }
}

impl ReplayDetector {
  pub fn load(source: &Path) -> Result<Self, ReplayError> {
    info!("加载原始检测文件: {}", source.display());
    let data =
      std::fs::read(source).map_err(|e| ReplayError::ReadError(source.to_path_buf(), e))?;
    Self::from_slice(source, &data)
  }

  pub fn from_slice(source: &Path, data: &[u8]) -> Result<Self, ReplayError> {
    let file: ReplayFile = serde_json::from_slice(data)
      .map_err(|e| ReplayError::FormatError(source.to_path_buf(), e))?;
    let (labels, rows) = match file {
      ReplayFile::Document { labels, detections } => (labels, detections),
      ReplayFile::Rows(rows) => (Vec::new(), rows),
    };
    debug!("原始检测条目数: {}, 类别数: {}", rows.len(), labels.len());

    Ok(Self {
      source: source.to_path_buf(),
      labels: LabelTable::new(labels),
      rows: rows.into_iter().map(RawDetection::from).collect(),
    })
  }

  pub fn with_labels(mut self, labels: LabelTable) -> Self {
    self.labels = labels;
    self
  }

  pub fn source(&self) -> &Path {
    &self.source
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayError;

  fn detect(
    &self,
    image_path: &Path,
    confidence_floor: Option<f32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    let metadata = std::fs::metadata(image_path)
      .map_err(|e| ReplayError::ImageUnreadable(image_path.to_path_buf(), e))?;
    if !metadata.is_file() {
      return Err(ReplayError::ImageNotAFile(image_path.to_path_buf()));
    }

    let rows: Vec<RawDetection> = match confidence_floor {
      // NaN 分数不与下限比较，交给适配器拒绝
      Some(floor) => self
        .rows
        .iter()
        .filter(|row| row.score.is_nan() || row.score >= floor)
        .cloned()
        .collect(),
      None => self.rows.clone(),
    };
    debug!(
      "回放 {} 条检测结果 (共 {} 条)",
      rows.len(),
      self.rows.len()
    );
    Ok(rows)
  }

  fn labels(&self) -> &LabelTable {
    &self.labels
  }
}
