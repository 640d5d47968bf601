// 该文件是 PicHand 项目的一部分。
// src/pipeline.rs - 检测结果流水线
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

use std::{
  fmt::Display,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::PipelineConfig,
  model::Detector,
  output::{NoPreview, Render, SerializeError, record},
};

mod adapter;
pub use self::adapter::{
  BoundingBox, Detection, InvalidDetectionEntry, UNKNOWN_LABEL, adapt, adapt_all,
};

mod filter;
pub use self::filter::filter;

mod assemble;
pub use self::assemble::{Clock, DetectionResult, FixedClock, LocalClock, assemble};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("检测器不可用")]
  DetectorUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("序列化失败")]
  Serialization(#[from] SerializeError),
}

impl PipelineError {
  pub fn detector<E>(err: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    PipelineError::DetectorUnavailable(err.into())
  }
}

/// 一次运行的摘要
#[derive(Debug)]
pub struct RunReport {
  pub result: DetectionResult,
  /// 检测器返回的原始条目数
  pub raw_count: usize,
  /// 因坐标或置信度无效而跳过的条目数
  pub skipped: usize,
  /// 低于阈值被过滤的条目数
  pub below_threshold: usize,
  pub output_path: PathBuf,
  /// 预览失败不影响结果保存，仅在此记录
  pub preview_error: Option<String>,
}

pub struct Pipeline {
  config: PipelineConfig,
  clock: Box<dyn Clock>,
}

impl Pipeline {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      clock: Box::new(LocalClock),
    }
  }

  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Box::new(clock);
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 按配置运行，配置了 `preview` 时同时生成预览图
  pub fn run<D>(&self, detector: &D) -> Result<RunReport, PipelineError>
  where
    D: Detector,
    D::Error: std::error::Error + Send + Sync + 'static,
  {
    #[cfg(feature = "preview")]
    if let Some(url) = &self.config.preview {
      use crate::{FromUrl, output::SaveImageFileOutput};

      return match SaveImageFileOutput::from_url(url) {
        Ok(output) => self.run_with_preview(detector, Some(&output)),
        Err(e) => {
          let mut report = self.run_with_preview(detector, None::<&NoPreview>)?;
          warn!("无法创建预览输出 {}: {}", url, e);
          report.preview_error = Some(e.to_string());
          Ok(report)
        }
      };
    }

    #[cfg(not(feature = "preview"))]
    if self.config.preview.is_some() {
      warn!("未启用 preview 特性，跳过预览图");
    }

    self.run_with_preview(detector, None::<&NoPreview>)
  }

  pub fn run_with_preview<D, R>(
    &self,
    detector: &D,
    preview: Option<&R>,
  ) -> Result<RunReport, PipelineError>
  where
    D: Detector,
    D::Error: std::error::Error + Send + Sync + 'static,
    R: Render<Path, [Detection]>,
    R::Error: Display,
  {
    let config = &self.config;
    let threshold = config.confidence_threshold;

    info!("开始检测: {}", config.image_path.display());
    let now = std::time::Instant::now();
    let raws = detector
      .detect(&config.image_path, Some(threshold.value()))
      .map_err(|e| {
        error!("检测失败: {}", e);
        PipelineError::detector(e)
      })?;
    info!("检测完成，耗时: {:.2?}, 原始条目数: {}", now.elapsed(), raws.len());

    let raw_count = raws.len();
    let (adapted, skipped) = adapt_all(&raws, detector.labels());
    if skipped > 0 {
      warn!("共跳过 {} 条无效检测结果", skipped);
    }

    let unfiltered = (config.preview_unfiltered && preview.is_some()).then(|| adapted.clone());
    let kept = filter(adapted, threshold);
    let below_threshold = raw_count - skipped - kept.len();

    let result = assemble(&config.image_path, kept, &*self.clock);
    log_summary(&result);

    record::write(&result, &config.output_path).map_err(|e| {
      error!("保存检测结果失败: {}", e);
      PipelineError::from(e)
    })?;

    let mut preview_error = None;
    if let Some(output) = preview {
      let detections = unfiltered.as_deref().unwrap_or(result.detections());
      if let Err(e) = output.render_result(config.image_path.as_path(), detections) {
        warn!("预览图生成失败: {}", e);
        preview_error = Some(e.to_string());
      }
    }

    Ok(RunReport {
      result,
      raw_count,
      skipped,
      below_threshold,
      output_path: config.output_path.clone(),
      preview_error,
    })
  }
}

fn log_summary(result: &DetectionResult) {
  if result.is_empty() {
    warn!("{}: 未检测到任何目标", result.image_name());
    return;
  }

  info!(
    "{}: 检测到 {} 个目标",
    result.image_name(),
    result.detections().len()
  );
  for det in result.detections() {
    let bbox = det.bbox();
    info!(
      "  - {}: {:.2}% at ({:.0}, {:.0}) - ({:.0}, {:.0})",
      det.label(),
      det.confidence() * 100.0,
      bbox.xmin(),
      bbox.ymin(),
      bbox.xmax(),
      bbox.ymax()
    );
  }
}
