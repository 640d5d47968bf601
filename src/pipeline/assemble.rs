// 该文件是 PicHand 项目的一部分。
// src/pipeline/assemble.rs - 检测结果组装
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

use chrono::{Local, NaiveDateTime, SubsecRound};

use crate::pipeline::Detection;

pub trait Clock {
  fn now(&self) -> NaiveDateTime;
}

/// 本地时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
  fn now(&self) -> NaiveDateTime {
    Local::now().naive_local()
  }
}

/// 固定时间，用于可复现的运行
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
  fn now(&self) -> NaiveDateTime {
    self.0
  }
}

/// 一张图像的完整检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
  image_name: String,
  detections: Vec<Detection>,
  generated_at: NaiveDateTime,
}

impl DetectionResult {
  pub(crate) fn from_parts(
    image_name: String,
    detections: Vec<Detection>,
    generated_at: NaiveDateTime,
  ) -> Self {
    Self {
      image_name,
      detections,
      generated_at,
    }
  }

  pub fn image_name(&self) -> &str {
    &self.image_name
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn generated_at(&self) -> NaiveDateTime {
    self.generated_at
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

/// 打包过滤后的检测结果，时钟只读取一次并截断到秒
pub fn assemble<C: Clock + ?Sized>(
  image_path: &Path,
  detections: Vec<Detection>,
  clock: &C,
) -> DetectionResult {
  let image_name = image_path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| image_path.to_string_lossy().into_owned());

  DetectionResult {
    image_name,
    detections,
    generated_at: clock.now().trunc_subsecs(0),
  }
}
