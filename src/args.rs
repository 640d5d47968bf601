// 该文件是 PicHand 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use url::Url;

use pichand::config::{ConfidenceThreshold, PipelineConfig};

/// PicHand 检测结果记录工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检测的图像文件
  #[arg(long, value_name = "FILE")]
  pub image: PathBuf,

  /// 模型引用
  /// 支持格式:
  /// - 回放: replay:///path/to/raw.json
  /// - ONNX: onnx:///path/to/model.onnx?labels=/path/to/labels.txt（需启用 model_onnx）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 检测结果 JSON 输出路径
  #[arg(long, default_value = "detected_cards.json", value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: ConfidenceThreshold,

  /// 预览图输出，例如 image:///tmp/preview.png
  #[arg(long, value_name = "PREVIEW")]
  pub preview: Option<Url>,

  /// 预览图绘制过滤前的全部检测结果
  #[arg(long, requires = "preview")]
  pub preview_unfiltered: bool,
}

impl Args {
  pub fn into_config(self) -> PipelineConfig {
    let mut config =
      PipelineConfig::new(self.image, self.model, self.output).with_threshold(self.confidence);
    if let Some(preview) = self.preview {
      config = config.with_preview(preview, self.preview_unfiltered);
    }
    config
  }
}
