// 该文件是 PicHand 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pichand::{
  FromUrl,
  model::ModelWrapper,
  pipeline::{Pipeline, PipelineError},
};

const EXIT_DETECTOR: u8 = 2;
const EXIT_SERIALIZATION: u8 = 3;
const EXIT_CONFIG: u8 = 64;

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  // 阈值越界等配置错误在任何检测开始前报告
  let args = match args::Args::try_parse() {
    Ok(args) => args,
    Err(e) if e.use_stderr() => {
      let _ = e.print();
      return ExitCode::from(EXIT_CONFIG);
    }
    Err(e) => {
      let _ = e.print();
      return ExitCode::SUCCESS;
    }
  };
  let config = args.into_config();

  info!("图像路径: {}", config.image_path.display());
  info!("模型引用: {}", config.model_reference);
  info!("输出文件: {}", config.output_path.display());
  info!("置信度阈值: {}", config.confidence_threshold);

  match run(config) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("运行失败: {}", e);
      let mut source = std::error::Error::source(&e);
      while let Some(cause) = source {
        error!("  原因: {}", cause);
        source = cause.source();
      }
      match e {
        PipelineError::DetectorUnavailable(_) => ExitCode::from(EXIT_DETECTOR),
        PipelineError::Serialization(_) => ExitCode::from(EXIT_SERIALIZATION),
      }
    }
  }
}

fn run(config: pichand::config::PipelineConfig) -> Result<(), PipelineError> {
  info!("正在加载模型...");
  let detector = ModelWrapper::from_url(&config.model_reference).map_err(PipelineError::detector)?;
  info!("模型加载完成");

  let report = Pipeline::new(config).run(&detector)?;
  info!(
    "处理完成: 原始 {} 条, 无效 {} 条, 低于阈值 {} 条, 保留 {} 条",
    report.raw_count,
    report.skipped,
    report.below_threshold,
    report.result.detections().len()
  );
  if let Some(e) = &report.preview_error {
    info!("预览图未生成: {}", e);
  }
  info!("结果已保存到 {}", report.output_path.display());
  Ok(())
}
