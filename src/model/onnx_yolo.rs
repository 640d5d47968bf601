// 该文件是 PicHand 项目的一部分。
// src/model/onnx_yolo.rs - ONNX YOLO 目标检测器
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

use anyhow::{Context, anyhow};
use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detector, LabelTable, RawDetection},
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;
const ONNX_DEFAULT_OBJECT_THRESH: f32 = 0.25;
const ONNX_DEFAULT_NMS_THRESH: f32 = 0.45;

type OnnxPlan = TypedSimplePlan<TypedModel>;

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("查询参数无效: {0}={1}")]
  InvalidQuery(String, String),
  #[error("标签文件读取错误 {0}: {1}")]
  LabelsError(PathBuf, std::io::Error),
  #[error("模型加载错误: {0:#}")]
  ModelLoadError(anyhow::Error),
  #[error("图像读取错误 {0}: {1}")]
  ImageError(PathBuf, image::ImageError),
  #[error("推理错误: {0:#}")]
  InferenceError(anyhow::Error),
}

/// 基于 tract 的 YOLOv5/v8 ONNX 检测器
pub struct OnnxYoloDetector {
  plan: OnnxPlan,
  input_size: u32,
  nms_threshold: f32,
  labels: LabelTable,
}

impl FromUrlWithScheme for OnnxYoloDetector {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxYoloDetector {
  type Error = OnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxError::SchemeMismatch);
    }

    let mut input_size = ONNX_DEFAULT_INPUT_SIZE;
    let mut nms_threshold = ONNX_DEFAULT_NMS_THRESH;
    let mut labels = LabelTable::coco();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "size" => {
          input_size = v
            .parse()
            .map_err(|_| OnnxError::InvalidQuery(k.to_string(), v.to_string()))?;
        }
        "iou" => {
          nms_threshold = v
            .parse()
            .map_err(|_| OnnxError::InvalidQuery(k.to_string(), v.to_string()))?;
        }
        "labels" => {
          let path = PathBuf::from(v.as_ref());
          labels = LabelTable::from_file(&path).map_err(|e| OnnxError::LabelsError(path, e))?;
        }
        _ => debug!("忽略未知查询参数: {}", k),
      }
    }

    Self::load(Path::new(url.path()), input_size, labels).map(|d| d.with_nms(nms_threshold))
  }
}

impl OnnxYoloDetector {
  pub fn load(model_path: &Path, input_size: u32, labels: LabelTable) -> Result<Self, OnnxError> {
    info!("加载模型文件: {}", model_path.display());
    let size = input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(model_path)
      .with_context(|| format!("无法加载 ONNX 模型: {}", model_path.display()))
      .and_then(|model| {
        model
          .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
          )
          .context("无法设置模型输入形状")
      })
      .and_then(|model| model.into_optimized().context("模型优化失败"))
      .and_then(|model| model.into_runnable().context("无法构建可执行模型"))
      .map_err(|e| {
        error!("模型加载失败: {:#}", e);
        OnnxError::ModelLoadError(e)
      })?;
    info!("模型加载完成, 类别数: {}", labels.len());

    Ok(Self {
      plan,
      input_size,
      nms_threshold: ONNX_DEFAULT_NMS_THRESH,
      labels,
    })
  }

  pub fn with_nms(mut self, nms_threshold: f32) -> Self {
    self.nms_threshold = nms_threshold;
    self
  }

  /// 拉伸到模型输入尺寸并转换为归一化的 NCHW 张量
  fn preprocess(&self, image: &RgbImage) -> Tensor {
    let resized = image::imageops::resize(
      image,
      self.input_size,
      self.input_size,
      FilterType::Triangle,
    );
    let size = self.input_size as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .into_tensor()
  }

  fn postprocess(
    &self,
    outputs: TVec<TValue>,
    original_width: f32,
    original_height: f32,
    floor: f32,
  ) -> anyhow::Result<Vec<RawDetection>> {
    let output = outputs.first().ok_or_else(|| anyhow!("模型没有输出"))?;
    let view = output
      .to_array_view::<f32>()
      .context("模型输出不是 f32 张量")?;
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
      return Err(anyhow!("无法识别的输出形状: {:?}", shape));
    }
    let view = view
      .into_dimensionality::<tract_ndarray::Ix3>()
      .context("模型输出维度错误")?;
    let num_classes = shape[1] - 4;
    let num_anchors = shape[2];
    debug!("输出形状: {:?}, 类别数: {}", shape, num_classes);

    let scale_x = original_width / self.input_size as f32;
    let scale_y = original_height / self.input_size as f32;
    let mut candidates = Vec::new();

    for i in 0..num_anchors {
      let mut score = f32::MIN;
      let mut class_id = 0usize;
      for c in 0..num_classes {
        let s = view[[0, 4 + c, i]];
        if s > score {
          score = s;
          class_id = c;
        }
      }
      if score < floor {
        continue;
      }

      let cx = view[[0, 0, i]];
      let cy = view[[0, 1, i]];
      let w = view[[0, 2, i]];
      let h = view[[0, 3, i]];

      candidates.push(RawDetection::indexed(
        class_id as u32,
        score,
        [
          ((cx - w / 2.0) * scale_x).clamp(0.0, original_width),
          ((cy - h / 2.0) * scale_y).clamp(0.0, original_height),
          ((cx + w / 2.0) * scale_x).clamp(0.0, original_width),
          ((cy + h / 2.0) * scale_y).clamp(0.0, original_height),
        ],
      ));
    }

    debug!("NMS 前候选数: {}", candidates.len());
    Ok(nms(candidates, self.nms_threshold))
  }
}

impl Detector for OnnxYoloDetector {
  type Error = OnnxError;

  fn detect(
    &self,
    image_path: &Path,
    confidence_floor: Option<f32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    let image = image::open(image_path)
      .map_err(|e| OnnxError::ImageError(image_path.to_path_buf(), e))?
      .to_rgb8();
    let (width, height) = (image.width() as f32, image.height() as f32);

    let input = self.preprocess(&image);
    let now = std::time::Instant::now();
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .context("ONNX 推理失败")
      .map_err(OnnxError::InferenceError)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    self
      .postprocess(
        outputs,
        width,
        height,
        confidence_floor.unwrap_or(ONNX_DEFAULT_OBJECT_THRESH),
      )
      .map_err(OnnxError::InferenceError)
  }

  fn labels(&self) -> &LabelTable {
    &self.labels
  }
}

/// 按类别的非极大值抑制，结果按置信度降序
fn nms(mut detections: Vec<RawDetection>, nms_threshold: f32) -> Vec<RawDetection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<RawDetection> = Vec::new();
  for det in detections {
    let suppressed = result
      .iter()
      .any(|kept| kept.label == det.label && iou(&kept.bbox, &det.bbox) >= nms_threshold);
    if !suppressed {
      result.push(det);
    }
  }
  result
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
