// 该文件是 PicHand 项目的一部分。
// src/output/record.rs - 检测结果 JSON 记录
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

//! 记录格式：
//!
//! ```json
//! {
//!   "image": "hand.jpg",
//!   "detections": [
//!     { "label": "Ace", "confidence": 0.91,
//!       "bbox": { "xmin": 10.0, "ymin": 10.0, "xmax": 50.0, "ymax": 90.0 } }
//!   ],
//!   "timestamp": "2026-10-17T09:30:15"
//! }
//! ```
//!
//! 字段顺序固定；浮点数至少保留 [`FLOAT_PRECISION`] 位小数，且不少于 [`SIGNIFICANT_DIGITS`]
//! 位有效数字；非 ASCII 字符原样输出。非有限浮点数无法用 JSON 表示，编码时报错。

use std::{
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::pipeline::{BoundingBox, Detection, DetectionResult, InvalidDetectionEntry};

/// 浮点数至少保留的小数位数
pub const FLOAT_PRECISION: i32 = 6;
/// 浮点数至少保留的有效数字位数，用于绝对值很小的置信度与坐标
pub const SIGNIFICANT_DIGITS: i32 = 6;
/// 本地时间，精确到秒，不带时区偏移
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Error, Debug)]
pub enum SerializeError {
  #[error("JSON 编码错误: {0}")]
  EncodeError(#[from] serde_json::Error),
  #[error("写入 {0} 失败: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("时间戳格式错误: {0}")]
  TimestampError(#[from] chrono::ParseError),
  #[error("{0} 不是有限值: {1}")]
  NonFiniteValue(&'static str, f32),
  #[error("记录中的检测条目无效: {0}")]
  InvalidEntry(#[from] InvalidDetectionEntry),
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordDocument {
  image: String,
  detections: Vec<RecordEntry>,
  timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordEntry {
  label: String,
  confidence: f64,
  bbox: RecordBox,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordBox {
  xmin: f64,
  ymin: f64,
  xmax: f64,
  ymax: f64,
}

fn round(value: f32) -> f64 {
  let value = value as f64;
  if value == 0.0 {
    return value;
  }
  let magnitude = value.abs().log10().floor() as i32;
  let places = FLOAT_PRECISION.max(SIGNIFICANT_DIGITS - 1 - magnitude);
  let scale = 10f64.powi(places);
  (value * scale).round() / scale
}

fn encode_float(field: &'static str, value: f32) -> Result<f64, SerializeError> {
  if !value.is_finite() {
    return Err(SerializeError::NonFiniteValue(field, value));
  }
  Ok(round(value))
}

impl TryFrom<&DetectionResult> for RecordDocument {
  type Error = SerializeError;

  fn try_from(result: &DetectionResult) -> Result<Self, Self::Error> {
    let detections = result
      .detections()
      .iter()
      .map(|d| -> Result<RecordEntry, SerializeError> {
        let bbox = d.bbox();
        Ok(RecordEntry {
          label: d.label().to_string(),
          confidence: encode_float("confidence", d.confidence())?,
          bbox: RecordBox {
            xmin: encode_float("xmin", bbox.xmin())?,
            ymin: encode_float("ymin", bbox.ymin())?,
            xmax: encode_float("xmax", bbox.xmax())?,
            ymax: encode_float("ymax", bbox.ymax())?,
          },
        })
      })
      .collect::<Result<_, _>>()?;

    Ok(RecordDocument {
      image: result.image_name().to_string(),
      detections,
      timestamp: result.generated_at().format(TIMESTAMP_FORMAT).to_string(),
    })
  }
}

/// 编码为 UTF-8 JSON 文本，以换行结尾
pub fn serialize(result: &DetectionResult) -> Result<Vec<u8>, SerializeError> {
  let mut bytes = serde_json::to_vec_pretty(&RecordDocument::try_from(result)?)?;
  bytes.push(b'\n');
  Ok(bytes)
}

/// 读回一份记录
pub fn decode(bytes: &[u8]) -> Result<DetectionResult, SerializeError> {
  let document: RecordDocument = serde_json::from_slice(bytes)?;
  let generated_at = NaiveDateTime::parse_from_str(&document.timestamp, TIMESTAMP_FORMAT)?;
  let detections = document
    .detections
    .into_iter()
    .map(|entry| -> Result<Detection, SerializeError> {
      let bbox = BoundingBox::from_corners(
        entry.bbox.xmin as f32,
        entry.bbox.ymin as f32,
        entry.bbox.xmax as f32,
        entry.bbox.ymax as f32,
      )?;
      Ok(Detection::new(entry.label, entry.confidence as f32, bbox)?)
    })
    .collect::<Result<_, _>>()?;
  Ok(DetectionResult::from_parts(
    document.image,
    detections,
    generated_at,
  ))
}

/// 先写入同目录下的临时文件，成功后重命名覆盖目标；任何失败都会删除临时文件，目标保持原状。
///
/// 目标已存在时沿用其权限，否则与普通新建文件一样受 umask 约束。
pub fn atomic_write<F>(path: &Path, write: F) -> Result<(), SerializeError>
where
  F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
  let io_error = |e: std::io::Error| SerializeError::IoError(path.to_path_buf(), e);
  let directory = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };

  let mut builder = tempfile::Builder::new();
  builder.prefix(".pichand-").suffix(".tmp");
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    builder.permissions(std::fs::Permissions::from_mode(0o666));
  }
  let mut temp = builder.tempfile_in(directory).map_err(io_error)?;
  debug!("写入临时文件: {}", temp.path().display());

  if let Ok(existing) = std::fs::metadata(path) {
    temp
      .as_file()
      .set_permissions(existing.permissions())
      .map_err(io_error)?;
  }

  {
    let mut writer = BufWriter::new(temp.as_file_mut());
    write(&mut writer).map_err(io_error)?;
    writer.flush().map_err(io_error)?;
  }
  temp.as_file().sync_all().map_err(io_error)?;
  temp.persist(path).map_err(|e| io_error(e.error))?;

  Ok(())
}

/// 原子地写入检测结果
pub fn write(result: &DetectionResult, path: &Path) -> Result<(), SerializeError> {
  let document = RecordDocument::try_from(result)?;
  atomic_write(path, |writer| {
    serde_json::to_writer_pretty(&mut *writer, &document)?;
    writer.write_all(b"\n")
  })?;
  info!(
    "检测结果已保存到 {} ({} 个目标)",
    path.display(),
    document.detections.len()
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn moment() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 17)
      .unwrap()
      .and_hms_opt(9, 30, 15)
      .unwrap()
  }

  fn result_with(detections: Vec<Detection>) -> DetectionResult {
    DetectionResult::from_parts("hand.jpg".to_string(), detections, moment())
  }

  fn ace() -> Detection {
    Detection::new(
      "Ace",
      0.91,
      BoundingBox::from_corners(10.0, 10.0, 50.0, 90.0).unwrap(),
    )
    .unwrap()
  }

  #[test]
  fn layout_matches_record_format() {
    let text = String::from_utf8(serialize(&result_with(vec![ace()])).unwrap()).unwrap();
    let expected = r#"{
  "image": "hand.jpg",
  "detections": [
    {
      "label": "Ace",
      "confidence": 0.91,
      "bbox": {
        "xmin": 10.0,
        "ymin": 10.0,
        "xmax": 50.0,
        "ymax": 90.0
      }
    }
  ],
  "timestamp": "2026-10-17T09:30:15"
}
"#;
    assert_eq!(text, expected);
  }

  #[test]
  fn empty_detections_serialize_as_empty_array() {
    let text = String::from_utf8(serialize(&result_with(Vec::new())).unwrap()).unwrap();
    assert!(text.contains("\"detections\": []"));
  }

  #[test]
  fn non_ascii_labels_are_not_escaped() {
    let heart = Detection::new(
      "ハートのA",
      0.5,
      BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0).unwrap(),
    )
    .unwrap();
    let text = String::from_utf8(serialize(&result_with(vec![heart])).unwrap()).unwrap();
    assert!(text.contains("\"label\": \"ハートのA\""));
    assert!(!text.contains("\\u"));
  }

  #[test]
  fn floats_keep_six_decimal_places() {
    let det = Detection::new(
      "Ace",
      0.123456789,
      BoundingBox::from_corners(10.1234567, 0.0, 20.0, 1.0).unwrap(),
    )
    .unwrap();
    let text = String::from_utf8(serialize(&result_with(vec![det])).unwrap()).unwrap();
    assert!(text.contains("\"confidence\": 0.123457"));
    assert!(text.contains("\"xmin\": 10.123457"));
  }

  #[test]
  fn serialization_is_deterministic() {
    let result = result_with(vec![ace(), ace()]);
    assert_eq!(serialize(&result).unwrap(), serialize(&result).unwrap());
  }

  #[test]
  fn decode_reads_back_what_was_written() {
    let result = result_with(vec![ace()]);
    let decoded = decode(&serialize(&result).unwrap()).unwrap();
    assert_eq!(decoded, result);
  }

  #[test]
  fn write_replaces_destination() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detected_cards.json");
    std::fs::write(&path, b"old").unwrap();

    let result = result_with(vec![ace()]);
    write(&result, &path).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), serialize(&result).unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[test]
  fn failed_write_leaves_prior_artifact_and_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detected_cards.json");
    std::fs::write(&path, b"prior").unwrap();

    let outcome = atomic_write(&path, |writer| {
      writer.write_all(b"{\"image\": \"hand")?;
      Err(std::io::Error::other("disk full"))
    });

    assert!(matches!(outcome, Err(SerializeError::IoError(_, _))));
    assert_eq!(std::fs::read(&path).unwrap(), b"prior");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[test]
  fn missing_directory_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.json");
    let outcome = write(&result_with(Vec::new()), &path);
    assert!(matches!(outcome, Err(SerializeError::IoError(_, _))));
    assert!(!path.exists());
  }

  #[test]
  fn small_values_keep_significant_digits() {
    let det = Detection::new(
      "Ace",
      0.00001234,
      BoundingBox::from_corners(0.0001234, 0.0, 1.0, 1.0).unwrap(),
    )
    .unwrap();
    let bytes = serialize(&result_with(vec![det])).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let entry = &value["detections"][0];

    let confidence = entry["confidence"].as_f64().unwrap();
    assert!((confidence - 1.234e-5).abs() < 1e-12, "{confidence}");
    let xmin = entry["bbox"]["xmin"].as_f64().unwrap();
    assert!((xmin - 1.234e-4).abs() < 1e-11, "{xmin}");
  }

  #[test]
  fn non_finite_values_are_not_encoded() {
    assert!(matches!(
      encode_float("confidence", f32::NAN),
      Err(SerializeError::NonFiniteValue("confidence", _))
    ));
    assert!(encode_float("xmax", f32::INFINITY).is_err());
    assert_eq!(encode_float("xmin", 0.0).unwrap(), 0.0);
  }

  #[test]
  fn decode_rejects_entries_with_null_values() {
    let text = r#"{
  "image": "hand.jpg",
  "detections": [
    {"label": "Ace", "confidence": null, "bbox": {"xmin": 0, "ymin": 0, "xmax": 1, "ymax": 1}}
  ],
  "timestamp": "2026-10-17T09:30:15"
}"#;
    assert!(matches!(
      decode(text.as_bytes()),
      Err(SerializeError::EncodeError(_))
    ));
  }

  #[cfg(unix)]
  #[test]
  fn write_keeps_permissions_of_existing_artifact() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detected_cards.json");
    std::fs::write(&path, b"old").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

    write(&result_with(vec![ace()]), &path).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640);
  }

  #[cfg(unix)]
  #[test]
  fn new_artifact_follows_umask_like_a_plain_file() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain.json");
    std::fs::File::create(&plain).unwrap();
    let path = dir.path().join("detected_cards.json");

    write(&result_with(Vec::new()), &path).unwrap();

    let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&path), mode(&plain));
  }
}
