// 该文件是 PicHand 项目的一部分。
// src/output/save_image_file.rs - 保存预览图像文件
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{
    Render,
    draw::{Draw, load_font},
  },
  pipeline::Detection,
};

pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum PreviewError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("读取字体 {0} 失败: {1}")]
  FontReadError(PathBuf, std::io::Error),
  #[error("无效的字体文件 {0}: {1}")]
  InvalidFont(PathBuf, ab_glyph::InvalidFont),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = PreviewError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(PreviewError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let draw = match uri.query_pairs().find(|(k, _)| k == "font") {
      Some((_, font)) => {
        let font = load_font(Path::new(&*font))?;
        Draw::with_font(Some(font))
      }
      None => Draw::default(),
    };

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      draw,
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>, draw: Draw) -> Self {
    Self {
      path: path.into(),
      draw,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), PreviewError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(PreviewError::IoError)?;
    }

    image.save(&self.path).map_err(PreviewError::ImageError)?;

    info!("保存预览图到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<Path, [Detection]> for SaveImageFileOutput {
  type Error = PreviewError;

  fn render_result(&self, frame: &Path, result: &[Detection]) -> Result<(), Self::Error> {
    let mut image = image::open(frame)
      .map_err(PreviewError::ImageError)?
      .to_rgb8();
    self.draw.draw_detections_on_image(&mut image, result);
    self.save_image(image)
  }
}
