// 该文件是 Qianxun （千寻） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

//! 把一张静态图像当作相机：每次迭代重复给出同一帧。
//!
//! `image:///path/to/frame.png?repeat=N` 只给出 N 帧，缺省时不会结束。

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::FrameSource;
use crate::{FromUrl, FromUrlWithScheme, frame::CameraFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("参数 repeat 不是整数: {0}")]
  InvalidRepeat(String),
}

pub struct ImageFileInput {
  image: RgbImage,
  remaining: Option<u64>,
  index: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}'，实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let mut remaining = None;
    for (k, v) in url.query_pairs() {
      if k == "repeat" {
        let n = v
          .parse::<u64>()
          .map_err(|_| ImageFileInputError::InvalidRepeat(v.to_string()))?;
        remaining = Some(n);
      }
    }

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    info!("读取图像 {}: {}x{}", path, image.width(), image.height());

    Ok(Self::new(image).with_repeat(remaining))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      remaining: None,
      index: 0,
    }
  }

  /// None 表示无限重复
  pub fn with_repeat(mut self, repeat: Option<u64>) -> Self {
    self.remaining = repeat;
    self
  }
}

impl Iterator for ImageFileInput {
  type Item = CameraFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(remaining) = self.remaining.as_mut() {
      if *remaining == 0 {
        return None;
      }
      *remaining -= 1;
    }
    let frame = CameraFrame::from(self.image.clone()).with_index(self.index);
    self.index += 1;
    Some(frame)
  }
}

impl FrameSource for ImageFileInput {
  fn resolution(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}
