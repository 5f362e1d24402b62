// 该文件是 Qianxun （千寻） 项目的一部分。
// src/codec.rs - 图像到张量的编码
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

use image::{DynamicImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{frame::CameraFrame, tensor::Tensor};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
  #[error("图像无效: 缓冲区为空或尺寸为零")]
  InvalidImage,
  #[error("不支持的通道数: {0}")]
  UnsupportedChannels(usize),
}

/// 将相机帧缩放并打包为 `[1, channels, height, width]` 的浮点张量，数值范围 [0, 1]
pub fn encode(
  frame: &CameraFrame,
  target_width: u32,
  target_height: u32,
  channels: usize,
) -> Result<Tensor, CodecError> {
  let image = frame.to_image().ok_or(CodecError::InvalidImage)?;
  encode_image(&image, target_width, target_height, channels)
}

pub fn encode_image(
  image: &DynamicImage,
  target_width: u32,
  target_height: u32,
  channels: usize,
) -> Result<Tensor, CodecError> {
  if image.width() == 0 || image.height() == 0 || target_width == 0 || target_height == 0 {
    return Err(CodecError::InvalidImage);
  }

  let resized = image.resize_exact(target_width, target_height, FilterType::Triangle);
  let (raw, src_channels) = match channels {
    1 => (resized.to_luma8().into_raw(), 1),
    3 => (resized.to_rgb8().into_raw(), 3),
    4 => (resized.to_rgba8().into_raw(), 4),
    n => return Err(CodecError::UnsupportedChannels(n)),
  };

  let width = target_width as usize;
  let height = target_height as usize;
  let plane = width * height;
  let mut data = vec![0f32; channels * plane];

  // HWC 转为 CHW
  for h in 0..height {
    for w in 0..width {
      let pixel = (h * width + w) * src_channels;
      for c in 0..channels {
        data[c * plane + h * width + w] = raw[pixel + c] as f32 / 255.0;
      }
    }
  }

  debug!(
    "编码输入张量: {}x{} -> {}x{}x{}",
    image.width(),
    image.height(),
    channels,
    height,
    width
  );

  Tensor::from_f32(&[1, channels, height, width], data).ok_or(CodecError::InvalidImage)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelLayout;
  use image::{Rgb, RgbImage};

  #[test]
  fn empty_frame_is_invalid() {
    let frame = CameraFrame::new(vec![], 0, 0, PixelLayout::Rgb8).unwrap();
    assert_eq!(encode(&frame, 4, 4, 3), Err(CodecError::InvalidImage));
  }

  #[test]
  fn packs_channels_into_planes() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
    let tensor = encode(&CameraFrame::from(image), 4, 4, 3).unwrap();
    assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
    // 第一行是 batch，每行 3*4*4 个元素
    assert_eq!(tensor.get_f32(0, 0), Some(1.0));
    assert_eq!(tensor.get_f32(0, 16), Some(0.0));
    assert!((tensor.get_f32(0, 32).unwrap() - 0.2).abs() < 1e-6);
  }

  #[test]
  fn rejects_unknown_channel_count() {
    let image = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
    assert_eq!(
      encode(&CameraFrame::from(image), 4, 4, 2),
      Err(CodecError::UnsupportedChannels(2))
    );
  }
}
