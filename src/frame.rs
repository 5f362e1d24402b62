// 该文件是 Qianxun （千寻） 项目的一部分。
// src/frame.rs - 相机帧定义
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

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// 像素排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
  Gray8,
  Rgb8,
  Rgba8,
}

impl PixelLayout {
  pub fn channels(&self) -> usize {
    match self {
      PixelLayout::Gray8 => 1,
      PixelLayout::Rgb8 => 3,
      PixelLayout::Rgba8 => 4,
    }
  }
}

/// 相机帧：带排布标记的像素缓冲区
#[derive(Debug, Clone)]
pub struct CameraFrame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  layout: PixelLayout,
  /// 帧序号
  pub index: u64,
}

impl CameraFrame {
  /// 由原始字节构造，长度与尺寸不符时返回 None
  pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Option<Self> {
    if data.len() != layout.channels() * width as usize * height as usize {
      return None;
    }
    Some(Self {
      data: data.into_boxed_slice(),
      width,
      height,
      layout,
      index: 0,
    })
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn layout(&self) -> PixelLayout {
    self.layout
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty() || self.width == 0 || self.height == 0
  }

  /// 转换为 `image` 图像，空帧返回 None
  pub fn to_image(&self) -> Option<DynamicImage> {
    if self.is_empty() {
      return None;
    }
    let data = self.data.to_vec();
    match self.layout {
      PixelLayout::Gray8 => {
        GrayImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageLuma8)
      }
      PixelLayout::Rgb8 => {
        RgbImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgb8)
      }
      PixelLayout::Rgba8 => {
        RgbaImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgba8)
      }
    }
  }
}

impl From<RgbImage> for CameraFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
      layout: PixelLayout::Rgb8,
      index: 0,
    }
  }
}

impl From<RgbaImage> for CameraFrame {
  fn from(image: RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
      layout: PixelLayout::Rgba8,
      index: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_mismatched_buffer() {
    assert!(CameraFrame::new(vec![0; 11], 2, 2, PixelLayout::Rgb8).is_none());
    assert!(CameraFrame::new(vec![0; 16], 2, 2, PixelLayout::Rgba8).is_some());
  }

  #[test]
  fn zero_sized_frame_has_no_image() {
    let frame = CameraFrame::new(vec![], 0, 4, PixelLayout::Rgb8).unwrap();
    assert!(frame.is_empty());
    assert!(frame.to_image().is_none());
  }
}
