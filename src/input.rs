// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/input.rs - 图像输入与解码
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

use std::io::Cursor;

use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use crate::frame::DecodedImage;

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("Empty upload.")]
  Empty,
  #[error("Uploaded file is not a valid image.")]
  Unsupported(#[source] image::ImageError),
}

/// 将上传的原始字节解码为方向已校正的 RGB 图像
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }

  let image = image::load_from_memory(bytes).map_err(DecodeError::Unsupported)?;
  let orientation = read_exif_orientation(bytes);
  debug!(
    "解码图像: {}x{}, EXIF 方向: {}",
    image.width(),
    image.height(),
    orientation
  );

  let image = apply_orientation(image, orientation);
  Ok(DecodedImage::from(image.to_rgb8()))
}

/// 读取 EXIF 方向标签，无 EXIF 或读取失败时返回 1（不旋转）
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
  let mut cursor = Cursor::new(bytes);
  let reader = match exif::Reader::new().read_from_container(&mut cursor) {
    Ok(r) => r,
    Err(_) => return 1,
  };

  reader
    .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
    .and_then(|f| f.value.get_uint(0))
    .unwrap_or(1)
}

pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
  match orientation {
    2 => image.fliph(),
    3 => image.rotate180(),
    4 => image.flipv(),
    5 => image.rotate90().fliph(),
    6 => image.rotate90(),
    7 => image.rotate270().fliph(),
    8 => image.rotate270(),
    _ => image,
  }
}
