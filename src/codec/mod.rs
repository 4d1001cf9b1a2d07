//! JPEG and camera raw codecs
//!
//! Stateless helpers around the `image` crate. Raw (CR2) files are handled by
//! extracting the full-size JPEG the camera embeds in the container.

pub mod cr2;
mod transform;

pub use transform::{reencode_jpeg, Geometry, Transform};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed raw container: {0}")]
    Container(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub fn decode_jpeg(data: &[u8]) -> Result<DynamicImage, CodecError> {
    Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?)
}

/// Encode `image` as baseline JPEG into `sink`. Alpha is dropped.
pub fn encode_jpeg(image: &DynamicImage, quality: u8, sink: &mut dyn Write) -> Result<(), CodecError> {
    let rgb = image.to_rgb8();
    let mut encoder = JpegEncoder::new_with_quality(sink, quality);
    encoder.encode_image(&rgb)?;
    Ok(())
}
