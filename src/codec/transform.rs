use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::{decode_jpeg, encode_jpeg, CodecError};

/// One geometric correction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transform {
    /// Clockwise
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
}

impl Transform {
    fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Transform::Rotate90 => image.rotate90(),
            Transform::Rotate180 => image.rotate180(),
            Transform::Rotate270 => image.rotate270(),
            Transform::FlipHorizontal => image.fliph(),
            Transform::FlipVertical => image.flipv(),
        }
    }
}

/// Ordered list of corrections for the way the camera is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry(pub Vec<Transform>);

impl Default for Geometry {
    fn default() -> Self {
        // Quarter turn counter-clockwise, then mirror
        Geometry(vec![Transform::Rotate270, Transform::FlipHorizontal])
    }
}

impl Geometry {
    pub fn identity() -> Self {
        Geometry(Vec::new())
    }

    pub fn apply(&self, image: DynamicImage) -> DynamicImage {
        self.0.iter().fold(image, |image, step| step.apply(image))
    }
}

/// Decode a JPEG, apply `geometry` and encode it again.
pub fn reencode_jpeg(jpeg: &[u8], geometry: &Geometry, quality: u8) -> Result<Vec<u8>, CodecError> {
    let image = geometry.apply(decode_jpeg(jpeg)?);
    let mut out = Vec::with_capacity(jpeg.len());
    encode_jpeg(&image, quality, &mut out)?;
    Ok(out)
}
