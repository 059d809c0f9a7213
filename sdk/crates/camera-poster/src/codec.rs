//! Still frame rasterisation and JPEG encoding.

use crate::video::{Frame, FrameSize};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::Rgb;

/// Draws stills at a fixed frame size and encodes them for upload.
#[derive(Debug, Clone)]
pub struct StillEncoder {
    quality: u8,
    placeholder: Rgb<u8>,
}

impl StillEncoder {
    pub fn new(quality: u8, placeholder_rgb: [u8; 3]) -> Self {
        StillEncoder {
            quality: quality.clamp(1, 100),
            placeholder: Rgb(placeholder_rgb),
        }
    }

    /// Copy a native frame into a still of `size`.
    pub fn draw(&self, source: &Frame, size: FrameSize) -> Frame {
        if source.dimensions() == (size.width, size.height) {
            return source.clone();
        }
        imageops::resize(source, size.width, size.height, FilterType::Triangle)
    }

    /// Neutral fill shown when no frame can be captured.
    pub fn placeholder(&self, size: FrameSize) -> Frame {
        Frame::from_pixel(size.width, size.height, self.placeholder)
    }

    /// Encode a still as JPEG.
    pub fn encode(&self, still: &Frame) -> Result<Bytes, image::ImageError> {
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, self.quality).encode_image(still)?;
        Ok(Bytes::from(output))
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}
