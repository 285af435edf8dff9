//! Frame encoding.
//!
//! Turns raw frame bytes from the source into the payload the
//! summarizer and the moment store consume: a JPEG, re-encoded at a
//! fixed quality and capped width, carried as base64.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use stream_recap_common::config::CaptureConfig;
use stream_recap_common::moment::ImagePayload;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not extract image data from the captured frame: {0}")]
    Decode(String),
    #[error("could not extract image data: frame has zero width or height")]
    EmptyFrame,
    #[error("failed to encode frame as JPEG: {0}")]
    Encode(String),
}

pub struct FrameEncoder {
    jpeg_quality: u8,
    max_width: u32,
}

impl FrameEncoder {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            max_width: config.max_width,
        }
    }

    /// Decodes a raw frame (format guessed from its magic bytes) and
    /// re-encodes it as a base64 JPEG payload.
    pub fn encode(&self, frame_data: &[u8]) -> Result<ImagePayload, EncodeError> {
        let img = ImageReader::new(Cursor::new(frame_data))
            .with_guessed_format()
            .map_err(|e| EncodeError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| EncodeError::Decode(e.to_string()))?;
        self.payload_from_image(img)
    }

    fn payload_from_image(&self, img: DynamicImage) -> Result<ImagePayload, EncodeError> {
        if img.width() == 0 || img.height() == 0 {
            return Err(EncodeError::EmptyFrame);
        }

        let img = if self.max_width > 0 && img.width() > self.max_width {
            let scaled_height = ((img.height() as u64 * self.max_width as u64)
                / img.width() as u64)
                .max(1) as u32;
            debug!(
                from_width = img.width(),
                to_width = self.max_width,
                "downscaling frame"
            );
            img.resize_exact(self.max_width, scaled_height, FilterType::Triangle)
        } else {
            img
        };

        let (width, height) = (img.width(), img.height());
        let rgb = img.to_rgb8();
        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| EncodeError::Encode(e.to_string()))?;

        Ok(ImagePayload {
            jpeg_bytes: jpeg.len(),
            base64: BASE64.encode(&jpeg),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn encoder(max_width: u32) -> FrameEncoder {
        FrameEncoder {
            jpeg_quality: 80,
            max_width,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 90, 200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn encodes_decodable_frame_as_jpeg_payload() {
        let payload = encoder(1280).encode(&png_bytes(8, 4)).unwrap();
        assert_eq!(payload.width, 8);
        assert_eq!(payload.height, 4);
        assert!(payload.jpeg_bytes > 0);

        let jpeg = BASE64.decode(&payload.base64).unwrap();
        assert_eq!(jpeg.len(), payload.jpeg_bytes);
        // JPEG start-of-image marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = encoder(1280).encode(b"not an image at all").unwrap_err();
        assert!(matches!(err, EncodeError::Decode(_)));
    }

    #[test]
    fn empty_input_is_a_decode_error() {
        let err = encoder(1280).encode(&[]).unwrap_err();
        assert!(matches!(err, EncodeError::Decode(_)));
    }

    #[test]
    fn zero_dimension_frame_is_rejected() {
        let err = encoder(1280)
            .payload_from_image(DynamicImage::new_rgb8(0, 0))
            .unwrap_err();
        assert!(matches!(err, EncodeError::EmptyFrame));
    }

    #[test]
    fn wide_frames_are_downscaled_preserving_aspect() {
        let payload = encoder(10).encode(&png_bytes(100, 50)).unwrap();
        assert_eq!(payload.width, 10);
        assert_eq!(payload.height, 5);
    }

    #[test]
    fn narrow_frames_keep_their_size() {
        let payload = encoder(1280).encode(&png_bytes(16, 16)).unwrap();
        assert_eq!(payload.width, 16);
        assert_eq!(payload.height, 16);
    }
}
