//! Image encoding: image file on disk → base64 payload for the VLM.
//!
//! VLM APIs accept images as base64 data inside the JSON request body. The
//! parser crops figures, tables and equations to JPEG, but user-supplied
//! result directories may hold PNGs, so the MIME type is sniffed from the
//! bytes rather than assumed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::path::Path;
use tracing::debug;

/// A base64-encoded image and its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

impl EncodedImage {
    /// Encode raw image bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(bytes),
            mime_type: sniff_mime(bytes).to_string(),
        }
    }

    /// `data:<mime>;base64,<data>` form accepted by OpenAI-compatible APIs.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Convert into the provider crate's image type.
    ///
    /// `detail: "high"` keeps small print in tables and figures legible to
    /// GPT-4-class tiling.
    pub fn into_image_data(self) -> ImageData {
        let Self { data, mime_type } = self;
        ImageData::new(data, mime_type.as_str()).with_detail("high")
    }
}

/// Guess the MIME type from magic bytes; unknown formats are sent as JPEG.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => "image/jpeg",
    }
}

/// Read and encode the image at `path`.
pub async fn encode_image_file(path: &Path) -> std::io::Result<EncodedImage> {
    let bytes = tokio::fs::read(path).await?;
    let encoded = EncodedImage::from_bytes(&bytes);
    debug!(
        "Encoded {} ({}) → {} bytes base64",
        path.display(),
        encoded.mime_type,
        encoded.data.len()
    );
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 128, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn png_is_detected() {
        let enc = EncodedImage::from_bytes(&png_bytes());
        assert_eq!(enc.mime_type, "image/png");
        let decoded = STANDARD.decode(&enc.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn unknown_bytes_fall_back_to_jpeg() {
        assert_eq!(sniff_mime(b"not an image"), "image/jpeg");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
    }

    #[test]
    fn data_url_format() {
        let enc = EncodedImage {
            data: "QUJD".into(),
            mime_type: "image/jpeg".into(),
        };
        assert_eq!(enc.to_data_url(), "data:image/jpeg;base64,QUJD");
    }

    #[tokio::test]
    async fn encode_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fig.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let enc = encode_image_file(&path).await.unwrap();
        assert_eq!(enc.mime_type, "image/png");
        assert!(!enc.data.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        assert!(encode_image_file(Path::new("/no/such/image.jpg")).await.is_err());
    }
}
