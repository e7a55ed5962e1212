// QR code rendering

//! QR encoding of the peer config
//!
//! The WireGuard mobile apps import a tunnel by scanning a QR code whose
//! payload is exactly the config text, so the encoder gets the normalized
//! config verbatim.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Turns a text payload into image bytes
pub trait QrEncoder: Send + Sync {
    fn encode(&self, payload: &str) -> Result<Vec<u8>>;
}

/// PNG encoder with medium error correction
#[derive(Debug, Clone, Copy)]
pub struct PngQrEncoder {
    /// Minimum width and height in pixels
    pub size: u32,
}

impl Default for PngQrEncoder {
    fn default() -> Self {
        Self { size: 256 }
    }
}

impl QrEncoder for PngQrEncoder {
    fn encode(&self, payload: &str) -> Result<Vec<u8>> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
            .context("Payload does not fit in a QR code")?;

        let image = code
            .render::<Luma<u8>>()
            .min_dimensions(self.size, self.size)
            .build();

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("Failed to encode QR image as PNG")?;

        Ok(png)
    }
}
