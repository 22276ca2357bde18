use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;

use crate::error::AppError;

const MIN_SIZE: u32 = 200;
const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// 把内容渲染成 PNG 二维码并编码为 data URL
pub fn to_data_url(content: &str) -> Result<String, AppError> {
    let code = QrCode::new(content.as_bytes()).map_err(|e| {
        tracing::error!("Failed to encode QR content: {:?}", e);
        AppError::Internal("Failed to generate QR code".into())
    })?;

    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_SIZE, MIN_SIZE)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| {
            tracing::error!("Failed to write QR png: {:?}", e);
            AppError::Internal("Failed to generate QR code".into())
        })?;

    Ok(format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png_data_url() {
        let url = to_data_url(r#"{"licenseNumber":"CAR-1700000000000-ABC123"}"#).unwrap();
        let encoded = url.strip_prefix(DATA_URL_PREFIX).expect("data url prefix");
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

        let img = image::load_from_memory(&bytes).unwrap();
        assert!(img.width() >= MIN_SIZE);
        assert!(img.height() >= MIN_SIZE);
    }
}
