/// Smart crop-to-square for uploaded photos
///
/// Every upload is cropped to a square before it is sent to the
/// generation service. Landscape shots are centered horizontally; portrait
/// shots keep the window near the top third, where people in fashion
/// photos are usually framed.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use tokio::task;

use super::media::{format_for_mime, ImageRecord, DEFAULT_MIME};
use crate::error::{StudioError, StudioResult};

/// Source rectangle of a crop, in pixels of the decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the square window for an image of `width × height`.
pub fn square_crop_window(width: u32, height: u32) -> CropWindow {
    let side = width.min(height);

    let (x, y) = if width > height {
        ((width - side) / 2, 0)
    } else if height > width {
        // Upper third rather than center
        (0, (height - side) / 3)
    } else {
        (0, 0)
    };

    CropWindow {
        x,
        y,
        width: side,
        height: side,
    }
}

/// Normalize an uploaded file off the async runtime.
///
/// Decoding and re-encoding are CPU bound, so this runs on the blocking pool.
pub async fn normalize_upload(bytes: Vec<u8>, mime_type: Option<String>) -> StudioResult<ImageRecord> {
    task::spawn_blocking(move || normalize_to_square(&bytes, mime_type.as_deref()))
        .await
        .map_err(|e| StudioError::Canvas(format!("task join error: {e}")))?
}

/// Crop raw file bytes to a square and re-encode them.
///
/// The output keeps the declared mime type when we can encode it and falls
/// back to PNG otherwise.
pub fn normalize_to_square(bytes: &[u8], mime_type: Option<&str>) -> StudioResult<ImageRecord> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| StudioError::Decode(format!("cannot load image: {e}")))?;

    let (width, height) = (img.width(), img.height());
    let window = square_crop_window(width, height);
    if window.width == 0 {
        return Err(StudioError::Canvas(format!(
            "cannot create a {}x{} surface",
            window.width, window.height
        )));
    }

    let cropped = img.crop_imm(window.x, window.y, window.width, window.height);

    let (format, mime) = match mime_type.and_then(|m| format_for_mime(m).map(|f| (f, m))) {
        Some((format, mime)) => (format, mime.to_string()),
        None => (ImageFormat::Png, DEFAULT_MIME.to_string()),
    };

    let encoded = encode(&cropped, format)?;

    tracing::info!(
        "smart cropped {}x{} -> {}x{}",
        width,
        height,
        window.width,
        window.height
    );

    Ok(ImageRecord::from_bytes(&encoded, mime))
}

/// Encode an image into memory in the given format
pub(crate) fn encode(img: &DynamicImage, format: ImageFormat) -> StudioResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());

    // The JPEG encoder rejects alpha channels
    let result = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut out, format)
    } else {
        img.write_to(&mut out, format)
    };

    result.map_err(|e| StudioError::Canvas(format!("cannot encode {format:?}: {e}")))?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    /// Encode a solid test image as PNG
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        encode(&DynamicImage::ImageRgba8(img), ImageFormat::Png).unwrap()
    }

    /// Image whose row index is stored in the red channel, so crops can be located
    fn row_coded_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |_, y| Rgba([y as u8, 0, 0, 255]));
        encode(&DynamicImage::ImageRgba8(img), ImageFormat::Png).unwrap()
    }

    fn decoded(record: &ImageRecord) -> DynamicImage {
        image::load_from_memory(&record.bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_landscape_window_is_centered() {
        let window = square_crop_window(1200, 800);
        assert_eq!(window, CropWindow { x: 200, y: 0, width: 800, height: 800 });
    }

    #[test]
    fn test_portrait_window_starts_at_upper_third() {
        let window = square_crop_window(600, 900);
        assert_eq!(window, CropWindow { x: 0, y: 100, width: 600, height: 600 });
    }

    #[test]
    fn test_square_window_has_no_offset() {
        let window = square_crop_window(512, 512);
        assert_eq!(window, CropWindow { x: 0, y: 0, width: 512, height: 512 });
    }

    #[test]
    fn test_output_is_min_side_square() {
        for (w, h) in [(120, 80), (80, 120), (64, 64), (1, 9)] {
            let record = normalize_to_square(&png_bytes(w, h), Some("image/png")).unwrap();
            let img = decoded(&record);
            let side = w.min(h);
            assert_eq!(img.dimensions(), (side, side));
        }
    }

    #[test]
    fn test_portrait_crop_keeps_upper_third_rows() {
        // 40x100: side 40, offset (100 - 40) / 3 = 20
        let record = normalize_to_square(&row_coded_png(40, 100), Some("image/png")).unwrap();
        let img = decoded(&record).to_rgba8();
        assert_eq!(img.get_pixel(0, 0)[0], 20);
        assert_eq!(img.get_pixel(0, 39)[0], 59);
    }

    #[test]
    fn test_declared_mime_is_preserved() {
        let record = normalize_to_square(&png_bytes(30, 20), Some("image/jpeg")).unwrap();
        assert_eq!(record.mime_type, "image/jpeg");
        let bytes = record.bytes().unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_undeclared_mime_falls_back_to_png() {
        let record = normalize_to_square(&png_bytes(30, 20), None).unwrap();
        assert_eq!(record.mime_type, "image/png");

        let record = normalize_to_square(&png_bytes(30, 20), Some("application/octet-stream")).unwrap();
        assert_eq!(record.mime_type, "image/png");
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = normalize_to_square(b"definitely not an image", Some("image/png")).unwrap_err();
        assert!(matches!(err, StudioError::Decode(_)));
    }

    #[tokio::test]
    async fn test_normalize_upload_runs_on_blocking_pool() {
        let record = normalize_upload(png_bytes(50, 20), Some("image/png".into())).await.unwrap();
        assert_eq!(decoded(&record).dimensions(), (20, 20));
    }
}
