/// Export crops for finished results
///
/// Results are square; social formats need 9:16 stories or 4:5 posts. The
/// crop is centered along the axis being trimmed and always re-encoded as
/// PNG.

use std::fmt;
use std::str::FromStr;

use image::{imageops::FilterType, ImageFormat};

use super::media::ImageRecord;
use super::normalize::{encode, CropWindow};
use crate::error::{StudioError, StudioResult};

/// Widest export produced from the history screen
pub const HISTORY_EXPORT_MAX_WIDTH: u32 = 2048;

/// Target aspect ratio `width:height`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const STORY: AspectRatio = AspectRatio { width: 9, height: 16 };
    pub const POST: AspectRatio = AspectRatio { width: 4, height: 5 };
    pub const SQUARE: AspectRatio = AspectRatio { width: 1, height: 1 };

    pub fn ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// File name tag, `9:16` -> `9x16`
    pub fn tag(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StudioError::Validation(format!("Invalid aspect ratio '{s}', expected e.g. 9:16."));
        let (w, h) = s.split_once(':').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// A PNG ready to be saved under `file_name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// `{base}-{aspectTag}.png`
pub fn export_file_name(base: &str, aspect: AspectRatio) -> String {
    format!("{}-{}.png", base, aspect.tag())
}

/// Compute the centered source rectangle for a target ratio.
pub fn aspect_crop_window(width: u32, height: u32, target: f64) -> CropWindow {
    let original = f64::from(width) / f64::from(height);

    if target < original {
        // Narrower target: trim the sides
        let s_width = (f64::from(height) * target).round() as u32;
        let s_width = s_width.clamp(1, width);
        CropWindow {
            x: (width - s_width) / 2,
            y: 0,
            width: s_width,
            height,
        }
    } else if target > original {
        // Wider target: trim top and bottom
        let s_height = (f64::from(width) / target).round() as u32;
        let s_height = s_height.clamp(1, height);
        CropWindow {
            x: 0,
            y: (height - s_height) / 2,
            width,
            height: s_height,
        }
    } else {
        CropWindow { x: 0, y: 0, width, height }
    }
}

/// Crop a result image to `aspect` and name it for download
pub fn crop_for_export(source: &ImageRecord, aspect: AspectRatio, base: &str) -> StudioResult<ExportedImage> {
    let bytes = crop_to_aspect(source, aspect, None)?;
    Ok(ExportedImage {
        file_name: export_file_name(base, aspect),
        bytes,
    })
}

/// History-screen export: same crop, width capped at 2048 px.
///
/// Named `Masterbot_post_{id8}.png` for 1:1, `Masterbot_story_{id8}.png` for 9:16
/// and `Masterbot_{w}x{h}_{id8}.png` for any other ratio.
pub fn crop_history_export(source: &ImageRecord, aspect: AspectRatio, entry_id: &str) -> StudioResult<ExportedImage> {
    let bytes = crop_to_aspect(source, aspect, Some(HISTORY_EXPORT_MAX_WIDTH))?;
    Ok(ExportedImage {
        file_name: format!("Masterbot_{}_{}.png", history_label(aspect), short_id(entry_id)),
        bytes,
    })
}

/// The history entry as generated, named after its id
pub fn history_original_file_name(entry_id: &str) -> String {
    format!("Masterbot_original_{}.png", short_id(entry_id))
}

fn history_label(aspect: AspectRatio) -> String {
    match aspect {
        AspectRatio::SQUARE => "post".to_string(),
        AspectRatio::STORY => "story".to_string(),
        other => other.tag(),
    }
}

fn short_id(entry_id: &str) -> String {
    entry_id.chars().take(8).collect()
}

/// Crop and re-encode as PNG, optionally scaling down to `max_width`.
pub fn crop_to_aspect(source: &ImageRecord, aspect: AspectRatio, max_width: Option<u32>) -> StudioResult<Vec<u8>> {
    let raw = source.bytes()?;
    let img = image::load_from_memory(&raw)
        .map_err(|e| StudioError::Decode(format!("cannot load image for cropping: {e}")))?;

    if img.width() == 0 || img.height() == 0 {
        return Err(StudioError::Canvas("source image has no pixels".into()));
    }

    let target = aspect.ratio();
    let window = aspect_crop_window(img.width(), img.height(), target);
    let mut cropped = img.crop_imm(window.x, window.y, window.width, window.height);

    if let Some(max) = max_width {
        if cropped.width() > max {
            let new_height = ((f64::from(max) / target).round() as u32).max(1);
            cropped = cropped.resize_exact(max, new_height, FilterType::Lanczos3);
        }
    }

    tracing::debug!(
        "cropped {}x{} to {} -> {}x{}",
        img.width(),
        img.height(),
        aspect,
        cropped.width(),
        cropped.height()
    );

    encode(&cropped, ImageFormat::Png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::normalize::tests::png_bytes;
    use image::GenericImageView;

    fn record(width: u32, height: u32) -> ImageRecord {
        ImageRecord::from_bytes(&png_bytes(width, height), "image/png")
    }

    fn dims(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    #[test]
    fn test_parse_aspect_ratio() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::STORY);
        assert_eq!(" 4 : 5 ".parse::<AspectRatio>().unwrap(), AspectRatio::POST);
        assert!("9x16".parse::<AspectRatio>().is_err());
        assert!("0:1".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn test_file_name_uses_x_separator() {
        assert_eq!(export_file_name("masterbot-model", AspectRatio::STORY), "masterbot-model-9x16.png");
    }

    #[test]
    fn test_story_from_square_trims_sides() {
        let window = aspect_crop_window(1600, 1600, 9.0 / 16.0);
        assert_eq!(window, CropWindow { x: 350, y: 0, width: 900, height: 1600 });
    }

    #[test]
    fn test_wide_target_trims_top_and_bottom() {
        let window = aspect_crop_window(800, 800, 16.0 / 9.0);
        assert_eq!(window, CropWindow { x: 0, y: 175, width: 800, height: 450 });
    }

    #[test]
    fn test_equal_ratio_is_untouched() {
        let window = aspect_crop_window(400, 500, 0.8);
        assert_eq!(window, CropWindow { x: 0, y: 0, width: 400, height: 500 });
    }

    #[test]
    fn test_crop_for_export_produces_png() {
        let exported = crop_for_export(&record(160, 160), AspectRatio::POST, "masterbot").unwrap();
        assert_eq!(exported.file_name, "masterbot-4x5.png");
        assert_eq!(image::guess_format(&exported.bytes).unwrap(), ImageFormat::Png);
        assert_eq!(dims(&exported.bytes), (128, 160));
    }

    #[test]
    fn test_history_export_caps_width() {
        let exported = crop_history_export(&record(2400, 2400), AspectRatio::SQUARE, "1712345678901abcdefghi").unwrap();
        assert_eq!(exported.file_name, "Masterbot_post_17123456.png");
        assert_eq!(dims(&exported.bytes), (2048, 2048));

        let story = crop_history_export(&record(90, 160), AspectRatio::STORY, "abc").unwrap();
        assert_eq!(story.file_name, "Masterbot_story_abc.png");
        assert_eq!(dims(&story.bytes), (90, 160));
    }

    #[test]
    fn test_history_export_names_differ_per_ratio() {
        let source = record(200, 200);
        let id = "1712345678901abcdefghi";
        let names: Vec<String> = [AspectRatio::SQUARE, AspectRatio::STORY, AspectRatio::POST, AspectRatio { width: 16, height: 9 }]
            .into_iter()
            .map(|aspect| crop_history_export(&source, aspect, id).unwrap().file_name)
            .collect();

        assert_eq!(
            names,
            [
                "Masterbot_post_17123456.png",
                "Masterbot_story_17123456.png",
                "Masterbot_4x5_17123456.png",
                "Masterbot_16x9_17123456.png",
            ]
        );
        assert_eq!(history_original_file_name(id), "Masterbot_original_17123456.png");
    }

    #[test]
    fn test_undecodable_source_is_reported() {
        let bad = ImageRecord::from_bytes(b"nope", "image/png");
        assert!(matches!(
            crop_for_export(&bad, AspectRatio::STORY, "x"),
            Err(StudioError::Decode(_))
        ));
    }
}
