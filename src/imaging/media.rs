/// Image records and data-URI conversion
///
/// Every image flowing through the studio (uploads, results, session
/// versions, history entries) is an [`ImageRecord`]: a base64 payload plus
/// its mime type. History and the edit session store the data-URI form.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};

/// Raster type used when a file or URI does not declare one
pub const DEFAULT_MIME: &str = "image/png";

/// An encoded image, immutable once produced
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Base64 (standard alphabet, padded) of the encoded file
    pub base64_payload: String,
    /// e.g. "image/jpeg"
    pub mime_type: String,
}

impl ImageRecord {
    /// Wrap raw encoded bytes
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            base64_payload: BASE64.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// Decode the payload back into file bytes
    pub fn bytes(&self) -> StudioResult<Vec<u8>> {
        BASE64
            .decode(self.base64_payload.as_bytes())
            .map_err(|e| StudioError::Decode(format!("invalid base64 payload: {e}")))
    }

    /// `data:{mime};base64,{payload}`
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_payload)
    }

    /// Parse a data URI. A header without a mime type resolves to PNG.
    pub fn from_data_uri(uri: &str) -> StudioResult<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| StudioError::Decode("not a data URI".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| StudioError::Decode("data URI has no payload".into()))?;

        let mime = header
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME);

        Ok(Self {
            base64_payload: payload.to_string(),
            mime_type: mime.to_string(),
        })
    }
}

/// Map a mime type to an encoder the `image` crate can write.
///
/// Returns `None` for types we cannot re-encode; callers fall back to PNG.
pub fn format_for_mime(mime: &str) -> Option<ImageFormat> {
    let format = ImageFormat::from_mime_type(mime)?;
    format.writing_enabled().then_some(format)
}

/// Guess a mime type from a file extension (used by the CLI for uploads)
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
