/// Client-side image transforms
///
/// This module handles:
/// - Image records and data URIs
/// - Smart crop-to-square of uploads
/// - Aspect-ratio crops for export

pub mod media;
pub mod normalize;
pub mod crop;

pub use crop::{AspectRatio, ExportedImage};
pub use media::ImageRecord;
