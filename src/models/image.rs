//! Types describing image derivatives and validation outcomes.

use serde::{Deserialize, Serialize};

/// Resize strategy mapping the source aspect ratio onto target dimensions.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Scale to cover both dimensions, cropping the overflow.
    #[default]
    Cover,
    /// Scale to fit within both dimensions, letterboxing the remainder.
    Contain,
    /// Stretch to exactly the target dimensions, ignoring aspect ratio.
    Fill,
    /// Scale to fit within both dimensions, no letterboxing.
    Inside,
    /// Scale so both dimensions are at least the target, no cropping.
    Outside,
}

/// Anchor position used when `Cover` crops the resized image.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    #[default]
    Center,
    North,
    South,
    East,
    West,
}

/// Target encoding for a derivative.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Avif,
}

impl OutputFormat {
    /// File extension used in derivative keys.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    /// MIME type for HTTP responses and backend metadata.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }
}

/// A named derivative requested from the pipeline.
///
/// Immutable per invocation. The derivative key is a deterministic function
/// of the source base name, `name`, and the output format, so regenerating
/// the same spec overwrites rather than duplicates.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DerivativeSpec {
    /// Name embedded in the derivative key (e.g. `small`, `hero`).
    pub name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub fit: FitMode,
    /// Encoder quality 1-100; encoder default when absent.
    pub quality: Option<u8>,
    /// Target format; keeps the source format when absent.
    pub format: Option<OutputFormat>,
}

/// In-memory transform options for [`process_image`].
///
/// [`process_image`]: crate::services::images::process_image
#[derive(Clone, Debug, Default)]
pub struct ProcessOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: FitMode,
    pub gravity: Gravity,
    /// RGBA fill color used for `Contain` letterboxing.
    pub background: Option<[u8; 4]>,
    pub quality: Option<u8>,
    pub format: Option<OutputFormat>,
}

/// Decoded facts about a validated image.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ValidationDetails {
    pub format: Option<String>,
    pub size_bytes: Option<u64>,
    pub dimensions: Option<Dimensions>,
    /// Heuristic 0-100 score derived from bits per pixel.
    pub quality_score: Option<u8>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Structured outcome of image validation.
///
/// Expected validation failures are reported here, never as errors; the
/// pipeline only rejects an asset when `valid` is false. Warnings are
/// advisory and do not block processing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub details: ValidationDetails,
}
