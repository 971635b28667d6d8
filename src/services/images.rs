//! Image validation and derivative pipeline.
//!
//! An uploaded asset flows: validate → promote → derivatives. Validation is
//! a pure check over bytes that reports a structured result and never
//! touches storage. Derivative generation decodes the source once, then
//! transforms and uploads each requested size independently; a failure on
//! one size is logged and skipped so the batch degrades to partial success.
//! Sizes are processed sequentially to bound memory to one decoded bitmap
//! at a time.

use crate::{
    backend::BackendError,
    models::{
        image::{
            DerivativeSpec, Dimensions, FitMode, Gravity, OutputFormat, ProcessOptions,
            ValidationDetails, ValidationResult,
        },
        object::UploadResult,
    },
    services::{keys, store::ObjectStore},
};
use bytes::Bytes;
use image::{
    DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, Rgba, RgbaImage,
    codecs::{
        avif::AvifEncoder, jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder,
    },
    imageops::FilterType,
};
use std::{collections::HashMap, io::Cursor, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

/// Upload size ceiling.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;
/// Hard minimum for either dimension; below this the image is rejected.
pub const MIN_DIMENSION: u32 = 200;
/// Recommended minimum; below this the image passes with a warning.
pub const RECOMMENDED_DIMENSION: u32 = 800;
/// Encoder quality used when a spec does not supply one.
pub const DEFAULT_QUALITY: u8 = 80;

const ALLOWED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "gif", "avif"];

/// Derivatives land under these prefixes of the conventional namespace.
pub const THUMBNAIL_PREFIX: &str = "public/thumbnails";
pub const OPTIMIZED_PREFIX: &str = "public/optimized";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("could not decode image: {0}")]
    Decode(image::ImageError),
    #[error("could not encode image: {0}")]
    Encode(image::ImageError),
    #[error("derivative dimensions must be non-zero")]
    InvalidDimensions,
    #[error(transparent)]
    Storage(#[from] BackendError),
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Heuristic 0-100 quality score from bits per pixel.
///
/// Lossy formats score roughly linearly with bpp; WebP reaches comparable
/// quality at lower bpp than JPEG, so its coefficient is higher. PNG is
/// lossless and floors at a higher baseline.
fn quality_score(format: Option<image::ImageFormat>, size_bytes: usize, width: u32, height: u32) -> u8 {
    let pixels = (width as f64) * (height as f64);
    if pixels <= 0.0 {
        return 0;
    }
    let bpp = size_bytes as f64 * 8.0 / pixels;
    let score = match format {
        Some(image::ImageFormat::Jpeg) => bpp * 12.5,
        Some(image::ImageFormat::WebP) => bpp * 16.0,
        Some(image::ImageFormat::Png) => 70.0 + bpp * 2.0,
        _ => bpp * 10.0,
    };
    score.clamp(0.0, 100.0).round() as u8
}

fn output_format_for(format: image::ImageFormat) -> Option<OutputFormat> {
    match format {
        image::ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        image::ImageFormat::Png => Some(OutputFormat::Png),
        image::ImageFormat::WebP => Some(OutputFormat::WebP),
        image::ImageFormat::Avif => Some(OutputFormat::Avif),
        _ => None,
    }
}

/// Validate an uploaded image against size, extension, and dimension rules.
///
/// Returns a structured result; expected failures are itemized in `errors`,
/// never raised. Storage is not touched.
pub fn validate(data: &[u8], filename: &str) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut details = ValidationDetails {
        size_bytes: Some(data.len() as u64),
        ..Default::default()
    };

    if data.len() as u64 > MAX_IMAGE_BYTES {
        errors.push(format!(
            "file size {} bytes exceeds the {} byte maximum",
            data.len(),
            MAX_IMAGE_BYTES
        ));
    }

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => {}
        Some(ext) => errors.push(format!(
            "file extension `.{ext}` is not allowed (expected one of {})",
            ALLOWED_EXTENSIONS.join(", ")
        )),
        None => errors.push("filename has no extension".to_string()),
    }

    let format = image::guess_format(data).ok();
    details.format = format.map(|f| f.to_mime_type().to_string());

    match image::load_from_memory(data) {
        Ok(img) => {
            let (width, height) = img.dimensions();
            details.dimensions = Some(Dimensions { width, height });
            details.quality_score = Some(quality_score(format, data.len(), width, height));
            if width < MIN_DIMENSION || height < MIN_DIMENSION {
                errors.push(format!(
                    "image is {width}x{height}, below the {MIN_DIMENSION}x{MIN_DIMENSION} minimum"
                ));
            } else if width < RECOMMENDED_DIMENSION || height < RECOMMENDED_DIMENSION {
                warnings.push(format!(
                    "image is {width}x{height}, below the recommended \
                     {RECOMMENDED_DIMENSION}x{RECOMMENDED_DIMENSION}"
                ));
            }
        }
        Err(err) => errors.push(format!("could not decode image: {err}")),
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
        details,
    }
}

fn crop_at(img: &DynamicImage, target_w: u32, target_h: u32, gravity: Gravity) -> DynamicImage {
    let (w, h) = img.dimensions();
    let target_w = target_w.min(w);
    let target_h = target_h.min(h);
    let x = match gravity {
        Gravity::West => 0,
        Gravity::East => w - target_w,
        _ => (w - target_w) / 2,
    };
    let y = match gravity {
        Gravity::North => 0,
        Gravity::South => h - target_h,
        _ => (h - target_h) / 2,
    };
    img.crop_imm(x, y, target_w, target_h)
}

fn apply_fit(img: &DynamicImage, opts: &ProcessOptions) -> ImageResult<DynamicImage> {
    if opts.width == Some(0) || opts.height == Some(0) {
        return Err(ImageError::InvalidDimensions);
    }
    let (source_w, source_h) = img.dimensions();
    Ok(match (opts.width, opts.height) {
        (None, None) => img.clone(),
        (Some(w), None) => img.resize(w, u32::MAX, FilterType::Lanczos3),
        (None, Some(h)) => img.resize(u32::MAX, h, FilterType::Lanczos3),
        (Some(w), Some(h)) => match opts.fit {
            FitMode::Fill => img.resize_exact(w, h, FilterType::Lanczos3),
            FitMode::Inside => img.resize(w, h, FilterType::Lanczos3),
            FitMode::Outside | FitMode::Cover => {
                let scale = f64::max(
                    w as f64 / source_w as f64,
                    h as f64 / source_h as f64,
                );
                let scaled_w = ((source_w as f64 * scale).round() as u32).max(1);
                let scaled_h = ((source_h as f64 * scale).round() as u32).max(1);
                let resized = img.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3);
                if opts.fit == FitMode::Cover {
                    crop_at(&resized, w, h, opts.gravity)
                } else {
                    resized
                }
            }
            FitMode::Contain => {
                let inner = img.resize(w, h, FilterType::Lanczos3);
                let background = Rgba(opts.background.unwrap_or([255, 255, 255, 255]));
                let mut canvas = RgbaImage::from_pixel(w, h, background);
                let x = i64::from((w - inner.width()) / 2);
                let y = i64::from((h - inner.height()) / 2);
                image::imageops::overlay(&mut canvas, &inner, x, y);
                DynamicImage::ImageRgba8(canvas)
            }
        },
    })
}

fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> ImageResult<Vec<u8>> {
    let quality = quality.clamp(1, 100);
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    let result = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut cursor, quality).write_image(
                &rgb,
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )
        }
        OutputFormat::Png => {
            let rgba = img.to_rgba8();
            PngEncoder::new(&mut cursor).write_image(
                &rgba,
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )
        }
        OutputFormat::WebP => {
            // Lossless WebP; the quality knob applies to lossy formats only.
            let rgba = img.to_rgba8();
            WebPEncoder::new_lossless(&mut cursor).write_image(
                &rgba,
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )
        }
        OutputFormat::Avif => {
            let rgba = img.to_rgba8();
            AvifEncoder::new_with_speed_quality(&mut cursor, 6, quality).write_image(
                &rgba,
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )
        }
    };
    result.map_err(ImageError::Encode)?;
    Ok(out)
}

/// Transform bytes in memory: optional resize honoring the fit mode, anchor
/// gravity, and letterbox background, then optional re-encode. Pure; no I/O.
pub fn process_image(data: &[u8], opts: &ProcessOptions) -> ImageResult<Vec<u8>> {
    let img = image::load_from_memory(data).map_err(ImageError::Decode)?;
    let source_format = image::guess_format(data).ok().and_then(output_format_for);
    let transformed = apply_fit(&img, opts)?;
    let format = opts
        .format
        .or(source_format)
        .unwrap_or(OutputFormat::Png);
    encode(&transformed, format, opts.quality.unwrap_or(DEFAULT_QUALITY))
}

/// Built-in thumbnail ladder used by [`ImageService::generate_thumbnails`].
pub fn default_thumbnail_specs() -> Vec<DerivativeSpec> {
    [("small", 150u32), ("medium", 300), ("large", 600)]
        .into_iter()
        .map(|(name, edge)| DerivativeSpec {
            name: name.to_string(),
            width: Some(edge),
            height: Some(edge),
            fit: FitMode::Cover,
            quality: Some(DEFAULT_QUALITY),
            format: Some(OutputFormat::WebP),
        })
        .collect()
}

#[derive(Clone)]
pub struct ImageService {
    store: Arc<ObjectStore>,
}

impl ImageService {
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self { store }
    }

    /// Generate one derivative per spec from the object at `source_key`.
    ///
    /// The source is decoded once and reused across specs. A spec that
    /// fails to transform or upload is logged and omitted; the returned map
    /// holds `spec name -> url` for the successes only, and callers must
    /// treat a missing name as "not generated", not as an overall failure.
    pub async fn create_responsive_images(
        &self,
        source_key: &str,
        specs: &[DerivativeSpec],
    ) -> ImageResult<HashMap<String, String>> {
        let (data, _) = self.store.get(source_key).await?;
        let img = image::load_from_memory(&data).map_err(ImageError::Decode)?;
        let source_format = image::guess_format(&data).ok().and_then(output_format_for);

        let mut urls = HashMap::new();
        for spec in specs {
            match self.render_spec(&img, source_format, source_key, spec).await {
                Ok(url) => {
                    urls.insert(spec.name.clone(), url);
                }
                Err(err) => {
                    warn!(
                        "skipping derivative `{}` of `{source_key}`: {err}",
                        spec.name
                    );
                }
            }
        }
        Ok(urls)
    }

    async fn render_spec(
        &self,
        img: &DynamicImage,
        source_format: Option<OutputFormat>,
        source_key: &str,
        spec: &DerivativeSpec,
    ) -> ImageResult<String> {
        let format = spec
            .format
            .or(source_format)
            .unwrap_or(OutputFormat::WebP);
        let transformed = apply_fit(
            img,
            &ProcessOptions {
                width: spec.width,
                height: spec.height,
                fit: spec.fit,
                ..Default::default()
            },
        )?;
        let encoded = encode(&transformed, format, spec.quality.unwrap_or(DEFAULT_QUALITY))?;
        let key = keys::derivative_key(THUMBNAIL_PREFIX, source_key, &spec.name, format);
        debug!("storing derivative `{}` at {key}", spec.name);
        self.store
            .put(&key, Bytes::from(encoded), format.mime_type(), &HashMap::new())
            .await?;
        Ok(self.store.url_for(&key).await)
    }

    /// Generate the built-in thumbnail ladder for `source_key`.
    pub async fn generate_thumbnails(
        &self,
        source_key: &str,
    ) -> ImageResult<HashMap<String, String>> {
        self.create_responsive_images(source_key, &default_thumbnail_specs())
            .await
    }

    /// Recompress the source into a single bandwidth-friendly derivative
    /// (WebP by default) under the optimized prefix.
    pub async fn optimize_image(
        &self,
        source_key: &str,
        format: Option<OutputFormat>,
        quality: Option<u8>,
    ) -> ImageResult<UploadResult> {
        let format = format.unwrap_or(OutputFormat::WebP);
        let key = keys::derivative_key(OPTIMIZED_PREFIX, source_key, "optimized", format);
        self.store_derivative(
            source_key,
            &key,
            &ProcessOptions {
                format: Some(format),
                quality,
                ..Default::default()
            },
            format,
        )
        .await
    }

    /// One-off custom-dimension derivative. The key encodes the dimensions,
    /// so repeated calls with identical dimensions overwrite.
    pub async fn resize_image(
        &self,
        source_key: &str,
        width: u32,
        height: u32,
        opts: &ProcessOptions,
    ) -> ImageResult<UploadResult> {
        let (data, _) = self.store.get(source_key).await?;
        let format = opts
            .format
            .or_else(|| image::guess_format(&data).ok().and_then(output_format_for))
            .unwrap_or(OutputFormat::WebP);
        let mut opts = opts.clone();
        opts.width = Some(width);
        opts.height = Some(height);
        opts.format = Some(format);

        let encoded = process_image(&data, &opts)?;
        let key = keys::derivative_key(
            OPTIMIZED_PREFIX,
            source_key,
            &format!("{width}x{height}"),
            format,
        );
        let record = self
            .store
            .put(&key, Bytes::from(encoded), format.mime_type(), &HashMap::new())
            .await?;
        let url = self.store.url_for(&record.key).await;
        Ok(UploadResult {
            key: record.key,
            url,
            size: record.size,
            content_type: record.content_type,
            metadata: record.metadata,
        })
    }

    async fn store_derivative(
        &self,
        source_key: &str,
        key: &str,
        opts: &ProcessOptions,
        format: OutputFormat,
    ) -> ImageResult<UploadResult> {
        let (data, _) = self.store.get(source_key).await?;
        let encoded = process_image(&data, opts)?;
        let record = self
            .store
            .put(key, Bytes::from(encoded), format.mime_type(), &HashMap::new())
            .await?;
        let url = self.store.url_for(&record.key).await;
        Ok(UploadResult {
            key: record.key,
            url,
            size: record.size,
            content_type: record.content_type,
            metadata: record.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::LocalBackend, services::store::RetryPolicy};
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([180, 90, 30, 255]),
        ));
        encode(&img, OutputFormat::Png, 100).unwrap()
    }

    fn webp_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([10, 120, 220, 255]),
        ));
        encode(&img, OutputFormat::WebP, 100).unwrap()
    }

    fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
        image::load_from_memory(data).unwrap().dimensions()
    }

    async fn service_with_source(key: &str, data: Vec<u8>) -> (TempDir, ImageService) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let store = Arc::new(ObjectStore::new(None, backend, RetryPolicy::default()));
        store
            .put(key, Bytes::from(data), "image/png", &HashMap::new())
            .await
            .unwrap();
        (dir, ImageService::new(store))
    }

    #[test]
    fn small_image_fails_dimension_check() {
        let result = validate(&png_bytes(100, 100), "tiny.png");
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("below the 200x200")));
        assert_eq!(
            result.details.dimensions,
            Some(Dimensions { width: 100, height: 100 })
        );
    }

    #[test]
    fn oversized_file_fails_size_check() {
        let data = vec![0u8; 6 * 1024 * 1024];
        let result = validate(&data, "big.jpg");
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("exceeds")));
    }

    #[test]
    fn good_webp_passes_without_warnings() {
        let data = webp_bytes(1200, 1200);
        assert!((data.len() as u64) < MAX_IMAGE_BYTES);
        let result = validate(&data, "photo.webp");
        assert!(result.valid, "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn mid_sized_image_warns_but_passes() {
        let result = validate(&png_bytes(400, 400), "mid.png");
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn disallowed_extension_is_an_error() {
        let result = validate(&png_bytes(800, 800), "archive.tiff");
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains(".tiff")));
    }

    #[test]
    fn png_quality_score_floors_high() {
        let result = validate(&png_bytes(800, 800), "p.png");
        assert!(result.details.quality_score.unwrap() >= 70);
    }

    #[test]
    fn fit_modes_produce_expected_dimensions() {
        let source = png_bytes(200, 100);
        let case = |fit: FitMode| ProcessOptions {
            width: Some(100),
            height: Some(100),
            fit,
            ..Default::default()
        };

        let cover = process_image(&source, &case(FitMode::Cover)).unwrap();
        assert_eq!(decoded_dimensions(&cover), (100, 100));

        let contain = process_image(&source, &case(FitMode::Contain)).unwrap();
        assert_eq!(decoded_dimensions(&contain), (100, 100));

        let fill = process_image(&source, &case(FitMode::Fill)).unwrap();
        assert_eq!(decoded_dimensions(&fill), (100, 100));

        let inside = process_image(&source, &case(FitMode::Inside)).unwrap();
        assert_eq!(decoded_dimensions(&inside), (100, 50));

        let outside = process_image(&source, &case(FitMode::Outside)).unwrap();
        assert_eq!(decoded_dimensions(&outside), (200, 100));
    }

    #[test]
    fn single_dimension_preserves_aspect_ratio() {
        let source = png_bytes(400, 200);
        let out = process_image(
            &source,
            &ProcessOptions {
                width: Some(100),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(decoded_dimensions(&out), (100, 50));
    }

    #[test]
    fn reencode_without_resize_changes_format_only() {
        let source = png_bytes(300, 300);
        let out = process_image(
            &source,
            &ProcessOptions {
                format: Some(OutputFormat::Jpeg),
                quality: Some(70),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(decoded_dimensions(&out), (300, 300));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let source = png_bytes(100, 100);
        let err = process_image(
            &source,
            &ProcessOptions {
                width: Some(0),
                height: Some(50),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::InvalidDimensions));
    }

    #[tokio::test]
    async fn responsive_batch_degrades_to_partial_success() {
        let (_dir, images) =
            service_with_source("public/products/photo.png", png_bytes(800, 600)).await;
        let specs = vec![
            DerivativeSpec {
                name: "small".into(),
                width: Some(150),
                height: Some(150),
                fit: FitMode::Cover,
                quality: None,
                format: Some(OutputFormat::WebP),
            },
            DerivativeSpec {
                name: "broken".into(),
                width: Some(0),
                height: Some(0),
                fit: FitMode::Cover,
                quality: None,
                format: None,
            },
            DerivativeSpec {
                name: "large".into(),
                width: Some(600),
                height: None,
                fit: FitMode::Inside,
                quality: None,
                format: Some(OutputFormat::Jpeg),
            },
        ];

        let urls = images
            .create_responsive_images("public/products/photo.png", &specs)
            .await
            .unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains_key("small"));
        assert!(urls.contains_key("large"));
        assert!(!urls.contains_key("broken"));
    }

    #[tokio::test]
    async fn derivative_keys_are_deterministic() {
        let (_dir, images) =
            service_with_source("public/products/photo.png", png_bytes(800, 600)).await;
        let first = images
            .generate_thumbnails("public/products/photo.png")
            .await
            .unwrap();
        let second = images
            .generate_thumbnails("public/products/photo.png")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first["small"],
            "/api/files/public/thumbnails/photo-small.webp"
        );
    }

    #[tokio::test]
    async fn optimize_writes_under_optimized_prefix() {
        let (_dir, images) =
            service_with_source("public/products/photo.png", png_bytes(800, 600)).await;
        let result = images
            .optimize_image("public/products/photo.png", None, None)
            .await
            .unwrap();
        assert_eq!(result.key, "public/optimized/photo-optimized.webp");
        assert_eq!(result.content_type, "image/webp");
    }

    #[tokio::test]
    async fn resize_encodes_dimensions_into_key() {
        let (_dir, images) =
            service_with_source("public/products/photo.png", png_bytes(800, 600)).await;
        let result = images
            .resize_image(
                "public/products/photo.png",
                320,
                240,
                &ProcessOptions {
                    fit: FitMode::Fill,
                    format: Some(OutputFormat::Jpeg),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.key, "public/optimized/photo-320x240.jpg");
        let (data, _) = images.store.get(&result.key).await.unwrap();
        assert_eq!(decoded_dimensions(&data), (320, 240));
    }

    #[tokio::test]
    async fn missing_source_is_a_storage_error() {
        let (_dir, images) = service_with_source("public/products/a.png", png_bytes(300, 300)).await;
        let err = images
            .generate_thumbnails("public/products/missing.png")
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Storage(e) if e.is_not_found()));
    }
}
