use crate::config::GalleryConfig;
use crate::core::archive::{thumbnail_entry_name, ArchiveAssembler, ArchiveError};
use crate::core::crop::CropProvider;
use crate::core::definition::{FitMode, ItemDefinition};
use crate::services::fetch::{FetchError, Fetcher};
use crate::services::perceptual::{Fingerprint, PerceptualService};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Network error: {0}")]
    Network(#[from] FetchError),

    #[error("Decode error: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Definition has no content identifier")]
    MissingIdentifier,

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Outcome of one successfully processed definition.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub identifier: String,
    pub definition: ItemDefinition,
    /// Fingerprint of the full decoded source, before cropping.
    pub fingerprint: Fingerprint,
    /// Pixel size of the decoded source, not the thumbnail.
    pub source_width: u32,
    pub source_height: u32,
    pub entry_name: String,
}

impl ProcessedRecord {
    pub fn area(&self) -> u64 {
        self.source_width as u64 * self.source_height as u64
    }
}

/// Encoded thumbnail plus what was learned from the source image.
#[derive(Debug, Clone)]
pub struct RenderedThumbnail {
    pub fingerprint: Fingerprint,
    pub source_width: u32,
    pub source_height: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailOptions {
    pub divisor: u32,
    pub quality: u8,
}

impl From<&GalleryConfig> for ThumbnailOptions {
    fn from(config: &GalleryConfig) -> Self {
        Self {
            divisor: config.thumbnail_divisor,
            quality: config.jpeg_quality,
        }
    }
}

/// Fetches, fingerprints, crops, downsizes and stores one definition at a time.
#[derive(Clone)]
pub struct ThumbnailWorker {
    fetcher: Arc<dyn Fetcher>,
    cropper: Arc<dyn CropProvider>,
    archive: Arc<ArchiveAssembler>,
    perceptual: PerceptualService,
    options: ThumbnailOptions,
}

impl ThumbnailWorker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cropper: Arc<dyn CropProvider>,
        archive: Arc<ArchiveAssembler>,
        config: &GalleryConfig,
    ) -> Self {
        Self {
            fetcher,
            cropper,
            archive,
            perceptual: PerceptualService::new(config.hash_size),
            options: ThumbnailOptions::from(config),
        }
    }

    /// Process one definition end to end and insert its thumbnail.
    ///
    /// The fetch is the only await point; the image work runs on the
    /// blocking pool and holds the archive lock only for the insert.
    pub async fn process(&self, definition: ItemDefinition) -> Result<ProcessedRecord, ProcessingError> {
        let identifier = definition
            .identifier()
            .ok_or(ProcessingError::MissingIdentifier)?
            .to_string();

        let bytes = self.fetcher.fetch(&definition.source).await?;
        tracing::debug!(identifier = %identifier, bytes = bytes.len(), "fetched source");

        let worker = self.clone();
        tokio::task::spawn_blocking(move || worker.render_and_store(identifier, definition, &bytes))
            .await
            .map_err(|e| ProcessingError::Worker(e.to_string()))?
    }

    /// Decode, fingerprint, crop, resize and encode without touching the archive.
    pub fn render(&self, definition: &ItemDefinition, bytes: &[u8]) -> Result<RenderedThumbnail, ProcessingError> {
        let source = image::load_from_memory(bytes).map_err(ProcessingError::Decode)?;
        let (source_width, source_height) = source.dimensions();

        let fingerprint = self.perceptual.fingerprint(&source);
        let cropped = self.cropper.crop(&source, definition);
        let thumbnail = self.resize(&cropped, definition)?;
        let bytes = self.encode(&thumbnail)?;

        Ok(RenderedThumbnail {
            fingerprint,
            source_width,
            source_height,
            bytes,
        })
    }

    fn render_and_store(
        &self,
        identifier: String,
        definition: ItemDefinition,
        bytes: &[u8],
    ) -> Result<ProcessedRecord, ProcessingError> {
        let rendered = self.render(&definition, bytes)?;
        let entry_name = thumbnail_entry_name(&identifier);
        self.archive.insert(&entry_name, &rendered.bytes)?;
        tracing::debug!(identifier = %identifier, entry = %entry_name, bytes = rendered.bytes.len(), "stored thumbnail");

        Ok(ProcessedRecord {
            identifier,
            definition,
            fingerprint: rendered.fingerprint,
            source_width: rendered.source_width,
            source_height: rendered.source_height,
            entry_name,
        })
    }

    fn resize(&self, image: &DynamicImage, definition: &ItemDefinition) -> Result<DynamicImage, ProcessingError> {
        let target = definition.full.final_size;
        let width = target.width / self.options.divisor;
        let height = target.height / self.options.divisor;
        if width == 0 || height == 0 {
            return Err(ProcessingError::Encoding(format!(
                "thumbnail size {}x{} is empty for final size {}x{}",
                width, height, target.width, target.height
            )));
        }

        // Lanczos3 for high-quality downscaling
        let resized = match definition.full.fit {
            FitMode::Stretch => image.resize_exact(width, height, FilterType::Lanczos3),
            FitMode::Contain => image.resize(width, height, FilterType::Lanczos3),
        };
        Ok(resized)
    }

    fn encode(&self, image: &DynamicImage) -> Result<Vec<u8>, ProcessingError> {
        let rgb_img = image.to_rgb8();
        let mut bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut bytes, self.options.quality);
        rgb_img
            .write_with_encoder(encoder)
            .map_err(|e| ProcessingError::Encoding(e.to_string()))?;
        Ok(bytes)
    }
}
