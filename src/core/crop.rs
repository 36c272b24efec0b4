use crate::core::definition::ItemDefinition;
use image::{DynamicImage, GenericImageView};

/// Derives the presentation region of a source image from its definition.
pub trait CropProvider: Send + Sync {
    fn crop(&self, image: &DynamicImage, definition: &ItemDefinition) -> DynamicImage;
}

/// Crops the "full" context rectangle described by the definition geometry.
///
/// The region starts at `offset` and spans `final_size / scale` source pixels,
/// clamped to the image bounds. An empty region yields the whole image.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometryCrop;

impl CropProvider for GeometryCrop {
    fn crop(&self, image: &DynamicImage, definition: &ItemDefinition) -> DynamicImage {
        let (width, height) = image.dimensions();
        let geometry = &definition.full;
        let scale = if geometry.scale.is_finite() && geometry.scale > 0.0 {
            geometry.scale
        } else {
            1.0
        };

        let x = geometry.offset.x.min(width);
        let y = geometry.offset.y.min(height);
        let region_width = ((geometry.final_size.width as f64 / scale).round() as u32).min(width - x);
        let region_height =
            ((geometry.final_size.height as f64 / scale).round() as u32).min(height - y);

        if region_width == 0 || region_height == 0 {
            return image.clone();
        }

        image.crop_imm(x, y, region_width, region_height)
    }
}
