//! Crop Extractor (Stage 2)
//!
//! Cuts a padded sub-image for each Region and re-encodes it as JPEG.
//! Pure local computation: no I/O, no suspension.
//!
//! # Padding
//! Each side grows by `padding × max(region_width_px, region_height_px)`,
//! then the rectangle is clamped to the image bounds. Crops are never
//! smaller than 1×1.

use crate::error::CropError;
use crate::image_source::{ImagePayload, SourceImage};
use crate::types::{BoundingBox, Crop, Region};
use image::codecs::jpeg::JpegEncoder;

/// Default padding fraction per side
pub const DEFAULT_CROP_PADDING: f32 = 0.08;

/// JPEG quality used for crops sent to the vision services
const CROP_JPEG_QUALITY: u8 = 90;

/// Pixel rectangle within the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Map a normalized box to a padded, clamped pixel rectangle
pub fn padded_rect(
    bounding_box: &BoundingBox,
    image_width: u32,
    image_height: u32,
    padding: f32,
) -> Result<PixelRect, CropError> {
    if image_width == 0 || image_height == 0 {
        return Err(CropError::InvalidRegion("source image has no pixels".to_string()));
    }
    if !bounding_box.is_normalized() || bounding_box.is_degenerate() {
        return Err(CropError::InvalidRegion(format!("{:?}", bounding_box)));
    }

    let img_w = image_width as f32;
    let img_h = image_height as f32;

    let px = bounding_box.x * img_w;
    let py = bounding_box.y * img_h;
    let pw = bounding_box.width * img_w;
    let ph = bounding_box.height * img_h;
    let pad = padding.max(0.0) * pw.max(ph);

    let left = (px - pad).floor().clamp(0.0, img_w - 1.0) as u32;
    let top = (py - pad).floor().clamp(0.0, img_h - 1.0) as u32;
    let right = (px + pw + pad).ceil().clamp(0.0, img_w) as u32;
    let bottom = (py + ph + pad).ceil().clamp(0.0, img_h) as u32;

    Ok(PixelRect {
        x: left,
        y: top,
        width: right.saturating_sub(left).max(1),
        height: bottom.saturating_sub(top).max(1),
    })
}

/// Produce the encoded crop for one region
pub fn extract(source: &SourceImage, region: &Region, padding: f32) -> Result<Crop, CropError> {
    let rect = padded_rect(&region.bounding_box, source.width(), source.height(), padding)?;

    let cropped = source
        .image()
        .crop_imm(rect.x, rect.y, rect.width, rect.height)
        .to_rgb8();

    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, CROP_JPEG_QUALITY)
        .encode_image(&cropped)
        .map_err(|e| CropError::Encode(e.to_string()))?;

    Ok(Crop {
        region_id: region.id,
        image: ImagePayload::new(encoded, "image/jpeg"),
        width: cropped.width(),
        height: cropped.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionId;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn region(bounding_box: BoundingBox) -> Region {
        Region {
            id: RegionId(0),
            bounding_box,
            label_guess: None,
            detector_confidence: None,
        }
    }

    fn source(width: u32, height: u32) -> SourceImage {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        SourceImage::decode(out.into_inner().into()).unwrap()
    }

    #[test]
    fn test_padding_grows_each_side() {
        // 100×50 px region at (100,100) in a 1000×1000 image; pad = 0.1 × 100 = 10
        let bb = BoundingBox::new(0.1, 0.1, 0.1, 0.05);
        let rect = padded_rect(&bb, 1000, 1000, 0.1).unwrap();
        assert_eq!(rect, PixelRect { x: 90, y: 90, width: 120, height: 70 });
    }

    #[test]
    fn test_zero_padding_is_exact() {
        let bb = BoundingBox::new(0.25, 0.5, 0.5, 0.25);
        let rect = padded_rect(&bb, 400, 200, 0.0).unwrap();
        assert_eq!(rect, PixelRect { x: 100, y: 100, width: 200, height: 50 });
    }

    #[test]
    fn test_padding_clamped_at_edges() {
        let bb = BoundingBox::new(0.0, 0.9, 0.2, 0.1);
        let rect = padded_rect(&bb, 100, 100, 0.5).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y + rect.height, 100);
        assert_eq!(rect.x + rect.width, 30);
    }

    #[test]
    fn test_tiny_region_yields_one_pixel() {
        let bb = BoundingBox::new(0.5, 0.5, 0.0001, 0.0001);
        let rect = padded_rect(&bb, 10, 10, 0.0).unwrap();
        assert!(rect.width >= 1 && rect.height >= 1);
    }

    #[test]
    fn test_invalid_boxes_rejected() {
        assert!(padded_rect(&BoundingBox::new(0.5, 0.5, 0.0, 0.2), 10, 10, 0.0).is_err());
        assert!(padded_rect(&BoundingBox::new(0.8, 0.8, 0.5, 0.5), 10, 10, 0.0).is_err());
    }

    #[test]
    fn test_extract_encodes_jpeg() {
        let source = source(200, 100);
        let crop = extract(&source, &region(BoundingBox::new(0.25, 0.25, 0.5, 0.5)), 0.0).unwrap();

        assert_eq!(crop.image.mime_type, "image/jpeg");
        assert_eq!((crop.width, crop.height), (100, 50));
        let decoded = image::load_from_memory(&crop.image.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }
}
