//! Synthetic test photos
//!
//! Each product region is painted a distinct palette color on a grey
//! background, so a stub service can tell which region a crop came from by
//! sampling the crop's center pixel.

use image::{ImageFormat, Rgb, RgbImage};
use photoid::{BoundingBox, ImagePayload};
use std::io::Cursor;

pub const SCENE_WIDTH: u32 = 600;
pub const SCENE_HEIGHT: u32 = 300;

const BACKGROUND: [u8; 3] = [128, 128, 128];

/// Region colors, indexed by detector order
pub const PALETTE: [[u8; 3]; 6] = [
    [220, 40, 40],
    [40, 200, 40],
    [40, 40, 220],
    [230, 230, 40],
    [200, 40, 200],
    [40, 210, 210],
];

/// `count` non-overlapping boxes in a row (max 6)
pub fn row_of_boxes(count: usize) -> Vec<BoundingBox> {
    assert!(count <= PALETTE.len(), "at most {} regions", PALETTE.len());
    (0..count)
        .map(|i| BoundingBox::new(0.05 + i as f32 * 0.16, 0.3, 0.12, 0.4))
        .collect()
}

/// PNG photo with each box filled with its palette color
pub fn scene_png(boxes: &[BoundingBox]) -> Vec<u8> {
    let mut img = RgbImage::from_pixel(SCENE_WIDTH, SCENE_HEIGHT, Rgb(BACKGROUND));

    for (index, b) in boxes.iter().enumerate() {
        let color = Rgb(PALETTE[index % PALETTE.len()]);
        let x0 = (b.x * SCENE_WIDTH as f32) as u32;
        let y0 = (b.y * SCENE_HEIGHT as f32) as u32;
        let x1 = ((b.x + b.width) * SCENE_WIDTH as f32) as u32;
        let y1 = ((b.y + b.height) * SCENE_HEIGHT as f32) as u32;
        for y in y0..y1.min(SCENE_HEIGHT) {
            for x in x0..x1.min(SCENE_WIDTH) {
                img.put_pixel(x, y, color);
            }
        }
    }

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Which palette region a crop shows
pub fn region_index(crop: &ImagePayload) -> usize {
    let img = image::load_from_memory(&crop.bytes)
        .expect("crop should decode")
        .to_rgb8();
    let center = img.get_pixel(img.width() / 2, img.height() / 2).0;

    PALETTE
        .iter()
        .enumerate()
        .min_by_key(|(_, color)| {
            color
                .iter()
                .zip(center.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).pow(2))
                .sum::<i32>()
        })
        .map(|(index, _)| index)
        .unwrap()
}
