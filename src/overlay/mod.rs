//! Frame annotation: bounding boxes, identity labels, timestamps.
//!
//! All drawing clips to the image bounds, so callers can pass boxes straight
//! from the vision service.

pub mod font;

use image::{Rgb, RgbImage};

use crate::vision::BoundingBox;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const TIMESTAMP_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;
const TIMESTAMP_SCALE: u32 = 2;
const LABEL_GAP: i64 = 10;

/// Draw a hollow rectangle for `bbox`.
pub fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let Some((x, y, w, h)) = bbox.clamp_to(img.width(), img.height()) else {
        return;
    };
    let (x1, y1) = (x + w - 1, y + h - 1);
    for t in 0..BOX_THICKNESS {
        let (xx0, yy0) = (x + t, y + t);
        let (xx1, yy1) = (x1.saturating_sub(t), y1.saturating_sub(t));
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for xx in xx0..=xx1 {
            img.put_pixel(xx, yy0, color);
            img.put_pixel(xx, yy1, color);
        }
        for yy in yy0..=yy1 {
            img.put_pixel(xx0, yy, color);
            img.put_pixel(xx1, yy, color);
        }
    }
}

/// Draw `text` with its top-left corner at `(x, y)`. Pixels outside the image are skipped.
pub fn draw_text(img: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>, scale: u32) {
    let scale = scale.max(1);
    let (width, height) = (img.width() as i64, img.height() as i64);
    let mut pen_x = x;
    for c in text.chars() {
        let glyph = font::glyph(c);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH {
                if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = pen_x + (col * scale + dx) as i64;
                        let py = y + (row as u32 * scale + dy) as i64;
                        if px >= 0 && py >= 0 && px < width && py < height {
                            img.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        pen_x += (font::ADVANCE * scale) as i64;
    }
}

/// Draw an identity label just above `bbox`, or inside its top edge when the
/// box touches the top of the frame.
pub fn draw_label(img: &mut RgbImage, bbox: &BoundingBox, text: &str) {
    let text_height = (font::GLYPH_HEIGHT * LABEL_SCALE) as i64;
    let mut y = bbox.y_min as i64 - LABEL_GAP - text_height;
    if y < 0 {
        y = bbox.y_min.max(0) as i64 + BOX_THICKNESS as i64 + 2;
    }
    let x = (bbox.x_min.max(0) as i64).min(img.width().saturating_sub(1) as i64);
    draw_text(img, x, y, text, LABEL_COLOR, LABEL_SCALE);
}

/// Draw a status banner in the top-left corner (used when no face was found).
pub fn draw_banner(img: &mut RgbImage, text: &str) {
    draw_text(img, 10, 36, text, LABEL_COLOR, LABEL_SCALE);
}

/// Draw a timestamp in the top-left corner.
pub fn draw_timestamp(img: &mut RgbImage, text: &str) {
    draw_text(img, 10, 10, text, TIMESTAMP_COLOR, TIMESTAMP_SCALE);
}
