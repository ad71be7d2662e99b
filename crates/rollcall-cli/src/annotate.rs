//! Outline the selected face on a copy of the input image.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rollcall_core::BoundingBox;

pub const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const NO_MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const LINE_WIDTH: i32 = 2;

/// Copy of `image` with a `LINE_WIDTH`-pixel outline around `bbox`.
pub fn draw_face_box(image: &DynamicImage, bbox: &BoundingBox, color: Rgb<u8>) -> RgbImage {
    let mut canvas = image.to_rgb8();

    for inset in 0..LINE_WIDTH {
        let width = bbox.width - 2 * inset;
        let height = bbox.height - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x + inset, bbox.y + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(&mut canvas, rect, color);
    }

    canvas
}
