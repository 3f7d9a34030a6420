//! Detection overlays.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::error::Result;
use crate::imaging::save_image;
use crate::pipeline::ImageDetection;

pub const KNOWN_FACE_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const UNKNOWN_FACE_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
pub const OBJECT_COLOR: Rgb<u8> = Rgb([0, 90, 255]);

/// Stroke width in pixels.
const THICKNESS: i32 = 2;

/// Draw face and object boxes onto `image` in place.
pub fn annotate(image: &mut RgbImage, detection: &ImageDetection) {
    for object in &detection.objects {
        let b = object.bbox;
        draw_box(image, b.x1, b.y1, b.x2, b.y2, OBJECT_COLOR);
    }
    for face in &detection.faces {
        let b = face.bbox;
        let color = if face.identity.is_some() {
            KNOWN_FACE_COLOR
        } else {
            UNKNOWN_FACE_COLOR
        };
        draw_box(image, b.left, b.top, b.right, b.bottom, color);
    }
}

/// Annotate a copy of `image` and write it to `dir/file_name`.
pub fn save_annotated(
    image: &RgbImage,
    detection: &ImageDetection,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    let mut annotated = image.clone();
    annotate(&mut annotated, detection);
    let path = dir.join(file_name);
    save_image(&annotated, &path)?;
    Ok(path)
}

fn draw_box(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let (x1, x2) = (clamp_to_canvas(x1, image.width()), clamp_to_canvas(x2, image.width()));
    let (y1, y2) = (clamp_to_canvas(y1, image.height()), clamp_to_canvas(y2, image.height()));

    for inset in 0..THICKNESS {
        let width = x2.saturating_sub(x1).saturating_sub(2 * inset);
        let height = y2.saturating_sub(y1).saturating_sub(2 * inset);
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(x1.saturating_add(inset), y1.saturating_add(inset))
            .of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Pull a provider coordinate to just outside the canvas. Edges beyond the
/// margin stay off-image, so the drawn pixels do not change.
fn clamp_to_canvas(value: i32, len: u32) -> i32 {
    let margin = THICKNESS + 1;
    let far = i32::try_from(len).unwrap_or(i32::MAX).saturating_add(margin);
    value.clamp(-margin, far)
}
