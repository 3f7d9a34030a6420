//! Image decoding, scaling and saving helpers.

use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{Result, RostroError};

/// Decode an image file into RGB8.
pub fn read_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path)
        .map_err(|e| RostroError::ImageRead(format!("{}: {e}", path.display())))?;
    Ok(image.to_rgb8())
}

/// Decode an in-memory encoded image into RGB8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|e| RostroError::ImageRead(e.to_string()))?;
    Ok(image.to_rgb8())
}

/// Scale both dimensions by `ratio`. Ratios of 1.0 or more return a copy.
///
/// Each dimension is clamped to at least one pixel.
pub fn downscale(image: &RgbImage, ratio: f32) -> RgbImage {
    if ratio >= 1.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let width = ((image.width() as f32 * ratio).round() as u32).max(1);
    let height = ((image.height() as f32 * ratio).round() as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Encode `image` to `path`, creating parent directories. The format follows the extension.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .map_err(|e| RostroError::ImageWrite(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_downscale_dimensions() {
        let image = RgbImage::from_pixel(100, 50, Rgb([1, 2, 3]));
        let scaled = downscale(&image, 0.6);
        assert_eq!(scaled.dimensions(), (60, 30));
        assert_eq!(scaled.get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_downscale_never_collapses() {
        let image = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        assert_eq!(downscale(&image, 0.1).dimensions(), (1, 1));
        assert_eq!(downscale(&image, 1.0).dimensions(), (1, 1));
    }

    #[test]
    fn test_save_and_read_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.png");
        let image = RgbImage::from_fn(8, 4, |x, y| Rgb([x as u8, y as u8, 7]));

        save_image(&image, &path).unwrap();
        assert_eq!(read_image(&path).unwrap(), image);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_image(Path::new("/definitely/not/here.jpg")).unwrap_err();
        assert!(matches!(err, RostroError::ImageRead(_)));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_image(b"not an image"),
            Err(RostroError::ImageRead(_))
        ));
    }
}
