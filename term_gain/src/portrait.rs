//! Bordered circular portraits for chart overlays.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::GainError;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Largest bordered portrait side, in pixels.
pub const MAX_OVERLAY_SIZE: u32 = 1024;

/// Side of the bordered portrait, `diameter + 2 * border`.
pub fn overlay_size(diameter: u32, border: u32) -> Result<u32, GainError> {
    border
        .checked_mul(2)
        .and_then(|b| b.checked_add(diameter))
        .filter(|&size| diameter > 0 && size <= MAX_OVERLAY_SIZE)
        .ok_or_else(|| {
            GainError::Config(format!(
                "overlay diameter {} with border {} must give a side between 1 and {} pixels",
                diameter, border, MAX_OVERLAY_SIZE
            ))
        })
}

/// Load `path` and return its circular crop inside a ring of `border_color`.
///
/// The result is `diameter + 2 * border` pixels square and fully transparent
/// outside the outer circle.
pub fn circular_portrait(
    path: &Path,
    diameter: u32,
    border: u32,
    border_color: Rgba<u8>,
) -> Result<RgbaImage, GainError> {
    overlay_size(diameter, border)?;
    if !path.is_file() {
        return Err(GainError::MissingAsset(path.to_path_buf()));
    }
    let source = image::open(path)?;
    circular_portrait_from_image(&source, diameter, border, border_color)
}

pub fn circular_portrait_from_image(
    source: &DynamicImage,
    diameter: u32,
    border: u32,
    border_color: Rgba<u8>,
) -> Result<RgbaImage, GainError> {
    let outer = overlay_size(diameter, border)?;
    let mut face = source
        .resize_to_fill(diameter, diameter, FilterType::Lanczos3)
        .to_rgba8();
    apply_circle_mask(&mut face);

    let mut canvas = RgbaImage::from_pixel(outer, outer, TRANSPARENT);
    fill_disk(&mut canvas, border_color);
    paste_opaque(&mut canvas, &face, border);
    Ok(canvas)
}

fn inside_inscribed_circle(x: u32, y: u32, size: u32) -> bool {
    let r = size as f64 / 2.0;
    let dx = x as f64 + 0.5 - r;
    let dy = y as f64 + 0.5 - r;
    dx * dx + dy * dy <= r * r
}

/// Opaque inside the inscribed circle, transparent outside.
fn apply_circle_mask(img: &mut RgbaImage) {
    let size = img.width().min(img.height());
    for (x, y, px) in img.enumerate_pixels_mut() {
        px[3] = if inside_inscribed_circle(x, y, size) {
            255
        } else {
            0
        };
    }
}

fn fill_disk(img: &mut RgbaImage, color: Rgba<u8>) {
    let size = img.width().min(img.height());
    for (x, y, px) in img.enumerate_pixels_mut() {
        if inside_inscribed_circle(x, y, size) {
            *px = color;
        }
    }
}

/// Copy the opaque pixels of `top` onto `canvas` at `(offset, offset)`.
fn paste_opaque(canvas: &mut RgbaImage, top: &RgbaImage, offset: u32) {
    for (x, y, px) in top.enumerate_pixels() {
        if px[3] == 255 {
            canvas.put_pixel(x + offset, y + offset, *px);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 200, 0, 255]);

    fn solid(w: u32, h: u32, color: Rgba<u8>) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, color))
    }

    #[test]
    fn test_output_size_includes_border() {
        let out = circular_portrait_from_image(&solid(64, 48, GREEN), 40, 3, RED).unwrap();
        assert_eq!(out.dimensions(), (46, 46));
    }

    #[test]
    fn test_corners_transparent_ring_bordered_centre_source() {
        let out = circular_portrait_from_image(&solid(40, 40, GREEN), 40, 3, RED).unwrap();
        for (x, y) in [(0, 0), (45, 0), (0, 45), (45, 45)] {
            assert_eq!(out.get_pixel(x, y)[3], 0, "corner ({x},{y})");
        }
        assert_eq!(*out.get_pixel(23, 1), RED);
        assert_eq!(*out.get_pixel(1, 23), RED);
        assert_eq!(*out.get_pixel(23, 23), GREEN);
        assert_eq!(*out.get_pixel(23, 5), GREEN);
    }

    #[test]
    fn test_source_only_visible_inside_inner_circle() {
        let out = circular_portrait_from_image(&solid(40, 40, GREEN), 40, 3, RED).unwrap();
        for (x, y, px) in out.enumerate_pixels() {
            let outer = inside_inscribed_circle(x, y, 46);
            let inner = x >= 3 && y >= 3 && x < 43 && y < 43 && inside_inscribed_circle(x - 3, y - 3, 40);
            if inner {
                assert_eq!(*px, GREEN, "({x},{y})");
            } else if outer {
                assert_eq!(*px, RED, "({x},{y})");
            } else {
                assert_eq!(px[3], 0, "({x},{y})");
            }
        }
    }

    #[test]
    fn test_wide_source_is_centre_cropped() {
        let mut wide = RgbaImage::from_pixel(120, 40, GREEN);
        for x in 40..80 {
            for y in 0..40 {
                wide.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let out = circular_portrait_from_image(&DynamicImage::ImageRgba8(wide), 40, 0, RED).unwrap();
        assert_eq!(out.dimensions(), (40, 40));
        assert_eq!(*out.get_pixel(20, 20), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_oversized_overlay_is_rejected() {
        let huge = u32::MAX / 2 + 1;
        for (diameter, border) in [(40, huge), (MAX_OVERLAY_SIZE, 1), (0, 3)] {
            assert!(matches!(
                circular_portrait_from_image(&solid(4, 4, GREEN), diameter, border, RED),
                Err(GainError::Config(_))
            ));
        }
        assert!(matches!(
            circular_portrait(Path::new("/no/such/portrait.png"), 40, huge, RED),
            Err(GainError::Config(_))
        ));
        assert_eq!(overlay_size(MAX_OVERLAY_SIZE - 6, 3).unwrap(), MAX_OVERLAY_SIZE);
    }

    #[test]
    fn test_missing_file_is_missing_asset() {
        let err = circular_portrait(Path::new("/no/such/portrait.png"), 40, 3, RED).unwrap_err();
        assert!(matches!(err, GainError::MissingAsset(_)));
    }

    #[test]
    fn test_loads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbaImage::from_pixel(30, 50, GREEN).save(&path).unwrap();
        let out = circular_portrait(&path, 20, 2, RED).unwrap();
        assert_eq!(out.dimensions(), (24, 24));
        assert_eq!(*out.get_pixel(12, 12), GREEN);
    }
}
