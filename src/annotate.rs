use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::models::DetectionRecord;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 3;

/// Draw one red box per detection onto a copy of the image
pub fn draw_detections(image: &DynamicImage, detections: &[DetectionRecord]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let (x, y, w, h) = detection.bbox.to_pixels(width, height);

        // Nested rectangles, growing inward, give the outline its thickness
        for inset in 0..BOX_THICKNESS {
            let w = w.saturating_sub(2 * inset);
            let h = h.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        }
    }

    canvas
}

/// Load `source`, draw the detections and save the result to `output` (format from extension)
pub fn write_annotated(source: &Path, output: &Path, detections: &[DetectionRecord]) -> anyhow::Result<()> {
    let img = image::open(source)
        .with_context(|| format!("Failed to open image {}", source.display()))?;
    let annotated = draw_detections(&img, detections);
    annotated
        .save(output)
        .map_err(|e| anyhow::anyhow!("Failed to save annotated image {}: {}", output.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedBox;
    use image::ImageBuffer;

    fn white(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([255u8, 255, 255])))
    }

    #[test]
    fn draws_box_outline_only() {
        let det = DetectionRecord::new("Person", 0.9, NormalizedBox::new(0.2, 0.2, 0.8, 0.8));
        let out = draw_detections(&white(100, 100), &[det]);

        assert_eq!(*out.get_pixel(20, 20), BOX_COLOR);
        assert_eq!(*out.get_pixel(22, 50), BOX_COLOR);
        assert_eq!(*out.get_pixel(50, 50), Rgb([255, 255, 255]));
        assert_eq!(*out.get_pixel(5, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn no_detections_leaves_image_untouched() {
        let img = white(10, 10);
        assert_eq!(draw_detections(&img, &[]), img.to_rgb8());
    }

    #[test]
    fn writes_png_next_to_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("BVA-001.png");
        white(40, 30).save(&src).unwrap();
        let dst = dir.path().join("BVA-001_result.png");

        let det = DetectionRecord::new("Person", 0.9, NormalizedBox::new(0.0, 0.0, 0.5, 0.5));
        write_annotated(&src, &dst, &[det]).unwrap();

        let reloaded = image::open(&dst).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (40, 30));
    }
}
