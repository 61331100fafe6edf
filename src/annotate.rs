//! Box clamping, rectangle/label drawing, and cropping.
//!
//! Annotation is an ordered pass over one owned working copy of the decoded
//! image; crops are always taken from the pristine decode so a crop can
//! never include another box's overlay marks.

use std::path::PathBuf;
use std::sync::OnceLock;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::BoundingBox;
use crate::error::PipelineError;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_SCALE: f32 = 16.0;
const LABEL_GAP: i64 = 4;

/// Candidate font locations tried when no explicit path is configured.
const FONT_FALLBACKS: [&str; 3] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
];

/// A validated, clamped pixel rectangle inside a specific image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Clamp a raw detector box against the image bounds.
///
/// A box entirely outside the image, or degenerate after clamping
/// (`x_min >= x_max` or `y_min >= y_max`), is a per-box format error;
/// `index` is the zero-based detection index used in the error.
pub fn clamp_box(
    detection: &BoundingBox,
    image_width: u32,
    image_height: u32,
    index: usize,
) -> Result<PixelRect, PipelineError> {
    let x_min = detection.x_min.clamp(0, image_width as i64);
    let y_min = detection.y_min.clamp(0, image_height as i64);
    let x_max = detection.x_max.clamp(0, image_width as i64);
    let y_max = detection.y_max.clamp(0, image_height as i64);

    if x_min >= x_max || y_min >= y_max {
        return Err(PipelineError::BoxOutOfBounds {
            index,
            detail: format!(
                "({},{})-({},{}) against {}x{} image",
                detection.x_min,
                detection.y_min,
                detection.x_max,
                detection.y_max,
                image_width,
                image_height
            ),
        });
    }

    Ok(PixelRect {
        x: x_min as u32,
        y: y_min as u32,
        width: (x_max - x_min) as u32,
        height: (y_max - y_min) as u32,
    })
}

/// Label font for annotation text.
///
/// Loads from an explicit path when configured, falling back to common
/// system locations. When no usable font is found the pipeline still draws
/// rectangles; the miss is logged once.
pub struct LabelFont {
    font: Option<FontVec>,
}

static FONT_WARNED: OnceLock<()> = OnceLock::new();

impl LabelFont {
    pub fn load(explicit_path: Option<&PathBuf>) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = explicit_path {
            candidates.push(path.clone());
        }
        candidates.extend(FONT_FALLBACKS.iter().map(PathBuf::from));

        for path in candidates {
            match std::fs::read(&path) {
                Ok(bytes) => match FontVec::try_from_vec(bytes) {
                    Ok(font) => {
                        log::debug!("label font loaded from {}", path.display());
                        return Self { font: Some(font) };
                    }
                    Err(err) => {
                        log::warn!("unusable label font {}: {}", path.display(), err);
                    }
                },
                Err(_) => continue,
            }
        }

        FONT_WARNED.get_or_init(|| {
            log::warn!("no label font found; annotations will draw boxes without text");
        });
        Self { font: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.font.is_some()
    }
}

/// Draw one detection on the working copy: a 2 px hollow rectangle plus a
/// label positioned above the box's top-left corner.
pub fn draw_detection(image: &mut RgbImage, rect: &PixelRect, label: &str, font: &LabelFont) {
    let outer = Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height);
    draw_hollow_rect_mut(image, outer, BOX_COLOR);
    if rect.width > 2 && rect.height > 2 {
        let inner = Rect::at(rect.x as i32 + 1, rect.y as i32 + 1)
            .of_size(rect.width - 2, rect.height - 2);
        draw_hollow_rect_mut(image, inner, BOX_COLOR);
    }

    if let Some(font) = &font.font {
        let text_y = (rect.y as i64 - LABEL_SCALE as i64 - LABEL_GAP).max(0) as i32;
        draw_text_mut(
            image,
            BOX_COLOR,
            rect.x as i32,
            text_y,
            PxScale::from(LABEL_SCALE),
            font,
            label,
        );
    }
}

/// Extract the exact box rectangle from the pristine decoded image.
pub fn crop_region(original: &RgbImage, rect: &PixelRect) -> RgbImage {
    image::imageops::crop_imm(original, rect.x, rect.y, rect.width, rect.height).to_image()
}
