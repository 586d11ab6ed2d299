//! Raster helpers shared by hashing and diff rendering.
//!
//! Masks are applied through [`MaskedView`], a read-through wrapper that
//! substitutes a fill colour inside each masked rectangle. Views stack, so a
//! page with several volatile regions (clock, ad slot, spinner) is masked by
//! chaining [`MaskedView::mask`] calls before hashing or diffing.

use std::io::Cursor;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, GrayImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapgateError};

/// Colour painted over pixels that differ between expected and actual.
pub const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Colour of pixels outside an image's bounds.
const OUTSIDE: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Smooth (bilinear) resize to an exact grayscale grid.
pub fn grayscale_downsample(image: &DynamicImage, width: u32, height: u32) -> GrayImage {
    image::imageops::resize(&image.to_luma8(), width, height, FilterType::Triangle)
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && u64::from(x) < u64::from(self.x) + u64::from(self.width)
            && u64::from(y) < u64::from(self.y) + u64::from(self.height)
    }
}

/// Parses `x,y,width,height`.
impl FromStr for Rect {
    type Err = SnapgateError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SnapgateError::Config(format!("invalid rectangle {s:?}: {e}")))?;
        match parts.as_slice() {
            [x, y, width, height] => Ok(Self::new(*x, *y, *width, *height)),
            _ => Err(SnapgateError::Config(format!(
                "rectangle must be x,y,width,height, got {s:?}"
            ))),
        }
    }
}

/// A rectangle forced to a constant colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask {
    pub rect: Rect,
    pub color: Rgba<u8>,
}

/// Fill used when a mask names no colour.
pub const DEFAULT_MASK_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

impl Mask {
    pub fn new(rect: Rect, color: Rgba<u8>) -> Self {
        Self { rect, color }
    }
}

/// Parses `x,y,width,height` with an optional `,#rrggbb` or `,#rrggbbaa` fill.
impl FromStr for Mask {
    type Err = SnapgateError;

    fn from_str(s: &str) -> Result<Self> {
        let (rect, color) = match s.rsplit_once(',') {
            Some((rect, color)) if color.trim_start().starts_with('#') => {
                (rect, parse_color(color.trim())?)
            }
            _ => (s, DEFAULT_MASK_COLOR),
        };
        Ok(Self::new(rect.parse()?, color))
    }
}

fn parse_color(text: &str) -> Result<Rgba<u8>> {
    let invalid = || {
        SnapgateError::Config(format!("colour must be #rrggbb or #rrggbbaa, got {text:?}"))
    };
    let hex = text.strip_prefix('#').ok_or_else(invalid)?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

/// Read-through view of an image with zero or more masks applied.
#[derive(Debug, Clone)]
pub struct MaskedView<'a> {
    image: &'a DynamicImage,
    masks: Vec<Mask>,
}

impl<'a> MaskedView<'a> {
    pub fn new(image: &'a DynamicImage) -> Self {
        Self {
            image,
            masks: Vec::new(),
        }
    }

    /// Stack another mask on top of the existing ones.
    pub fn mask(mut self, mask: Mask) -> Self {
        self.masks.push(mask);
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixel at `(x, y)`; the most recently added covering mask wins.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        self.masks
            .iter()
            .rev()
            .find(|m| m.rect.contains(x, y))
            .map(|m| m.color)
            .unwrap_or_else(|| self.image.get_pixel(x, y))
    }

    /// Materialize the view. Unmasked images are returned as-is.
    pub fn render(&self) -> DynamicImage {
        if self.masks.is_empty() {
            return self.image.clone();
        }
        let (width, height) = self.dimensions();
        let mut out = self.image.to_rgba8();
        for mask in &self.masks {
            let x_end = mask.rect.x.saturating_add(mask.rect.width).min(width);
            let y_end = mask.rect.y.saturating_add(mask.rect.height).min(height);
            for y in mask.rect.y.min(height)..y_end {
                for x in mask.rect.x.min(width)..x_end {
                    out.put_pixel(x, y, mask.color);
                }
            }
        }
        DynamicImage::ImageRgba8(out)
    }
}

/// Apply a list of masks in order.
pub fn apply_masks(image: &DynamicImage, masks: &[Mask]) -> DynamicImage {
    masks
        .iter()
        .fold(MaskedView::new(image), |view, mask| view.mask(*mask))
        .render()
}

/// Pixel-wise overlay of two images over the union of their bounds.
///
/// Pixels whose RGB channels differ are painted [`HIGHLIGHT`]; the rest pass
/// through from `expected`. Alpha is ignored for the comparison.
pub fn diff_overlay(expected: &DynamicImage, actual: &DynamicImage) -> RgbaImage {
    let a = expected.to_rgba8();
    let b = actual.to_rgba8();
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());

    RgbaImage::from_fn(width, height, |x, y| {
        let c1 = a.get_pixel_checked(x, y).copied().unwrap_or(OUTSIDE);
        let c2 = b.get_pixel_checked(x, y).copied().unwrap_or(OUTSIDE);
        if c1[0] != c2[0] || c1[1] != c2[1] || c1[2] != c2[2] {
            HIGHLIGHT
        } else {
            c1
        }
    })
}

/// Keep only the top-left `width x height` footprint of an image.
///
/// A zero dimension means the baseline size is unknown; the image is then
/// returned unchanged.
pub fn crop_to_baseline_size(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if width == 0 || height == 0 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    if w <= width && h <= height {
        return image.clone();
    }
    image.crop_imm(0, 0, w.min(width), h.min(height))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match image.color() {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
            image.write_to(&mut buf, ImageFormat::Png)?
        }
        _ => DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buf, ImageFormat::Png)?,
    }
    Ok(buf.into_inner())
}

pub fn decode_png(body: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory_with_format(body, ImageFormat::Png)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_downsample_exact_grid() {
        let gray = grayscale_downsample(&solid(100, 37, [10, 20, 30]), 8, 8);
        assert_eq!(gray.dimensions(), (8, 8));
    }

    #[test]
    fn test_rect_contains_edges() {
        let rect = Rect::new(2, 3, 4, 5);
        assert!(rect.contains(2, 3));
        assert!(rect.contains(5, 7));
        assert!(!rect.contains(6, 7));
        assert!(!rect.contains(5, 8));
        assert!(!rect.contains(1, 3));
    }

    #[test]
    fn test_rect_parse() {
        assert_eq!("1,2,3,4".parse::<Rect>().unwrap(), Rect::new(1, 2, 3, 4));
        assert!("1,2,3".parse::<Rect>().is_err());
        assert!("a,b,c,d".parse::<Rect>().is_err());
    }

    #[test]
    fn test_mask_parse_with_fill() {
        let mask: Mask = "1,2,3,4".parse().unwrap();
        assert_eq!(mask, Mask::new(Rect::new(1, 2, 3, 4), DEFAULT_MASK_COLOR));

        let mask: Mask = "0,0,10,5,#ff8000".parse().unwrap();
        assert_eq!(mask.rect, Rect::new(0, 0, 10, 5));
        assert_eq!(mask.color, Rgba([255, 128, 0, 255]));

        let mask: Mask = "0,0,1,1,#00000080".parse().unwrap();
        assert_eq!(mask.color, Rgba([0, 0, 0, 128]));

        assert!("0,0,1,1,#12".parse::<Mask>().is_err());
        assert!("0,0,1,1,#zzzzzz".parse::<Mask>().is_err());
        assert!("0,0,1,#ffffff".parse::<Mask>().is_err());
    }

    #[test]
    fn test_masks_stack_and_read_through() {
        let img = solid(10, 10, [0, 0, 0]);
        let red = Rgba([255, 0, 0, 255]);
        let blue = Rgba([0, 0, 255, 255]);
        let view = MaskedView::new(&img)
            .mask(Mask::new(Rect::new(0, 0, 5, 5), red))
            .mask(Mask::new(Rect::new(3, 3, 5, 5), blue));

        assert_eq!(view.pixel(0, 0), red);
        assert_eq!(view.pixel(4, 4), blue);
        assert_eq!(view.pixel(9, 9), Rgba([0, 0, 0, 255]));

        let rendered = view.render().to_rgba8();
        assert_eq!(*rendered.get_pixel(1, 1), red);
        assert_eq!(*rendered.get_pixel(7, 7), blue);
        assert_eq!(*rendered.get_pixel(9, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_mask_outside_bounds_is_clipped() {
        let img = solid(4, 4, [9, 9, 9]);
        let out = apply_masks(&img, &[Mask::new(Rect::new(2, 2, 100, 100), HIGHLIGHT)]);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(3, 3), HIGHLIGHT);
    }

    #[test]
    fn test_diff_overlay_highlights_changes() {
        let expected = solid(4, 4, [1, 2, 3]);
        let mut actual = expected.to_rgb8();
        actual.put_pixel(2, 1, Rgb([1, 2, 4]));
        let overlay = diff_overlay(&expected, &DynamicImage::ImageRgb8(actual));

        assert_eq!(*overlay.get_pixel(2, 1), HIGHLIGHT);
        assert_eq!(*overlay.get_pixel(0, 0), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_diff_overlay_covers_union_of_bounds() {
        let expected = solid(4, 2, [5, 5, 5]);
        let actual = solid(2, 6, [5, 5, 5]);
        let overlay = diff_overlay(&expected, &actual);

        assert_eq!(overlay.dimensions(), (4, 6));
        assert_eq!(*overlay.get_pixel(1, 1), Rgba([5, 5, 5, 255]));
        assert_eq!(*overlay.get_pixel(3, 0), HIGHLIGHT);
        assert_eq!(*overlay.get_pixel(0, 5), HIGHLIGHT);
        assert_eq!(*overlay.get_pixel(3, 5), OUTSIDE);
    }

    #[test]
    fn test_crop_to_baseline_size() {
        let img = solid(120, 90, [0, 0, 0]);
        assert_eq!(crop_to_baseline_size(&img, 100, 80).dimensions(), (100, 80));
        assert_eq!(crop_to_baseline_size(&img, 200, 80).dimensions(), (120, 80));
        assert_eq!(crop_to_baseline_size(&img, 0, 0).dimensions(), (120, 90));
    }

    #[test]
    fn test_png_roundtrip_preserves_pixels() {
        let img = solid(3, 2, [7, 8, 9]);
        let decoded = decode_png(&encode_png(&img).unwrap()).unwrap();
        assert_eq!(decoded.to_rgb8(), img.to_rgb8());
    }
}
