use anyhow::{ensure, Result};
use png::{BitDepth, ColorType, Encoder};

use crate::geometry::PixelRect;

/// RGBA8 pixels, row-major, no padding between rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn same_size(&self, other: &RenderImage) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pixels.len() == other.pixels.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.pixels.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// An image in a portable encoding, tagged with its mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new("image/png", bytes)
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Copies `rect` out of `image` into a new buffer sized to the rect. The rect
/// is clipped to the image first.
pub fn crop(image: &RenderImage, rect: PixelRect) -> RenderImage {
    let x = rect.x.min(image.width);
    let y = rect.y.min(image.height);
    let width = rect.width.min(image.width - x);
    let height = rect.height.min(image.height - y);

    let stride = image.width as usize * 4;
    let row_len = width as usize * 4;
    let mut pixels = Vec::with_capacity(row_len * height as usize);

    for row in 0..height {
        let start = (y + row) as usize * stride + x as usize * 4;
        pixels.extend_from_slice(&image.pixels[start..start + row_len]);
    }

    RenderImage {
        width,
        height,
        pixels,
    }
}

pub fn encode_png(image: &RenderImage) -> Result<EncodedImage> {
    ensure!(!image.is_empty(), "cannot encode an empty image");
    ensure!(
        image.pixels.len() == image.width as usize * image.height as usize * 4,
        "pixel buffer does not match {}x{} RGBA",
        image.width,
        image.height
    );

    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;

    Ok(EncodedImage::png(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RenderImage {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        RenderImage {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn crop_copies_exact_region() {
        let image = gradient(8, 6);
        let out = crop(
            &image,
            PixelRect {
                x: 2,
                y: 1,
                width: 3,
                height: 4,
            },
        );
        assert_eq!(out.width, 3);
        assert_eq!(out.height, 4);
        assert_eq!(out.pixels.len(), 3 * 4 * 4);
        assert_eq!(out.pixel(0, 0), Some([2, 1, 0, 255]));
        assert_eq!(out.pixel(2, 3), Some([4, 4, 0, 255]));
    }

    #[test]
    fn crop_clips_rect_overhanging_the_image() {
        let image = gradient(4, 4);
        let out = crop(
            &image,
            PixelRect {
                x: 3,
                y: 3,
                width: 10,
                height: 10,
            },
        );
        assert_eq!((out.width, out.height), (1, 1));
        assert_eq!(out.pixel(0, 0), Some([3, 3, 0, 255]));
    }

    #[test]
    fn encode_png_emits_signature() {
        let encoded = encode_png(&gradient(3, 2)).unwrap();
        assert_eq!(encoded.mime_type, "image/png");
        assert_eq!(&encoded.bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(encoded.extension(), "png");
    }

    #[test]
    fn encode_png_rejects_mismatched_buffer() {
        let bad = RenderImage {
            width: 2,
            height: 2,
            pixels: vec![0; 3],
        };
        assert!(encode_png(&bad).is_err());
        assert!(encode_png(&RenderImage::filled(0, 5, [0; 4])).is_err());
    }
}
