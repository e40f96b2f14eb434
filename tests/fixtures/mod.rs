//! Synthetic eye-scan images for pipeline and dispatcher tests

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A generated scan and what it is meant to exercise.
#[derive(Debug, Clone)]
pub struct ScanFixture {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    /// Dark pupil on a light sclera with a brown iris ring.
    Eye,
    /// Reddened sclera.
    Inflamed,
    /// Flat mid-grey, no edges.
    Flat,
}

pub const SCAN_FIXTURES: &[ScanFixture] = &[
    ScanFixture {
        name: "clear_eye",
        width: 320,
        height: 240,
        pattern: Pattern::Eye,
    },
    ScanFixture {
        name: "inflamed_eye",
        width: 256,
        height: 256,
        pattern: Pattern::Inflamed,
    },
    ScanFixture {
        name: "flat_frame",
        width: 64,
        height: 48,
        pattern: Pattern::Flat,
    },
];

impl ScanFixture {
    pub fn render(&self) -> RgbImage {
        let (cx, cy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);
        let radius = cx.min(cy);

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let r = (dx * dx + dy * dy).sqrt() / radius;

            match self.pattern {
                Pattern::Flat => Rgb([128, 128, 128]),
                Pattern::Eye | Pattern::Inflamed if r < 0.2 => Rgb([12, 10, 10]),
                Pattern::Eye | Pattern::Inflamed if r < 0.5 => Rgb([110, 70, 40]),
                Pattern::Eye => Rgb([235, 230, 225]),
                Pattern::Inflamed => Rgb([220, 90, 90]),
            }
        })
    }

    /// PNG-encoded bytes, as an image source would return them.
    pub fn png_bytes(&self) -> Vec<u8> {
        encode_png(self.render())
    }
}

pub fn encode_png(image: RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("PNG encoding failed");
    buf
}

pub fn fixture(name: &str) -> &'static ScanFixture {
    SCAN_FIXTURES
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("Unknown scan fixture: {}", name))
}

/// Bytes that are not any image format.
pub fn corrupt_bytes() -> Vec<u8> {
    b"definitely not an image".to_vec()
}
