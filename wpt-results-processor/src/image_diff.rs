// Copyright (c) The wpt-results Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pixel comparison of reftest screenshots.

use crate::errors::ImageDiffError;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use wpt_results_metadata::ImageDiffStats;

/// The result of comparing two differing images.
#[derive(Clone, Debug)]
pub struct ImageDiff {
    /// A PNG highlighting differing pixels in red over a faded copy of the expected image.
    pub png: Vec<u8>,

    /// Summary statistics.
    pub stats: ImageDiffStats,
}

/// Compares two PNG-encoded images.
///
/// Returns `Ok(None)` if the images are pixel-identical.
pub fn diff_images(expected: &[u8], actual: &[u8]) -> Result<Option<ImageDiff>, ImageDiffError> {
    let expected = decode_png(expected, "expected")?;
    let actual = decode_png(actual, "actual")?;
    if expected.dimensions() != actual.dimensions() {
        return Err(ImageDiffError::DimensionMismatch {
            expected: expected.dimensions(),
            actual: actual.dimensions(),
        });
    }

    let (width, height) = expected.dimensions();
    let mut diff_image = RgbaImage::new(width, height);
    let mut max_difference = 0u8;
    let mut max_pixels = 0u64;

    for ((x, y, expected_px), actual_px) in expected.enumerate_pixels().zip(actual.pixels()) {
        let difference = expected_px
            .0
            .iter()
            .zip(actual_px.0.iter())
            .map(|(e, a)| e.abs_diff(*a))
            .max()
            .unwrap_or(0);

        let diff_px = if difference > 0 {
            max_pixels += 1;
            max_difference = max_difference.max(difference);
            Rgba([255, 0, 0, 255])
        } else {
            fade(expected_px)
        };
        diff_image.put_pixel(x, y, diff_px);
    }

    if max_pixels == 0 {
        return Ok(None);
    }

    let mut png = Vec::new();
    diff_image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(ImageDiffError::Encode)?;
    Ok(Some(ImageDiff {
        png,
        stats: ImageDiffStats {
            max_difference,
            max_pixels,
        },
    }))
}

fn decode_png(data: &[u8], which: &'static str) -> Result<RgbaImage, ImageDiffError> {
    image::load_from_memory_with_format(data, ImageFormat::Png)
        .map(|image| image.to_rgba8())
        .map_err(|error| ImageDiffError::Decode { which, error })
}

// Unchanged pixels are shown as a light grayscale version of the original.
fn fade(px: &Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, _] = px.0;
    let luma = (u16::from(r) * 3 + u16::from(g) * 6 + u16::from(b)) / 10;
    let faded = (255 - (255 - luma) / 3) as u8;
    Rgba([faded, faded, faded, 255])
}
