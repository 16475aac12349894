use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use roomshift_contracts::assets::ImageAsset;
use sha2::{Digest, Sha256};

use crate::provider::{GenerationRequest, ImageGenerator, Part};

const DRYRUN_LONG_EDGE: u32 = 256;

/// Offline generator: answers with a short note and a solid-colour PNG in
/// the requested aspect ratio. The colour is derived from the instruction so
/// distinct requests give distinct images.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunGenerator;

impl DryrunGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl ImageGenerator for DryrunGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Vec<Part>> {
        let (width, height) = request
            .aspect_ratio
            .dimensions_for_long_edge(DRYRUN_LONG_EDGE);
        let (r, g, b) = color_from_instruction(&request.instruction);
        let bytes = solid_png(width, height, [r, g, b])?;
        Ok(vec![
            Part::Text(format!(
                "Dry run render {width}x{height} ({}) in #{r:02x}{g:02x}{b:02x}.",
                request.aspect_ratio
            )),
            Part::Image(ImageAsset::from_bytes("image/png", &bytes)),
        ])
    }
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(instruction.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Result<Vec<u8>> {
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb(rgb);
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed encoding dry run image")?;
    Ok(bytes)
}
