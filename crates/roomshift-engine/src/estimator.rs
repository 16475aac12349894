use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::ImageReader;
use roomshift_contracts::aspect::AspectRatio;
use roomshift_contracts::assets::ImageAsset;

/// Pixel dimensions read from the encoded header.
pub fn image_dimensions(asset: &ImageAsset) -> Result<(u32, u32)> {
    let bytes = asset.decode()?;
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("failed reading image header")?;
    reader
        .into_dimensions()
        .context("failed decoding image dimensions")
}

/// Snaps the asset's width/height to the nearest supported ratio. Assets
/// whose dimensions cannot be determined fall back to `1:1`.
pub fn estimate_aspect_ratio(asset: &ImageAsset) -> AspectRatio {
    image_dimensions(asset)
        .ok()
        .and_then(|(width, height)| AspectRatio::from_dimensions(width, height))
        .unwrap_or_default()
}

pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
        .filter(|mime| mime.starts_with("image/"))
}

/// Turns uploaded file bytes into an asset, typed by magic-byte sniffing.
pub fn image_asset_from_upload(bytes: &[u8]) -> Result<ImageAsset> {
    let Some(mime_type) = sniff_mime_type(bytes) else {
        bail!("unsupported upload: not a recognised image format");
    };
    Ok(ImageAsset::from_bytes(mime_type, bytes))
}
