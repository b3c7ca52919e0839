// Decoding and encoding sit outside the equalization core: `load` turns any
// image the `image` crate understands into a `GrayPicture`, `save` writes one
// back out as a lossless 8-bit grayscale PNG.

use std::path::Path;

use image::ImageEncoder;

use crate::core_modules::pixel_buffer::GrayPicture;
use crate::error::Result;

/// Reads `path`, converts it to 8-bit luma and records its intensity range.
pub fn load(path: impl AsRef<Path>) -> Result<GrayPicture> {
    let gray = image::open(path.as_ref())?.into_luma8();
    let (width, height) = gray.dimensions();
    GrayPicture::from_raw(width, height, gray.into_raw())
}

/// Writes `picture` to `path` as a grayscale PNG.
pub fn save(picture: &GrayPicture, path: impl AsRef<Path>) -> Result<()> {
    let output = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
    let encoder = image::codecs::png::PngEncoder::new(output);

    encoder.write_image(
        picture.pixels(),
        picture.width(),
        picture.height(),
        image::ExtendedColorType::L8,
    )?;

    Ok(())
}
