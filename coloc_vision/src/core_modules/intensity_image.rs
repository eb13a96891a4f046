// THEORY:
// The engine never decodes images itself; it only needs random access to one
// numeric value per pixel. `IntensityImage` is that narrow seam. Any grayscale
// `image` view (8-bit, 16-bit or float) satisfies it, so raw microscopy data can
// be handed over without quantizing it to display values first.
//
// Decoding is still a collaborator's job, but the loaders at the bottom of this
// file keep every pixel in its source unit: an 8-bit value of 100 stays 100,
// a 16-bit value stays as written, and float data is never rescaled. Only
// colour inputs are collapsed to luma, in their own bit depth.

use crate::error::Result;
use image::{DynamicImage, GenericImageView, ImageBuffer, Luma, Pixel, Primitive};
use std::path::Path;

/// Raw intensities in source units, wide enough for 8-bit, 16-bit and float data.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A label image; each non-zero value is one segmented cell.
pub type LabelImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Random-access, read-only view of a single-channel raw intensity image.
pub trait IntensityImage {
    /// Width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// The raw value at `(x, y)`, or `None` when the point lies outside the image.
    fn intensity(&self, x: u32, y: u32) -> Option<f64>;
}

impl<I, P> IntensityImage for I
where
    I: GenericImageView<Pixel = Luma<P>>,
    P: Primitive + Into<f64>,
{
    fn dimensions(&self) -> (u32, u32) {
        GenericImageView::dimensions(self)
    }

    #[inline]
    fn intensity(&self, x: u32, y: u32) -> Option<f64> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let Luma([value]) = self.get_pixel(x, y);
        Some(value.into())
    }
}

/// Copies the first channel of every pixel without rescaling.
fn widen<I>(image: &I) -> FloatImage
where
    I: GenericImageView,
    <I::Pixel as Pixel>::Subpixel: Into<f32>,
{
    let (width, height) = GenericImageView::dimensions(image);
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([image.get_pixel(x, y).channels()[0].into()])
    })
}

/// Converts a decoded image to raw single-channel intensities in source units.
pub fn raw_intensities(image: &DynamicImage) -> FloatImage {
    match image {
        DynamicImage::ImageLuma8(buffer) => widen(buffer),
        DynamicImage::ImageLumaA8(buffer) => widen(buffer),
        DynamicImage::ImageLuma16(buffer) => widen(buffer),
        DynamicImage::ImageLumaA16(buffer) => widen(buffer),
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => widen(&image.to_luma8()),
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => widen(&image.to_luma16()),
        _ => image.to_luma32f(),
    }
}

/// Converts a decoded label image, keeping 8-bit label values unchanged.
pub fn label_values(image: &DynamicImage) -> LabelImage {
    match image {
        DynamicImage::ImageLuma8(buffer) => {
            ImageBuffer::from_fn(buffer.width(), buffer.height(), |x, y| {
                Luma([u16::from(buffer.get_pixel(x, y).0[0])])
            })
        }
        _ => image.to_luma16(),
    }
}

/// Decodes a raw intensity image from disk.
pub fn open_intensity_image<P: AsRef<Path>>(path: P) -> Result<FloatImage> {
    Ok(raw_intensities(&image::open(path)?))
}

/// Decodes a label image from disk.
pub fn open_label_image<P: AsRef<Path>>(path: P) -> Result<LabelImage> {
    Ok(label_values(&image::open(path)?))
}
