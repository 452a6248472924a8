use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageResult, RgbImage};

/// Embedding parameters for raster images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSettings {
    /// Wider images are downscaled to this many pixels.
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_width: 1200,
            jpeg_quality: 85,
        }
    }
}

/// A decoded image re-encoded as baseline JPEG, ready for a DCT XObject.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

pub fn prepare(data: &[u8], settings: &ImageSettings) -> ImageResult<PreparedImage> {
    let mut img = image::load_from_memory(data)?;

    let (source_width, _) = img.dimensions();
    if source_width > settings.max_width {
        img = img.resize(settings.max_width, u32::MAX, FilterType::Lanczos3);
    }

    let rgb = flatten(&img);
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, settings.jpeg_quality.clamp(1, 100))
        .encode_image(&rgb)?;

    Ok(PreparedImage {
        width,
        height,
        jpeg,
    })
}

/// Composites transparent pixels over white.
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}
