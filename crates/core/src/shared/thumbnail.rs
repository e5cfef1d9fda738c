use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

use crate::shared::frame::Frame;

/// JPEG of `crop` scaled down (aspect kept) so neither side exceeds
/// `max_side`. Crops already that small are encoded as they are.
pub fn encode_thumbnail(crop: &Frame, max_side: u32) -> Result<Vec<u8>, image::ImageError> {
    let image = to_image(crop).ok_or_else(|| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    let image = if crop.width() > max_side || crop.height() > max_side {
        image.thumbnail(max_side, max_side)
    } else {
        image
    };

    let mut out = Vec::new();
    image.to_rgb8().write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
    Ok(out)
}

fn to_image(frame: &Frame) -> Option<DynamicImage> {
    let (w, h, data) = (frame.width(), frame.height(), frame.data().to_vec());
    match frame.channels() {
        1 => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn flat(width: u32, height: u32, channels: u8) -> Frame {
        let len = (width * height) as usize * channels as usize;
        Frame::new(vec![120; len], width, height, channels, 0, Duration::ZERO)
    }

    #[test]
    fn test_large_crop_is_scaled_to_fit() {
        let jpeg = encode_thumbnail(&flat(300, 150, 3), 96).unwrap();
        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (96, 48));
    }

    #[test]
    fn test_small_crop_keeps_its_size() {
        let jpeg = encode_thumbnail(&flat(40, 30, 3), 96).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_grayscale_crop_is_encoded() {
        assert!(encode_thumbnail(&flat(20, 20, 1), 96).is_ok());
    }

    #[test]
    fn test_unsupported_channel_count_is_rejected() {
        assert!(encode_thumbnail(&flat(4, 4, 4), 96).is_err());
    }
}
