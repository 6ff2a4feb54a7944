//! Encoded images, behind the `image` feature.
//!
//! An image travels compressed, never as raw pixels:
//!
//! ```text
//! { "ztype": "image", "b": <png/jpeg/webp bytes>, "format": "png" }
//! ```

use std::io::Cursor;

use ::image::{DynamicImage, ImageFormat};

use crate::registry::TypeRegistry;
use crate::{ProtocolError, ZData};

/// Tag of the encoded image type.
pub const IMAGE_TAG: &str = "image";

/// Extra field naming the compression format.
const FORMAT_KEY: &str = "format";

/// A decoded image and the format it travels in.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl ImageData {
    pub fn new(image: DynamicImage, format: ImageFormat) -> Self {
        Self { image, format }
    }
}

fn format_name(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

fn parse_format(name: &str) -> Option<ImageFormat> {
    match name {
        "png" => Some(ImageFormat::Png),
        "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
        "webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

fn encode_image(data: &ImageData) -> Result<ZData, ProtocolError> {
    let name = format_name(data.format).ok_or_else(|| {
        ProtocolError::Encode(format!("unsupported image format {:?}", data.format))
    })?;

    let mut bytes = Vec::new();
    data.image
        .write_to(&mut Cursor::new(&mut bytes), data.format)
        .map_err(|err| ProtocolError::Encode(format!("{name} encoding failed: {err}")))?;

    Ok(ZData::new(IMAGE_TAG)
        .with_binary(bytes)
        .with_field(FORMAT_KEY, name))
}

fn decode_image(zdata: &ZData) -> Result<ImageData, ProtocolError> {
    let bytes = zdata
        .binary
        .as_deref()
        .ok_or_else(|| ProtocolError::malformed(IMAGE_TAG, "missing binary payload"))?;
    let name = zdata
        .field(FORMAT_KEY)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProtocolError::malformed(IMAGE_TAG, "missing format"))?;
    let format = parse_format(name).ok_or_else(|| {
        ProtocolError::malformed(IMAGE_TAG, format!("unsupported image format {name:?}"))
    })?;

    let image = ::image::load_from_memory_with_format(bytes, format)
        .map_err(|err| ProtocolError::malformed(IMAGE_TAG, err.to_string()))?;
    Ok(ImageData::new(image, format))
}

pub(crate) fn install(registry: &TypeRegistry) {
    registry.register_type::<ImageData, _, _>(IMAGE_TAG, encode_image, decode_image);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use ::image::{Rgb, RgbImage};

    fn checker() -> DynamicImage {
        let mut pixels = RgbImage::new(2, 2);
        pixels.put_pixel(0, 0, Rgb([255, 0, 0]));
        pixels.put_pixel(1, 1, Rgb([0, 0, 255]));
        DynamicImage::ImageRgb8(pixels)
    }

    #[test]
    fn test_png_round_trip_keeps_pixels() {
        let registry = TypeRegistry::with_builtins();
        let original = ImageData::new(checker(), ImageFormat::Png);

        let encoded = registry.encode(&Value::native(original.clone())).unwrap();
        let zdata = ZData::from_value(&encoded).unwrap();
        assert_eq!(zdata.type_tag, IMAGE_TAG);
        assert_eq!(zdata.field("format"), Some(&Value::from("png")));

        let decoded = registry.decode(&encoded).unwrap();
        assert_eq!(decoded.as_native::<ImageData>(), Some(&original));
    }

    #[test]
    fn test_decode_image_unknown_format_is_malformed() {
        let registry = TypeRegistry::with_builtins();
        let value = ZData::new(IMAGE_TAG)
            .with_binary(vec![0; 4])
            .with_field("format", "tiff")
            .into_value();
        assert_eq!(
            registry.decode(&value).unwrap_err(),
            ProtocolError::malformed(IMAGE_TAG, "unsupported image format \"tiff\"")
        );
    }

    #[test]
    fn test_decode_image_missing_format_is_malformed() {
        let registry = TypeRegistry::with_builtins();
        let value = ZData::new(IMAGE_TAG).with_binary(vec![0; 4]).into_value();
        assert!(matches!(
            registry.decode(&value),
            Err(ProtocolError::MalformedEncodedValue { .. })
        ));
    }

    #[test]
    fn test_decode_image_corrupt_bytes_is_malformed() {
        let registry = TypeRegistry::with_builtins();
        let value = ZData::new(IMAGE_TAG)
            .with_binary(b"not a png".to_vec())
            .with_field("format", "png")
            .into_value();
        assert!(matches!(
            registry.decode(&value),
            Err(ProtocolError::MalformedEncodedValue { .. })
        ));
    }

    #[test]
    fn test_encode_image_unsupported_format_is_encode_error() {
        let registry = TypeRegistry::with_builtins();
        let value = Value::native(ImageData::new(checker(), ImageFormat::Bmp));
        assert!(matches!(registry.encode(&value), Err(ProtocolError::Encode(_))));
    }
}
