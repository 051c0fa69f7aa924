//! Integration tests for texture decoding.

use std::io::Cursor;

use ember_resources::{ResourceError, TextureData};
use image::{ImageBuffer, ImageFormat, Rgba};

fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x * 40) as u8, (y * 40) as u8, 7, 255])
    });
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)
        .expect("PNG encoding should succeed");
    bytes.into_inner()
}

#[test]
fn test_decode_png_to_rgba8() {
    let png = encode_png(3, 2);
    let tex = TextureData::from_bytes(&png, "gradient").expect("valid PNG should decode");

    assert_eq!((tex.width, tex.height), (3, 2));
    assert_eq!(tex.byte_len(), 3 * 2 * 4);
    assert_eq!(tex.pixel(2, 1), Some([80, 40, 7, 255]));
    assert_eq!(tex.name, "gradient");
}

#[test]
fn test_corrupt_bytes_report_name() {
    let mut png = encode_png(4, 4);
    png.truncate(12);

    let err = TextureData::from_bytes(&png, "broken.png").unwrap_err();
    assert!(matches!(err, ResourceError::DecodeBytes { .. }));
    assert!(err.to_string().contains("broken.png"));
}

#[test]
fn test_decode_from_file() {
    let dir = std::env::temp_dir().join(format!("ember-resources-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("tile.png");
    std::fs::write(&path, encode_png(2, 2)).unwrap();

    let tex = TextureData::from_file(&path).expect("file should decode");
    assert_eq!(tex.name, "tile.png");
    assert_eq!(tex.pixel(1, 1), Some([40, 40, 7, 255]));

    std::fs::remove_dir_all(&dir).ok();
}
