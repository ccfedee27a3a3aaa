//! Small in-memory files for exercising the decoders end to end.

use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};

use flow_spatial::{LoadProgress, ProgressCallback};

/// LAS 1.2, point format 0, coordinates scaled by 0.01.
pub fn las(points: &[[i32; 3]]) -> Vec<u8> {
    const HEADER_LEN: usize = 227;
    const RECORD_LEN: u16 = 20;
    let mut data = vec![0u8; HEADER_LEN];
    data[..4].copy_from_slice(b"LASF");
    data[24] = 1;
    data[25] = 2;
    data[94..96].copy_from_slice(&(HEADER_LEN as u16).to_le_bytes());
    data[96..100].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
    data[104] = 0;
    data[105..107].copy_from_slice(&RECORD_LEN.to_le_bytes());
    data[107..111].copy_from_slice(&(points.len() as u32).to_le_bytes());
    for i in 0..3 {
        data[131 + i * 8..139 + i * 8].copy_from_slice(&0.01f64.to_le_bytes());
    }
    for point in points {
        let mut record = vec![0u8; usize::from(RECORD_LEN)];
        for (i, v) in point.iter().enumerate() {
            record[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&record);
    }
    data
}

/// E57 container with `region` as binary section and no page checksums.
pub fn e57(region: &[u8], xml: &str) -> Vec<u8> {
    const HEADER_LEN: usize = 48;
    let xml_offset = (HEADER_LEN + region.len()) as u64;
    let mut data = Vec::new();
    data.extend_from_slice(b"ASTM-E57");
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&(xml_offset + xml.len() as u64).to_le_bytes());
    data.extend_from_slice(&xml_offset.to_le_bytes());
    data.extend_from_slice(&(xml.len() as u64).to_le_bytes());
    data.extend_from_slice(&0u64.to_le_bytes());
    data.extend_from_slice(region);
    data.extend_from_slice(xml.as_bytes());
    data
}

/// A single triangle spanning the unit square, uniformly scaled by `scale` on its node.
pub fn glb_triangle(scale: f32) -> Vec<u8> {
    let mut bin = Vec::new();
    for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
        for c in v {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    for i in [0u16, 1, 2, 0] {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    let json = format!(
        r#"{{
            "asset": {{"version": "2.0"}},
            "scenes": [{{"nodes": [0]}}],
            "nodes": [{{"name": "tri", "mesh": 0, "scale": [{scale}, {scale}, {scale}]}}],
            "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}, "indices": 1}}]}}],
            "buffers": [{{"byteLength": 44}}],
            "bufferViews": [
                {{"buffer": 0, "byteOffset": 0, "byteLength": 36}},
                {{"buffer": 0, "byteOffset": 36, "byteLength": 6}}
            ],
            "accessors": [
                {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]}},
                {{"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}}
            ]
        }}"#
    );
    let mut json = json.into_bytes();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(b"JSON");
    out.extend_from_slice(&json);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(b"BIN\0");
    out.extend_from_slice(&bin);
    out
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 150, 100, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// A JPEG whose only segment is an EXIF block holding GPS latitude and longitude.
pub fn jpeg_with_gps(latitude: ([u32; 3], char), longitude: ([u32; 3], char)) -> Vec<u8> {
    const GPS_IFD: u32 = 26;
    const LATITUDE: u32 = 80;
    const LONGITUDE: u32 = 104;
    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());

    let entry = |tiff: &mut Vec<u8>, tag: u16, field_type: u16, count: u32, value: [u8; 4]| {
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&field_type.to_le_bytes());
        tiff.extend_from_slice(&count.to_le_bytes());
        tiff.extend_from_slice(&value);
    };
    let ascii = |c: char| [c as u8, 0, 0, 0];

    tiff.extend_from_slice(&1u16.to_le_bytes());
    entry(&mut tiff, 0x8825, 4, 1, GPS_IFD.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(tiff.len(), GPS_IFD as usize);

    tiff.extend_from_slice(&4u16.to_le_bytes());
    entry(&mut tiff, 0x0001, 2, 2, ascii(latitude.1));
    entry(&mut tiff, 0x0002, 5, 3, LATITUDE.to_le_bytes());
    entry(&mut tiff, 0x0003, 2, 2, ascii(longitude.1));
    entry(&mut tiff, 0x0004, 5, 3, LONGITUDE.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(tiff.len(), LATITUDE as usize);

    for value in latitude.0.into_iter().chain(longitude.0) {
        tiff.extend_from_slice(&value.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
    }

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// A progress callback that records every notification.
pub fn progress_recorder() -> (Arc<Mutex<Vec<LoadProgress>>>, ProgressCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, Box::new(move |p| sink.lock().unwrap().push(p)))
}

pub fn percents(seen: &Mutex<Vec<LoadProgress>>) -> Vec<u8> {
    seen.lock().unwrap().iter().map(|p| p.percent).collect()
}
