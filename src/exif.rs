//! EXIF and GPS metadata of JPEG photos.
//!
//! Only a small fixed tag dictionary is read: camera make and model,
//! orientation, capture time, image dimensions and the GPS position.
//! Inputs that are not JPEG, carry no EXIF segment or are structurally
//! broken yield `Ok(None)`. Only an input too small to even hold a JPEG
//! marker is an error.

use std::fmt;

use thiserror::Error;

use crate::decoders::bytes::{Endian, u16_at, u32_at};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EXIF_SIGNATURE: &[u8; 6] = b"Exif\0\0";
const MIN_INPUT_LEN: usize = 4;

mod tag {
    pub const IMAGE_WIDTH: u16 = 0x0100;
    pub const IMAGE_HEIGHT: u16 = 0x0101;
    pub const MAKE: u16 = 0x010F;
    pub const MODEL: u16 = 0x0110;
    pub const ORIENTATION: u16 = 0x0112;
    pub const DATE_TIME: u16 = 0x0132;
    pub const EXIF_IFD: u16 = 0x8769;
    pub const GPS_IFD: u16 = 0x8825;
    pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
    pub const PIXEL_X_DIMENSION: u16 = 0xA002;
    pub const PIXEL_Y_DIMENSION: u16 = 0xA003;
    pub const GPS_LATITUDE_REF: u16 = 0x0001;
    pub const GPS_LATITUDE: u16 = 0x0002;
    pub const GPS_LONGITUDE_REF: u16 = 0x0003;
    pub const GPS_LONGITUDE: u16 = 0x0004;
    pub const GPS_ALTITUDE_REF: u16 = 0x0005;
    pub const GPS_ALTITUDE: u16 = 0x0006;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExifError {
    #[error("image data is truncated: needed {needed} bytes but only {actual} are available")]
    Truncated { needed: usize, actual: usize },
}

/// A WGS84 position. The parser does not range-check; see [`GpsCoordinates::is_valid`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters, negative below sea level.
    pub altitude: Option<f64>,
}

impl GpsCoordinates {
    /// Latitude within `[-90, 90]` and longitude within `[-180, 180]`, both inclusive.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Wall-clock time as written by the camera (`YYYY:MM:DD HH:MM:SS`, no zone).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExifTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl ExifTimestamp {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_end_matches(['\0', ' ']);
        let b = text.as_bytes();
        if b.len() < 19 || b[4] != b':' || b[7] != b':' || b[10] != b' ' || b[13] != b':' || b[16] != b':' {
            return None;
        }
        let number = |range: std::ops::Range<usize>| text.get(range)?.parse::<u16>().ok();
        let timestamp = Self {
            year: number(0..4)?,
            month: number(5..7)? as u8,
            day: number(8..10)? as u8,
            hour: number(11..13)? as u8,
            minute: number(14..16)? as u8,
            second: number(17..19)? as u8,
        };
        let valid = (1..=12).contains(&timestamp.month)
            && (1..=31).contains(&timestamp.day)
            && timestamp.hour < 24
            && timestamp.minute < 60
            && timestamp.second <= 60;
        valid.then_some(timestamp)
    }
}

impl fmt::Display for ExifTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExifRecord {
    pub gps: Option<GpsCoordinates>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub capture_time: Option<ExifTimestamp>,
    pub orientation: Option<u16>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

/// Degrees, minutes and seconds to signed decimal degrees.
///
/// `reference` is the hemisphere letter; `S` and `W` are negative.
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: char) -> f64 {
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    match reference.to_ascii_uppercase() {
        'S' | 'W' => -decimal,
        _ => decimal,
    }
}

/// Extracts the EXIF record of a JPEG image.
pub fn read_exif(data: &[u8]) -> Result<Option<ExifRecord>, ExifError> {
    if data.len() < MIN_INPUT_LEN {
        return Err(ExifError::Truncated {
            needed: MIN_INPUT_LEN,
            actual: data.len(),
        });
    }
    if data[..2] != SOI {
        log::debug!("Not a JPEG image, no EXIF to read");
        return Ok(None);
    }
    let record = find_exif_segment(data).and_then(|tiff| Tiff::parse(tiff)?.record());
    if record.is_none() {
        log::debug!("JPEG carries no readable EXIF segment");
    }
    Ok(record)
}

/// Walks the JPEG marker segments up to the first scan.
fn find_exif_segment(data: &[u8]) -> Option<&[u8]> {
    let mut pos = 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        // Any number of 0xFF fill bytes may precede a marker
        while *data.get(pos + 1)? == 0xFF {
            pos += 1;
        }
        let marker = *data.get(pos + 1)?;
        match marker {
            // Start of scan or end of image: no more metadata segments
            0xDA | 0xD9 => return None,
            // Standalone markers without a length field
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let length = usize::from(u16_at(data, pos + 2, Endian::Big)?);
        if length < 2 {
            return None;
        }
        let segment = data.get(pos + 4..pos + 2 + length)?;
        if marker == 0xE1 && segment.starts_with(EXIF_SIGNATURE) {
            return Some(&segment[EXIF_SIGNATURE.len()..]);
        }
        pos += 2 + length;
    }
}

#[derive(Clone, Copy, Debug)]
struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    /// Absolute position of the 4-byte value/offset field.
    field: usize,
}

/// Byte size of one value of a TIFF field type.
fn type_size(field_type: u16) -> Option<usize> {
    Some(match field_type {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 => 4,
        5 | 10 | 12 => 8,
        _ => return None,
    })
}

struct Tiff<'a> {
    data: &'a [u8],
    order: Endian,
}

impl<'a> Tiff<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        let order = match data.get(..2)? {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return None,
        };
        (u16_at(data, 2, order)? == 42).then_some(Self { data, order })
    }

    fn record(&self) -> Option<ExifRecord> {
        let ifd0 = self.read_ifd(self.u32(4)? as usize)?;
        let mut record = ExifRecord {
            make: self.ascii(find(&ifd0, tag::MAKE)),
            model: self.ascii(find(&ifd0, tag::MODEL)),
            orientation: find(&ifd0, tag::ORIENTATION).and_then(|e| self.unsigned(e)).map(|v| v as u16),
            capture_time: self
                .ascii(find(&ifd0, tag::DATE_TIME))
                .and_then(|t| ExifTimestamp::parse(&t)),
            image_width: find(&ifd0, tag::IMAGE_WIDTH).and_then(|e| self.unsigned(e)),
            image_height: find(&ifd0, tag::IMAGE_HEIGHT).and_then(|e| self.unsigned(e)),
            gps: None,
        };

        if let Some(pointer) = find(&ifd0, tag::EXIF_IFD) {
            let exif = self.read_ifd(self.unsigned(pointer)? as usize)?;
            if let Some(original) = self
                .ascii(find(&exif, tag::DATE_TIME_ORIGINAL))
                .and_then(|t| ExifTimestamp::parse(&t))
            {
                record.capture_time = Some(original);
            }
            let dimension = |t| find(&exif, t).and_then(|e| self.unsigned(e));
            record.image_width = dimension(tag::PIXEL_X_DIMENSION).or(record.image_width);
            record.image_height = dimension(tag::PIXEL_Y_DIMENSION).or(record.image_height);
        }

        if let Some(pointer) = find(&ifd0, tag::GPS_IFD) {
            let gps = self.read_ifd(self.unsigned(pointer)? as usize)?;
            record.gps = self.gps(&gps);
        }
        Some(record)
    }

    fn gps(&self, ifd: &[IfdEntry]) -> Option<GpsCoordinates> {
        let coordinate = |value_tag, ref_tag, default_ref| {
            let dms = self.rationals(find(ifd, value_tag)?)?;
            let [degrees, minutes, seconds]: [f64; 3] = dms.get(..3)?.try_into().ok()?;
            let reference = self
                .ascii(find(ifd, ref_tag))
                .and_then(|r| r.chars().next())
                .unwrap_or(default_ref);
            Some(dms_to_decimal(degrees, minutes, seconds, reference))
        };
        let latitude = coordinate(tag::GPS_LATITUDE, tag::GPS_LATITUDE_REF, 'N')?;
        let longitude = coordinate(tag::GPS_LONGITUDE, tag::GPS_LONGITUDE_REF, 'E')?;
        let altitude = find(ifd, tag::GPS_ALTITUDE)
            .and_then(|e| self.rationals(e))
            .and_then(|values| values.first().copied())
            .map(|altitude| {
                let below_sea_level = find(ifd, tag::GPS_ALTITUDE_REF)
                    .and_then(|e| self.value_bytes(e))
                    .and_then(|b| b.first().copied())
                    == Some(1);
                if below_sea_level { -altitude } else { altitude }
            });
        Some(GpsCoordinates {
            latitude,
            longitude,
            altitude,
        })
    }

    fn u32(&self, offset: usize) -> Option<u32> {
        u32_at(self.data, offset, self.order)
    }

    fn read_ifd(&self, offset: usize) -> Option<Vec<IfdEntry>> {
        let count = usize::from(u16_at(self.data, offset, self.order)?);
        let end = offset.checked_add(2 + count * 12)?;
        if end > self.data.len() {
            return None;
        }
        (0..count)
            .map(|i| {
                let at = offset + 2 + i * 12;
                Some(IfdEntry {
                    tag: u16_at(self.data, at, self.order)?,
                    field_type: u16_at(self.data, at + 2, self.order)?,
                    count: self.u32(at + 4)?,
                    field: at + 8,
                })
            })
            .collect()
    }

    /// The raw value bytes, inline when they fit in four bytes.
    fn value_bytes(&self, entry: &IfdEntry) -> Option<&'a [u8]> {
        let size = type_size(entry.field_type)?.checked_mul(entry.count as usize)?;
        let start = if size <= 4 {
            entry.field
        } else {
            self.u32(entry.field)? as usize
        };
        self.data.get(start..start.checked_add(size)?)
    }

    fn ascii(&self, entry: Option<&IfdEntry>) -> Option<String> {
        let entry = entry.filter(|e| e.field_type == 2)?;
        let text = String::from_utf8_lossy(self.value_bytes(entry)?);
        let text = text.trim_end_matches('\0').trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// First value of a SHORT or LONG field.
    fn unsigned(&self, entry: &IfdEntry) -> Option<u32> {
        let bytes = self.value_bytes(entry)?;
        match entry.field_type {
            3 => u16_at(bytes, 0, self.order).map(u32::from),
            4 => u32_at(bytes, 0, self.order),
            _ => None,
        }
    }

    fn rationals(&self, entry: &IfdEntry) -> Option<Vec<f64>> {
        if entry.field_type != 5 {
            return None;
        }
        let bytes = self.value_bytes(entry)?;
        bytes
            .chunks_exact(8)
            .map(|pair| {
                let numerator = u32_at(pair, 0, self.order)?;
                let denominator = u32_at(pair, 4, self.order)?;
                match (numerator, denominator) {
                    // Some cameras write 0/0 for an unknown component
                    (0, 0) => Some(0.0),
                    (_, 0) => None,
                    (n, d) => Some(f64::from(n) / f64::from(d)),
                }
            })
            .collect()
    }
}

fn find(ifd: &[IfdEntry], tag: u16) -> Option<&IfdEntry> {
    ifd.iter().find(|entry| entry.tag == tag)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// One IFD entry: tag, type, count and the encoded value bytes.
    type Field = (u16, u16, u32, Vec<u8>);

    struct Encoder(Endian);

    impl Encoder {
        fn u16(&self, v: u16) -> [u8; 2] {
            match self.0 {
                Endian::Little => v.to_le_bytes(),
                Endian::Big => v.to_be_bytes(),
            }
        }

        fn u32(&self, v: u32) -> [u8; 4] {
            match self.0 {
                Endian::Little => v.to_le_bytes(),
                Endian::Big => v.to_be_bytes(),
            }
        }

        fn ascii(&self, tag: u16, text: &str) -> Field {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            (tag, 2, bytes.len() as u32, bytes)
        }

        fn short(&self, tag: u16, v: u16) -> Field {
            (tag, 3, 1, self.u16(v).to_vec())
        }

        fn long(&self, tag: u16, v: u32) -> Field {
            (tag, 4, 1, self.u32(v).to_vec())
        }

        fn rationals(&self, tag: u16, values: &[(u32, u32)]) -> Field {
            let bytes = values
                .iter()
                .flat_map(|(n, d)| [self.u32(*n), self.u32(*d)])
                .flatten()
                .collect();
            (tag, 5, values.len() as u32, bytes)
        }

        fn ifd_len(fields: &[Field]) -> usize {
            let external: usize = fields.iter().filter(|f| f.3.len() > 4).map(|f| f.3.len()).sum();
            2 + fields.len() * 12 + 4 + external
        }

        /// Lays out an IFD starting at `start` with its large values behind it.
        fn ifd(&self, start: usize, fields: &[Field]) -> Vec<u8> {
            let mut out = self.u16(fields.len() as u16).to_vec();
            let mut external = Vec::new();
            let mut data_at = start + 2 + fields.len() * 12 + 4;
            for (tag, field_type, count, value) in fields {
                out.extend_from_slice(&self.u16(*tag));
                out.extend_from_slice(&self.u16(*field_type));
                out.extend_from_slice(&self.u32(*count));
                if value.len() <= 4 {
                    let mut inline = value.clone();
                    inline.resize(4, 0);
                    out.extend_from_slice(&inline);
                } else {
                    out.extend_from_slice(&self.u32(data_at as u32));
                    external.extend_from_slice(value);
                    data_at += value.len();
                }
            }
            out.extend_from_slice(&[0; 4]);
            out.extend_from_slice(&external);
            out
        }

        /// TIFF block with IFD0 followed by the optional EXIF and GPS IFDs.
        fn tiff(&self, mut ifd0: Vec<Field>, exif: Option<Vec<Field>>, gps: Option<Vec<Field>>) -> Vec<u8> {
            let pointers = exif.is_some() as usize + gps.is_some() as usize;
            let placeholder: Vec<Field> = (0..pointers).map(|_| self.long(0, 0)).collect();
            let ifd0_len = Self::ifd_len(&[ifd0.clone(), placeholder].concat());
            let mut next = 8 + ifd0_len;
            let mut tail = Vec::new();
            if let Some(exif) = &exif {
                ifd0.push(self.long(tag::EXIF_IFD, next as u32));
                let bytes = self.ifd(next, exif);
                next += bytes.len();
                tail.extend(bytes);
            }
            if let Some(gps) = &gps {
                ifd0.push(self.long(tag::GPS_IFD, next as u32));
                tail.extend(self.ifd(next, gps));
            }
            let mut out = match self.0 {
                Endian::Little => b"II".to_vec(),
                Endian::Big => b"MM".to_vec(),
            };
            out.extend_from_slice(&self.u16(42));
            out.extend_from_slice(&self.u32(8));
            out.extend(self.ifd(8, &ifd0));
            out.extend(tail);
            out
        }
    }

    fn jpeg_with_exif(tiff: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        // JFIF APP0 first, as most encoders write it
        out.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x07, b'J', b'F', b'I', b'F', 0]);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((2 + EXIF_SIGNATURE.len() + tiff.len()) as u16).to_be_bytes());
        out.extend_from_slice(EXIF_SIGNATURE);
        out.extend_from_slice(tiff);
        out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9]);
        out
    }

    fn seoul(e: &Encoder) -> Vec<Field> {
        vec![
            e.ascii(tag::GPS_LATITUDE_REF, "N"),
            e.rationals(tag::GPS_LATITUDE, &[(37, 1), (33, 1), (594, 10)]),
            e.ascii(tag::GPS_LONGITUDE_REF, "E"),
            e.rationals(tag::GPS_LONGITUDE, &[(126, 1), (58, 1), (0, 0)]),
            (tag::GPS_ALTITUDE_REF, 1, 1, vec![1]),
            e.rationals(tag::GPS_ALTITUDE, &[(155, 10)]),
        ]
    }

    #[test]
    fn converts_degrees_minutes_seconds() {
        assert_relative_eq!(dms_to_decimal(37.0, 33.0, 59.4, 'N'), 37.5665, epsilon = 1e-4);
        assert_relative_eq!(dms_to_decimal(37.0, 33.0, 59.4, 'S'), -37.5665, epsilon = 1e-4);
        assert_relative_eq!(dms_to_decimal(122.0, 30.0, 0.0, 'w'), -122.5);
    }

    #[test]
    fn validity_is_boundary_inclusive() {
        let gps = |latitude, longitude| GpsCoordinates {
            latitude,
            longitude,
            altitude: None,
        };
        assert!(gps(90.0, 180.0).is_valid());
        assert!(gps(-90.0, -180.0).is_valid());
        assert!(!gps(91.0, 0.0).is_valid());
        assert!(!gps(0.0, 181.0).is_valid());
        assert!(!gps(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn parses_exif_timestamps() {
        let t = ExifTimestamp::parse("2023:07:14 09:05:33\0").unwrap();
        assert_eq!(t.to_string(), "2023-07-14T09:05:33");
        assert_eq!(ExifTimestamp::parse("0000:00:00 00:00:00"), None);
        assert_eq!(ExifTimestamp::parse("2023-07-14 09:05:33"), None);
        assert_eq!(ExifTimestamp::parse("2023:07"), None);
    }

    #[test]
    fn reads_little_endian_record() {
        let e = Encoder(Endian::Little);
        let ifd0 = vec![
            e.ascii(tag::MAKE, "Canon"),
            e.ascii(tag::MODEL, "R5"),
            e.short(tag::ORIENTATION, 6),
            e.ascii(tag::DATE_TIME, "2024:01:02 03:04:05"),
        ];
        let exif = vec![
            e.ascii(tag::DATE_TIME_ORIGINAL, "2023:12:31 23:59:58"),
            e.long(tag::PIXEL_X_DIMENSION, 8192),
            e.short(tag::PIXEL_Y_DIMENSION, 5464),
        ];
        let jpeg = jpeg_with_exif(&e.tiff(ifd0, Some(exif), Some(seoul(&e))));
        let record = read_exif(&jpeg).unwrap().unwrap();

        assert_eq!(record.make.as_deref(), Some("Canon"));
        assert_eq!(record.model.as_deref(), Some("R5"));
        assert_eq!(record.orientation, Some(6));
        assert_eq!(record.capture_time.unwrap().to_string(), "2023-12-31T23:59:58");
        assert_eq!((record.image_width, record.image_height), (Some(8192), Some(5464)));
        let gps = record.gps.unwrap();
        assert_relative_eq!(gps.latitude, 37.5665, epsilon = 1e-4);
        assert_relative_eq!(gps.longitude, 126.9667, epsilon = 1e-4);
        assert_relative_eq!(gps.altitude.unwrap(), -15.5);
        assert!(gps.is_valid());
    }

    #[test]
    fn reads_big_endian_gps() {
        let e = Encoder(Endian::Big);
        let gps = vec![
            e.ascii(tag::GPS_LATITUDE_REF, "S"),
            e.rationals(tag::GPS_LATITUDE, &[(33, 1), (52, 1), (0, 1)]),
            e.ascii(tag::GPS_LONGITUDE_REF, "E"),
            e.rationals(tag::GPS_LONGITUDE, &[(151, 1), (12, 1), (36, 1)]),
        ];
        let jpeg = jpeg_with_exif(&e.tiff(vec![e.short(tag::ORIENTATION, 1)], None, Some(gps)));
        let record = read_exif(&jpeg).unwrap().unwrap();
        let gps = record.gps.unwrap();
        assert_relative_eq!(gps.latitude, -33.8667, epsilon = 1e-4);
        assert_relative_eq!(gps.longitude, 151.21, epsilon = 1e-4);
        assert_eq!(gps.altitude, None);
        assert_eq!(record.make, None);
    }

    #[test]
    fn tiny_inputs_are_errors() {
        for len in 0..MIN_INPUT_LEN {
            let err = read_exif(&[0xFF, 0xD8, 0xFF][..len.min(3)]).unwrap_err();
            assert!(matches!(err, ExifError::Truncated { needed: 4, .. }));
        }
    }

    #[test]
    fn missing_or_broken_exif_is_none() {
        assert_eq!(read_exif(b"\x89PNG\r\n\x1a\n").unwrap(), None);

        let plain_jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0, 0, 0xFF, 0xD9];
        assert_eq!(read_exif(&plain_jpeg).unwrap(), None);

        let e = Encoder(Endian::Little);
        let mut tiff = e.tiff(vec![e.short(tag::ORIENTATION, 1)], None, None);
        tiff[0..2].copy_from_slice(b"XX");
        assert_eq!(read_exif(&jpeg_with_exif(&tiff)).unwrap(), None);

        // GPS pointer past the end of the segment
        let mut tiff = e.tiff(vec![e.short(tag::ORIENTATION, 1)], None, Some(seoul(&e)));
        let ifd0_end = 8 + Encoder::ifd_len(&[e.short(0, 0), e.long(0, 0)]);
        tiff.truncate(ifd0_end);
        assert_eq!(read_exif(&jpeg_with_exif(&tiff)).unwrap(), None);
    }
}
