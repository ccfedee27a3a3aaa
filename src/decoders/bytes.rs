//! Bounds-checked, byte-order aware reads over a borrowed buffer.

use std::io::{self, Cursor};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use crate::{error::LoadError, format::AssetFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

fn slice_at(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(len)?)
}

pub fn u16_at(data: &[u8], offset: usize, order: Endian) -> Option<u16> {
    let b = slice_at(data, offset, 2)?;
    Some(match order {
        Endian::Little => LittleEndian::read_u16(b),
        Endian::Big => BigEndian::read_u16(b),
    })
}

pub fn u32_at(data: &[u8], offset: usize, order: Endian) -> Option<u32> {
    let b = slice_at(data, offset, 4)?;
    Some(match order {
        Endian::Little => LittleEndian::read_u32(b),
        Endian::Big => BigEndian::read_u32(b),
    })
}

pub fn u64_at(data: &[u8], offset: usize, order: Endian) -> Option<u64> {
    let b = slice_at(data, offset, 8)?;
    Some(match order {
        Endian::Little => LittleEndian::read_u64(b),
        Endian::Big => BigEndian::read_u64(b),
    })
}

pub fn i32_at(data: &[u8], offset: usize, order: Endian) -> Option<i32> {
    let b = slice_at(data, offset, 4)?;
    Some(match order {
        Endian::Little => LittleEndian::read_i32(b),
        Endian::Big => BigEndian::read_i32(b),
    })
}

pub fn f32_at(data: &[u8], offset: usize, order: Endian) -> Option<f32> {
    let b = slice_at(data, offset, 4)?;
    Some(match order {
        Endian::Little => LittleEndian::read_f32(b),
        Endian::Big => BigEndian::read_f32(b),
    })
}

pub fn f64_at(data: &[u8], offset: usize, order: Endian) -> Option<f64> {
    let b = slice_at(data, offset, 8)?;
    Some(match order {
        Endian::Little => LittleEndian::read_f64(b),
        Endian::Big => BigEndian::read_f64(b),
    })
}

/// Reads one value in the reader's byte order.
macro_rules! read_ordered {
    ($name:ident, $ty:ty, $width:expr) => {
        pub fn $name(&mut self) -> Result<$ty, LoadError> {
            let order = self.order;
            self.read($width, |cursor| match order {
                Endian::Little => cursor.$name::<LittleEndian>(),
                Endian::Big => cursor.$name::<BigEndian>(),
            })
        }
    };
}

/// Sequential reader that turns running off the end into [`LoadError::TruncatedBuffer`].
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
    order: Endian,
    format: AssetFormat,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], order: Endian, format: AssetFormat) -> Self {
        Self {
            cursor: Cursor::new(data),
            order,
            format,
        }
    }

    fn data(&self) -> &'a [u8] {
        *self.cursor.get_ref()
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.data().len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), LoadError> {
        let len = self.data().len();
        if pos > len {
            return Err(LoadError::truncated(self.format, pos, len));
        }
        self.cursor.set_position(pos as u64);
        Ok(())
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], LoadError> {
        let data = self.data();
        let pos = self.position();
        let slice = slice_at(data, pos, len)
            .ok_or_else(|| LoadError::truncated(self.format, pos.saturating_add(len), data.len()))?;
        self.cursor.set_position((pos + len) as u64);
        Ok(slice)
    }

    /// Runs `read` on the cursor; a short read leaves the position unchanged.
    fn read<T>(
        &mut self,
        width: usize,
        read: impl FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    ) -> Result<T, LoadError> {
        let pos = self.cursor.position();
        match read(&mut self.cursor) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.cursor.set_position(pos);
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    Err(LoadError::truncated(
                        self.format,
                        (pos as usize).saturating_add(width),
                        self.data().len(),
                    ))
                } else {
                    Err(err.into())
                }
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, LoadError> {
        self.read(1, |cursor| cursor.read_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, LoadError> {
        self.read(1, |cursor| cursor.read_i8())
    }

    read_ordered!(read_u16, u16, 2);
    read_ordered!(read_i16, i16, 2);
    read_ordered!(read_u32, u32, 4);
    read_ordered!(read_i32, i32, 4);
    read_ordered!(read_u64, u64, 8);
    read_ordered!(read_i64, i64, 8);
    read_ordered!(read_f32, f32, 4);
    read_ordered!(read_f64, f64, 8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_byte_orders() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(u32_at(&data, 0, Endian::Little), Some(0x0403_0201));
        assert_eq!(u32_at(&data, 0, Endian::Big), Some(0x0102_0304));
        assert_eq!(u16_at(&data, 3, Endian::Little), None);
        assert_eq!(u32_at(&data, usize::MAX, Endian::Little), None);
    }

    #[test]
    fn reader_reports_truncation() {
        let data = 1.5f64.to_le_bytes();
        let mut reader = ByteReader::new(&data, Endian::Little, AssetFormat::PointCloudGeneric);
        assert_eq!(reader.read_f64().unwrap(), 1.5);
        assert!(reader.is_empty());
        let err = reader.read_u8().unwrap_err();
        assert!(matches!(
            err,
            LoadError::TruncatedBuffer {
                needed: 9,
                actual: 8,
                ..
            }
        ));
    }

    #[test]
    fn short_reads_keep_the_position() {
        let data = [0x00, 0x01, 0x02];
        let mut reader = ByteReader::new(&data, Endian::Big, AssetFormat::PointCloudGeneric);
        assert_eq!(reader.read_u8().unwrap(), 0);
        let err = reader.read_u32().unwrap_err();
        assert!(matches!(err, LoadError::TruncatedBuffer { needed: 5, actual: 3, .. }));
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
    }
}
