//! Fixed-width little-endian primitives shared by every wire encoder.

use glam::Vec2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("attempted to read {requested} bytes but only {available} available")]
    UnexpectedEnd { requested: usize, available: usize },
    #[error("length prefix {0} is out of range")]
    LengthOutOfRange(i64),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_vec2(&mut self, value: Vec2) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Writes an `i32` length prefix followed by the raw bytes.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::UnexpectedEnd {
                requested: count,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take_array().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.take_array().map(i32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.take_array().map(f32::from_le_bytes)
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, DecodeError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        Ok(Vec2::new(x, y))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(DecodeError::LengthOutOfRange(len as i64));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_i32()?;
        if len < 0 || len as usize > self.remaining() {
            return Err(DecodeError::LengthOutOfRange(i64::from(len)));
        }
        self.take(len as usize)
    }

    /// Reads an `i32` element count, rejecting negative values and counts that
    /// could not possibly fit in the remaining bytes.
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, DecodeError> {
        let count = self.read_i32()?;
        if count < 0 || (count as usize).saturating_mul(min_element_size) > self.remaining() {
            return Err(DecodeError::LengthOutOfRange(i64::from(count)));
        }
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut writer = WireWriter::new();
        writer.write_u32(0x0102_0304);
        writer.write_u16(0x0506);
        assert_eq!(writer.into_bytes(), vec![4, 3, 2, 1, 6, 5]);
    }

    #[test]
    fn mixed_fields_read_back_in_order() {
        let mut writer = WireWriter::new();
        writer.write_i32(-5);
        writer.write_bool(true);
        writer.write_string("leap");
        writer.write_vec2(Vec2::new(1.5, -2.0));
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_i32().unwrap(), -5);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_string().unwrap(), "leap");
        assert_eq!(reader.read_vec2().unwrap(), Vec2::new(1.5, -2.0));
        assert!(reader.is_exhausted());
    }

    #[test]
    fn short_buffer_reports_unexpected_end() {
        let mut reader = WireReader::new(&[1, 2]);
        assert_eq!(
            reader.read_u32(),
            Err(DecodeError::UnexpectedEnd {
                requested: 4,
                available: 2
            })
        );
    }

    #[test]
    fn oversized_string_length_is_rejected() {
        let mut writer = WireWriter::new();
        writer.write_u32(1000);
        writer.write_raw(b"abc");
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(
            reader.read_string(),
            Err(DecodeError::LengthOutOfRange(1000))
        );
    }

    #[test]
    fn negative_count_is_rejected() {
        let bytes = (-1i32).to_le_bytes();
        let mut reader = WireReader::new(&bytes);
        assert!(reader.read_count(1).is_err());
    }
}
