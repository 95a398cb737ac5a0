//! Fixed-width binary codec.
//!
//! Every integer on the wire is little-endian and fixed width. `Writer` grows a
//! `BytesMut`; `Reader` borrows a received slice and reports truncation instead
//! of panicking, because payloads come straight off an untrusted socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::math::Vec3;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("payload ended early: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("unknown operation tag {0}")]
    UnknownTag(u8),
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("negative length {0}")]
    NegativeLength(i32),
    #[error("step range starting at {marker} with {count} ops overflows")]
    StepOverflow { marker: u32, count: i32 },
}

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    /// Length-prefixed (`i32`) UTF-8 string.
    pub fn write_str(&mut self, v: &str) {
        self.write_i32(v.len() as i32);
        self.buf.put_slice(v.as_bytes());
    }

    /// Raw bytes, no length prefix.
    pub fn write_raw(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// The unread tail, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn need(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.len() < needed {
            return Err(WireError::UnexpectedEnd {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, WireError> {
        Ok(Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(WireError::NegativeLength(len));
        }
        let len = len as usize;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        let s = std::str::from_utf8(head).map_err(|_| WireError::InvalidUtf8)?;
        self.buf = tail;
        Ok(s.to_string())
    }
}

/// A value with a fixed wire layout.
///
/// Implemented for the primitives collections and sync fields are built from.
pub trait Field: Sized {
    fn write(&self, w: &mut Writer);
    fn read(r: &mut Reader<'_>) -> Result<Self, WireError>;
}

macro_rules! field_impl {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Field for $ty {
            fn write(&self, w: &mut Writer) {
                w.$write(*self);
            }

            fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
                r.$read()
            }
        }
    };
}

field_impl!(u8, write_u8, read_u8);
field_impl!(bool, write_bool, read_bool);
field_impl!(u16, write_u16, read_u16);
field_impl!(i32, write_i32, read_i32);
field_impl!(u32, write_u32, read_u32);
field_impl!(i64, write_i64, read_i64);
field_impl!(u64, write_u64, read_u64);
field_impl!(f32, write_f32, read_f32);
field_impl!(Vec3, write_vec3, read_vec3);

impl Field for String {
    fn write(&self, w: &mut Writer) {
        w.write_str(self);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.read_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut w = Writer::new();
        w.write_u32(1);
        w.write_u16(0x0102);
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[1, 0, 0, 0, 0x02, 0x01]);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut r = Reader::new(&[1, 2]);
        assert_eq!(
            r.read_u32(),
            Err(WireError::UnexpectedEnd {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn string_length_is_checked() {
        let mut w = Writer::new();
        w.write_i32(10);
        w.write_raw(b"abc");
        let bytes = w.freeze();
        assert!(Reader::new(&bytes).read_string().is_err());

        let mut w = Writer::new();
        w.write_i32(-1);
        let bytes = w.freeze();
        assert_eq!(
            Reader::new(&bytes).read_string(),
            Err(WireError::NegativeLength(-1))
        );
    }

    #[test]
    fn mixed_fields_read_back_in_order() {
        let mut w = Writer::new();
        "ammo".to_string().write(&mut w);
        42i32.write(&mut w);
        Vec3::new(1.0, 2.0, 3.0).write(&mut w);
        let bytes = w.freeze();

        let mut r = Reader::new(&bytes);
        assert_eq!(String::read(&mut r).unwrap(), "ammo");
        assert_eq!(i32::read(&mut r).unwrap(), 42);
        assert_eq!(Vec3::read(&mut r).unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r.remaining(), 0);
    }
}
