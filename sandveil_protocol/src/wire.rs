// Bounds-checked cursors over flat byte buffers.
//
// All scalar fields travel little-endian. `Writer` appends into a caller-
// provided slice, `Reader` consumes from one; both fail loudly with
// `WireError` on overrun instead of truncating. The drop-if-would-overflow
// policy for whole messages lives one layer up, in `buffer.rs` — these
// cursors only guarantee that no read or write ever crosses the end of the
// buffer unnoticed.

use thiserror::Error;

use crate::types::EntityRef;

/// Errors raised by the wire cursors and message decoders.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// A read or write would cross the end of the buffer.
    #[error("unexpected end of buffer (needed {needed} bytes, {remaining} remaining)")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A message tag byte that is not in the catalog.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// A count or length field exceeding its catalog bound.
    #[error("count field out of range: {0}")]
    BadCount(usize),
}

/// Appending cursor over a mutable byte slice.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Writer<'a> {
        Writer { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.put_bytes(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_i8(&mut self, v: i8) -> Result<(), WireError> {
        self.put_u8(v as u8)
    }

    pub fn put_entity_ref(&mut self, r: EntityRef) -> Result<(), WireError> {
        self.put_u16(r.to_wire())
    }

    pub fn put_bytes(&mut self, src: &[u8]) -> Result<(), WireError> {
        if src.len() > self.remaining() {
            return Err(WireError::UnexpectedEnd {
                needed: src.len(),
                remaining: self.remaining(),
            });
        }
        self.buf[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
        Ok(())
    }
}

/// Consuming cursor over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take_bytes(1)?[0])
    }

    pub fn take_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn take_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn take_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.take_u8()? as i8)
    }

    pub fn take_entity_ref(&mut self) -> Result<EntityRef, WireError> {
        Ok(EntityRef::from_wire(self.take_u16()?))
    }

    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.put_u8(0xAB).unwrap();
        w.put_u16(0x1234).unwrap();
        w.put_u32(0xDEAD_BEEF).unwrap();
        w.put_i8(-5).unwrap();
        let written = w.written();
        assert_eq!(written, 8);

        let mut r = Reader::new(&buf[..written]);
        assert_eq!(r.take_u8().unwrap(), 0xAB);
        assert_eq!(r.take_u16().unwrap(), 0x1234);
        assert_eq!(r.take_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.take_i8().unwrap(), -5);
        assert!(r.is_empty());
    }

    #[test]
    fn little_endian_layout() {
        let mut buf = [0u8; 2];
        Writer::new(&mut buf).put_u16(0x0102).unwrap();
        assert_eq!(buf, [0x02, 0x01]);
    }

    #[test]
    fn write_past_end_fails() {
        let mut buf = [0u8; 3];
        let mut w = Writer::new(&mut buf);
        w.put_u16(1).unwrap();
        let err = w.put_u16(2).unwrap_err();
        assert_eq!(
            err,
            WireError::UnexpectedEnd {
                needed: 2,
                remaining: 1
            }
        );
        // One byte still available; the failed write consumed nothing.
        assert_eq!(w.remaining(), 1);
        w.put_u8(7).unwrap();
    }

    #[test]
    fn read_past_end_fails() {
        let buf = [1u8];
        let mut r = Reader::new(&buf);
        assert!(r.take_u32().is_err());
        // Failed read consumed nothing.
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.take_u8().unwrap(), 1);
    }

    #[test]
    fn entity_ref_through_cursor() {
        let mut buf = [0u8; 2];
        let r = EntityRef::unit(900);
        Writer::new(&mut buf).put_entity_ref(r).unwrap();
        assert_eq!(Reader::new(&buf).take_entity_ref().unwrap(), r);
    }
}
