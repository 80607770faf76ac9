//! Little-endian field access over fixed-size wire buffers.
//!
//! Every structure on the wire has a hand-specified layout; these cursors
//! keep the offset arithmetic in one place and turn any overrun into a
//! [`WireError::Truncated`] instead of a panic.

use crate::WireError;

pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let end = self
            .at
            .checked_add(bytes.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::Truncated("write past end of buffer"))?;
        self.buf[self.at..end].copy_from_slice(bytes);
        self.at = end;
        Ok(())
    }

    pub(crate) fn put_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.put(&[value])
    }

    pub(crate) fn put_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.put(&value.to_le_bytes())
    }

    pub(crate) fn put_u64(&mut self, value: u64) -> Result<(), WireError> {
        self.put(&value.to_le_bytes())
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.put(bytes)
    }
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .at
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::Truncated("read past end of buffer"))?;
        let slice = &self.buf[self.at..end];
        self.at = end;
        Ok(slice)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        self.take(len)
    }
}
