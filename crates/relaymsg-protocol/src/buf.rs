use crate::error::CodecError;
use bytes::BufMut;

/// A read cursor over one packet body. Every `read_*` method advances the
/// cursor and fails with [`CodecError::FieldOverrun`] naming the field if
/// the body doesn't have enough bytes left.
pub struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        if self.data.len() - self.pos < n {
            return Err(CodecError::FieldOverrun { field });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        let bytes: [u8; 4] = self.take(4, field)?.try_into().unwrap();
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        Ok(self.read_u32(field)? as i32)
    }

    pub fn read_i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        let bytes: [u8; 8] = self.take(8, field)?.try_into().unwrap();
        Ok(i64::from_be_bytes(bytes))
    }

    /// A length-prefixed (`u16`, big-endian) UTF-8 string.
    pub fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len_bytes: [u8; 2] = self.take(2, field)?.try_into().unwrap();
        let len = u16::from_be_bytes(len_bytes) as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    /// Every remaining byte in the body — used for the trailing `Payload`
    /// field, which carries no length prefix of its own.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let rest = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        rest
    }
}

/// Write helpers matching [`BodyReader`]'s encoding, used to build a packet
/// body before the fixed header and remaining-length are prepended.
pub trait BodyWriterExt: BufMut {
    fn write_string(&mut self, s: &str) {
        self.put_u16(s.len() as u16);
        self.put_slice(s.as_bytes());
    }
}

impl<T: BufMut> BodyWriterExt for T {}
