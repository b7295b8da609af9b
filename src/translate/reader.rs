use crate::errors::Error;
use alloc::format;

/// A cursor over module bytes that reports absolute byte offsets in every
/// error it produces.
///
/// LEB128 readers reject over-long encodings: an encoding may not use more
/// bytes (or set more bits in the final byte) than the declared width needs.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    // Offset of `data[0]` within the module file.
    base: usize,
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::new_with_offset(data, 0)
    }

    pub fn new_with_offset(data: &'a [u8], base: usize) -> Self {
        Self { data, base, pos: 0 }
    }

    /// Absolute byte offset of the next unread byte.
    #[inline]
    pub fn pos(&self) -> usize {
        self.base + self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    pub fn error(&self, message: impl Into<alloc::string::String>) -> Error {
        Error::malformed(self.pos(), message)
    }

    pub fn read_u8(&mut self) -> crate::Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> crate::Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.error(format!(
                "unexpected end of input: {len} bytes requested, {} available",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Splits off a sub-reader covering the next `len` bytes. The sub-reader
    /// keeps reporting absolute file offsets.
    pub fn sub_reader(&mut self, len: usize) -> crate::Result<BinaryReader<'a>> {
        let base = self.pos();
        let bytes = self.read_bytes(len)?;
        Ok(BinaryReader::new_with_offset(bytes, base))
    }

    /// A section body must consume exactly its declared length.
    pub fn expect_empty(&self, what: &str) -> crate::Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.error(format!("trailing bytes in {what}")))
        }
    }

    pub fn read_u32_leb(&mut self) -> crate::Result<u32> {
        let value = self.read_unsigned_leb(32)?;
        Ok(u32::try_from(value).unwrap())
    }

    pub fn read_u64_leb(&mut self) -> crate::Result<u64> {
        self.read_unsigned_leb(64)
    }

    pub fn read_s32_leb(&mut self) -> crate::Result<i32> {
        let value = self.read_signed_leb(32)?;
        Ok(i32::try_from(value).unwrap())
    }

    pub fn read_s64_leb(&mut self) -> crate::Result<i64> {
        self.read_signed_leb(64)
    }

    /// The 33-bit signed integer used by block types.
    pub fn read_s33_leb(&mut self) -> crate::Result<i64> {
        self.read_signed_leb(33)
    }

    fn read_unsigned_leb(&mut self, max_bits: u32) -> crate::Result<u64> {
        let mut result = 0_u64;
        let mut shift = 0_u32;
        loop {
            if shift >= max_bits {
                return Err(self.error("LEB128 integer too long"));
            }
            let byte = self.read_u8()?;
            let content = u64::from(byte & 0x7f);

            // The final byte may not set bits past the declared width.
            let remaining_bits = max_bits - shift;
            if remaining_bits < 7 && content >= (1 << remaining_bits) {
                return Err(self.error("LEB128 integer too large"));
            }

            result |= content << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    fn read_signed_leb(&mut self, max_bits: u32) -> crate::Result<i64> {
        let mut result = 0_i64;
        let mut shift = 0_u32;
        let mut byte;
        loop {
            if shift >= max_bits {
                return Err(self.error("LEB128 integer too long"));
            }
            byte = self.read_u8()?;
            let content = byte & 0x7f;

            // In the final byte the unused bits must agree with the sign bit.
            let remaining_bits = max_bits - shift;
            if remaining_bits < 7 {
                let mask = (0xff_u8 << (remaining_bits - 1)) & 0x7f;
                let masked = content & mask;
                if masked != 0 && masked != mask {
                    return Err(self.error("LEB128 integer too large"));
                }
            }

            result |= i64::from(content) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if shift < 64 && byte & 0x40 != 0 {
            result |= !0_i64 << shift;
        }
        Ok(result)
    }

    pub fn read_f32_bits(&mut self) -> crate::Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f64_bits(&mut self) -> crate::Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_v128(&mut self) -> crate::Result<u128> {
        let bytes = self.read_bytes(16)?;
        Ok(u128::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// A length-prefixed UTF-8 string.
    pub fn read_name(&mut self) -> crate::Result<&'a str> {
        let len = self.read_u32_leb()? as usize;
        let offset = self.pos();
        let bytes = self.read_bytes(len)?;
        core::str::from_utf8(bytes).map_err(|_| Error::malformed(offset, "name is not UTF-8"))
    }

    /// A LEB-prefixed element count, sanity-capped so a hostile count cannot
    /// trigger a huge up-front reservation.
    pub fn read_count(&mut self, what: &str) -> crate::Result<u32> {
        let count = self.read_u32_leb()?;
        if count as usize > self.remaining() {
            return Err(self.error(format!("{what} count {count} larger than section")));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_leb_roundtrip() {
        let mut r = BinaryReader::new(&[0xe5, 0x8e, 0x26]);
        assert_eq!(r.read_u32_leb().unwrap(), 624485);
        assert!(r.is_empty());
    }

    #[test]
    fn signed_leb() {
        let mut r = BinaryReader::new(&[0x7f]);
        assert_eq!(r.read_s32_leb().unwrap(), -1);
        let mut r = BinaryReader::new(&[0xc0, 0xbb, 0x78]);
        assert_eq!(r.read_s32_leb().unwrap(), -123456);
    }

    #[test]
    fn overlong_leb_rejected() {
        // 0 encoded in six bytes; u32 allows at most five.
        let mut r = BinaryReader::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
        assert!(r.read_u32_leb().is_err());
        // Five bytes but with unused high bits set in the last one.
        let mut r = BinaryReader::new(&[0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert!(r.read_u32_leb().is_err());
        // The same pattern is the legitimate encoding of -1 when signed.
        let mut r = BinaryReader::new(&[0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert_eq!(r.read_s32_leb().unwrap(), -1);
    }

    #[test]
    fn errors_report_absolute_offsets() {
        let mut r = BinaryReader::new_with_offset(&[0x01], 40);
        r.read_u8().unwrap();
        let err = r.read_u8().unwrap_err();
        assert_eq!(err.offset(), Some(41));
    }
}
