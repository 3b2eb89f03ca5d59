//! Primitive encodings compatible with .NET `BinaryWriter` / `BinaryReader`:
//! little-endian `int32`, one-byte `bool`, and strings as a 7-bit encoded
//! byte length followed by UTF-8.

use std::io::{self, Read, Write};

const MAX_BLOB_LEN: usize = i32::MAX as usize;

pub trait BinaryWrite: Write {
    fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.write_all(&[value])
    }

    fn write_bool(&mut self, value: bool) -> io::Result<()> {
        self.write_u8(value as u8)
    }

    fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_len(&mut self, len: usize) -> io::Result<()> {
        let len = i32::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds int32"))?;
        self.write_i32(len)
    }

    fn write_7bit(&mut self, mut value: u32) -> io::Result<()> {
        while value >= 0x80 {
            self.write_u8((value as u8) | 0x80)?;
            value >>= 7;
        }
        self.write_u8(value as u8)
    }

    fn write_string(&mut self, value: &str) -> io::Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
        self.write_7bit(len)?;
        self.write_all(value.as_bytes())
    }

    /// `int32 length` followed by the raw bytes.
    fn write_blob(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_len(bytes.len())?;
        self.write_all(bytes)
    }
}

impl<W: Write + ?Sized> BinaryWrite for W {}

pub trait BinaryRead: Read {
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_bool(&mut self) -> io::Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(invalid(format!("invalid bool byte {other:#x}"))),
        }
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Reads an `int32` that must be a non-negative length or count.
    fn read_len(&mut self) -> io::Result<usize> {
        let value = self.read_i32()?;
        usize::try_from(value).map_err(|_| invalid(format!("negative length {value}")))
    }

    fn read_7bit(&mut self) -> io::Result<u32> {
        let mut result = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            if shift == 28 && byte > 0x0F {
                return Err(invalid("7-bit encoded int overflows".to_string()));
            }
            result |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(invalid("7-bit encoded int is too long".to_string()))
    }

    fn read_string(&mut self) -> io::Result<String> {
        let len = self.read_7bit()? as usize;
        let bytes = self.read_exact_vec(len)?;
        String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
    }

    fn read_blob(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_len()?;
        self.read_exact_vec(len)
    }

    /// Reads exactly `len` bytes without trusting `len` for the allocation.
    fn read_exact_vec(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if len > MAX_BLOB_LEN {
            return Err(invalid(format!("length {len} is too large")));
        }
        let mut bytes = Vec::new();
        Read::take(&mut *self, len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes, got {}", bytes.len()),
            ));
        }
        Ok(bytes)
    }
}

impl<R: Read + ?Sized> BinaryRead for R {}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn seven_bit_length_matches_dotnet_layout() {
        let mut buf = Vec::new();
        buf.write_string(&"a".repeat(200)).unwrap();
        // 200 = 0xC8 -> 0xC8 | 0x80, 0x01
        assert_eq!(&buf[..2], &[0xC8, 0x01]);
        assert_eq!(buf.len(), 202);

        let mut reader = Cursor::new(buf);
        assert_eq!(reader.read_string().unwrap().len(), 200);
    }

    #[test]
    fn short_string_uses_single_length_byte() {
        let mut buf = Vec::new();
        buf.write_string("abc").unwrap();
        assert_eq!(buf, vec![3, b'a', b'b', b'c']);
    }

    #[test]
    fn truncated_blob_is_an_error() {
        let mut buf = Vec::new();
        buf.write_i32(10).unwrap();
        buf.extend_from_slice(&[1, 2, 3]);
        let err = Cursor::new(buf).read_blob().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut buf = Vec::new();
        buf.write_i32(-1).unwrap();
        assert!(Cursor::new(buf).read_len().is_err());
    }
}
