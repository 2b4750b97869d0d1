//! Byte order of multi-byte numeric fields.
//!
//! Formats that do not fix their byte order on disk have it resolved once,
//! when a file is opened, by probing a header field that must equal a known
//! constant.  The resolved [`Endian`] is stored on the handle and every later
//! numeric read goes through it.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// Both candidate interpretations, in probing order.
    pub const CANDIDATES: [Endian; 2] = [Endian::Little, Endian::Big];

    /// Return the first interpretation under which the 32-bit field in `buf`
    /// decodes to `expected`, or `None` if neither does.
    pub fn resolve_i32(buf: &[u8], expected: i32) -> Option<Endian> {
        Self::CANDIDATES
            .into_iter()
            .find(|e| e.decode_i32(buf) == expected)
    }

    pub fn name(self) -> &'static str {
        match self {
            Endian::Little => "little-endian",
            Endian::Big    => "big-endian",
        }
    }

    // ── Slice decoding ───────────────────────────────────────────────────────

    pub fn decode_i16(self, buf: &[u8]) -> i16 {
        match self {
            Endian::Little => LittleEndian::read_i16(buf),
            Endian::Big    => BigEndian::read_i16(buf),
        }
    }

    pub fn decode_i32(self, buf: &[u8]) -> i32 {
        match self {
            Endian::Little => LittleEndian::read_i32(buf),
            Endian::Big    => BigEndian::read_i32(buf),
        }
    }

    pub fn decode_f32(self, buf: &[u8]) -> f32 {
        match self {
            Endian::Little => LittleEndian::read_f32(buf),
            Endian::Big    => BigEndian::read_f32(buf),
        }
    }

    // ── Stream I/O ───────────────────────────────────────────────────────────

    pub fn read_i32<R: Read>(self, reader: &mut R) -> io::Result<i32> {
        match self {
            Endian::Little => reader.read_i32::<LittleEndian>(),
            Endian::Big    => reader.read_i32::<BigEndian>(),
        }
    }

    pub fn read_f32_into<R: Read>(self, reader: &mut R, dst: &mut [f32]) -> io::Result<()> {
        match self {
            Endian::Little => reader.read_f32_into::<LittleEndian>(dst),
            Endian::Big    => reader.read_f32_into::<BigEndian>(dst),
        }
    }

    pub fn read_i32_into<R: Read>(self, reader: &mut R, dst: &mut [i32]) -> io::Result<()> {
        match self {
            Endian::Little => reader.read_i32_into::<LittleEndian>(dst),
            Endian::Big    => reader.read_i32_into::<BigEndian>(dst),
        }
    }

    pub fn write_i32<W: Write>(self, writer: &mut W, v: i32) -> io::Result<()> {
        match self {
            Endian::Little => writer.write_i32::<LittleEndian>(v),
            Endian::Big    => writer.write_i32::<BigEndian>(v),
        }
    }

    pub fn write_f32<W: Write>(self, writer: &mut W, v: f32) -> io::Result<()> {
        match self {
            Endian::Little => writer.write_f32::<LittleEndian>(v),
            Endian::Big    => writer.write_f32::<BigEndian>(v),
        }
    }

    pub fn write_point<W: Write>(self, writer: &mut W, p: &[f32; 3]) -> io::Result<()> {
        for &c in p {
            self.write_f32(writer, c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_little_endian_first() {
        let buf = 1000i32.to_le_bytes();
        assert_eq!(Endian::resolve_i32(&buf, 1000), Some(Endian::Little));
    }

    #[test]
    fn falls_back_to_big_endian() {
        let buf = 1000i32.to_be_bytes();
        assert_eq!(Endian::resolve_i32(&buf, 1000), Some(Endian::Big));
    }

    #[test]
    fn neither_interpretation_matches() {
        let buf = 999i32.to_le_bytes();
        assert_eq!(Endian::resolve_i32(&buf, 1000), None);
    }

    #[test]
    fn stream_roundtrip_big() {
        let mut out = Vec::new();
        Endian::Big.write_i32(&mut out, -7).unwrap();
        Endian::Big.write_f32(&mut out, 1.5).unwrap();
        assert_eq!(&out[..4], &(-7i32).to_be_bytes());

        let mut cur = std::io::Cursor::new(out);
        assert_eq!(Endian::Big.read_i32(&mut cur).unwrap(), -7);
        let mut f = [0f32; 1];
        Endian::Big.read_f32_into(&mut cur, &mut f).unwrap();
        assert_eq!(f[0], 1.5);
    }
}
