//! TrackVis `.trk` adapter.
//!
//! # Layout
//! A fixed 1000-byte header followed by variable-length records:
//!
//! ```text
//! offset   0  "TRACK" + 1 separator byte
//! offset   6  dim            3 × i16
//! offset  12  voxel_size     3 × f32
//! offset  36  n_scalars      i16
//! offset 238  n_properties   i16
//! offset 988  n_count        i32   (0 = unknown, recount from data)
//! offset 992  version        i32
//! offset 996  hdr_size       i32   (always 1000)
//!
//! record: i32 n_points | n_points × (3 + n_scalars) f32 | n_properties f32
//! ```
//!
//! # Endianness
//! The file does not declare its byte order.  It is resolved on open from
//! `hdr_size`, which must decode to 1000 under exactly the interpretation the
//! writer used.  Little-endian is probed first.  Files are always written
//! little-endian.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Format, Streamline};
use crate::endian::Endian;
use crate::error::{Result, TractError};
use crate::header::{Header, HeaderKey, VolumeGeometry};

pub const MAGIC:       &[u8; 5] = b"TRACK";
pub const HEADER_SIZE: usize    = 1000;
pub const DATA_OFFSET: u64      = HEADER_SIZE as u64;
pub const VERSION:     i32      = 2;

mod offsets {
    pub const DIM:          usize = 6;
    pub const VOXEL_SIZE:   usize = 12;
    pub const N_SCALARS:    usize = 36;
    pub const N_PROPERTIES: usize = 238;
    pub const N_COUNT:      usize = 988;
    pub const VERSION_AT:   usize = 992;
    pub const HDR_SIZE:     usize = 996;
}

/// Check the 5-byte signature.  Any I/O failure counts as "not TRK".
pub fn detect(path: &Path) -> bool {
    let mut sig = [0u8; MAGIC.len()];
    match File::open(path) {
        Ok(mut f) => f.read_exact(&mut sig).is_ok() && &sig == MAGIC,
        Err(_)    => false,
    }
}

// ── Record layout ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct RecordLayout {
    scalars:    u64,
    properties: u64,
}

impl RecordLayout {
    fn from_header(h: &Header) -> Self {
        Self {
            scalars:    h.get(HeaderKey::NbScalarsPerPoint).max(0) as u64,
            properties: h.get(HeaderKey::NbPropertiesPerTract).max(0) as u64,
        }
    }

    fn row_width(self) -> usize {
        3 + self.scalars as usize
    }

    /// Bytes that follow the 4-byte point count.
    fn body_len(self, n_points: u64) -> u64 {
        (n_points * (3 + self.scalars) + self.properties) * 4
    }
}

// ── Header codec ─────────────────────────────────────────────────────────────

fn decode_header(buf: &[u8]) -> std::result::Result<(Header, Endian), String> {
    use offsets::*;

    let endian = Endian::resolve_i32(&buf[HDR_SIZE..HDR_SIZE + 4], HEADER_SIZE as i32)
        .ok_or_else(|| format!(
            "hdr_size decodes to {} (LE) / {} (BE), expected {HEADER_SIZE}",
            Endian::Little.decode_i32(&buf[HDR_SIZE..]),
            Endian::Big.decode_i32(&buf[HDR_SIZE..]),
        ))?;

    let n_scalars    = endian.decode_i16(&buf[N_SCALARS..]);
    let n_properties = endian.decode_i16(&buf[N_PROPERTIES..]);
    let n_count      = endian.decode_i32(&buf[N_COUNT..]);
    let version      = endian.decode_i32(&buf[VERSION_AT..]);

    if n_scalars < 0 {
        return Err(format!("negative n_scalars {n_scalars}"));
    }
    if n_properties < 0 {
        return Err(format!("negative n_properties {n_properties}"));
    }
    if n_count < 0 {
        return Err(format!("negative n_count {n_count}"));
    }

    let mut header = Header::new();
    header.set(HeaderKey::NbScalarsPerPoint,    n_scalars as i64);
    header.set(HeaderKey::NbPropertiesPerTract, n_properties as i64);
    header.set(HeaderKey::NbFibers,             n_count as i64);
    header.set(HeaderKey::Version,              version as i64);
    header.set(HeaderKey::DataOffset,           HEADER_SIZE as i64);

    let dim        = [0, 1, 2].map(|i| endian.decode_i16(&buf[DIM + 2 * i..]));
    let voxel_size = [0, 1, 2].map(|i| endian.decode_f32(&buf[VOXEL_SIZE + 4 * i..]));
    if dim.iter().any(|&d| d != 0) {
        header.geometry = Some(VolumeGeometry { dim, voxel_size });
    }

    Ok((header, endian))
}

fn encode_header(h: &Header) -> std::result::Result<[u8; HEADER_SIZE], String> {
    use offsets::*;

    let n_scalars = i16::try_from(h.get(HeaderKey::NbScalarsPerPoint))
        .ok()
        .filter(|&n| n >= 0)
        .ok_or_else(|| format!("n_scalars {} outside 0..=i16::MAX", h.get(HeaderKey::NbScalarsPerPoint)))?;
    let n_properties = i16::try_from(h.get(HeaderKey::NbPropertiesPerTract))
        .ok()
        .filter(|&n| n >= 0)
        .ok_or_else(|| format!("n_properties {} outside 0..=i16::MAX", h.get(HeaderKey::NbPropertiesPerTract)))?;
    let n_count = i32::try_from(h.nb_fibers())
        .map_err(|_| "fiber count does not fit in i32".to_string())?;

    let mut buf = [0u8; HEADER_SIZE];
    buf[..MAGIC.len()].copy_from_slice(MAGIC);
    if let Some(g) = &h.geometry {
        for i in 0..3 {
            LittleEndian::write_i16(&mut buf[DIM + 2 * i..], g.dim[i]);
            LittleEndian::write_f32(&mut buf[VOXEL_SIZE + 4 * i..], g.voxel_size[i]);
        }
    }
    LittleEndian::write_i16(&mut buf[N_SCALARS..],    n_scalars);
    LittleEndian::write_i16(&mut buf[N_PROPERTIES..], n_properties);
    LittleEndian::write_i32(&mut buf[N_COUNT..],      n_count);
    LittleEndian::write_i32(&mut buf[VERSION_AT..],   VERSION);
    LittleEndian::write_i32(&mut buf[HDR_SIZE..],     HEADER_SIZE as i32);
    Ok(buf)
}

/// Walk the record chain from the data offset without decoding payloads and
/// return the number of records.  The chain must land exactly on `file_len`.
fn count_records<R: Read + Seek>(
    reader:   &mut BufReader<R>,
    endian:   Endian,
    layout:   RecordLayout,
    file_len: u64,
) -> Result<u64> {
    reader.seek(SeekFrom::Start(DATA_OFFSET))?;

    let mut remaining = file_len as i64 - DATA_OFFSET as i64;
    let mut offset    = DATA_OFFSET;
    let mut tally     = 0u64;

    while remaining > 0 {
        if remaining < 4 {
            return Err(TractError::truncated(
                offset,
                format!("{remaining} trailing bytes cannot hold a point count"),
            ));
        }
        let n = endian.read_i32(reader).map_err(|e| TractError::from_record_io(e, offset))?;
        if n < 0 {
            return Err(TractError::bad_record(offset, format!("negative point count {n}")));
        }
        let body = layout.body_len(n as u64);
        remaining -= 4 + body as i64;
        if remaining < 0 {
            return Err(TractError::truncated(
                offset,
                format!("record of {} bytes overruns end of file", 4 + body),
            ));
        }
        reader.seek_relative(body as i64)?;
        offset += 4 + body;
        tally  += 1;
    }
    Ok(tally)
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct TrkReader {
    path:     PathBuf,
    reader:   BufReader<File>,
    header:   Header,
    endian:   Endian,
    layout:   RecordLayout,
    file_len: u64,
}

impl TrkReader {
    /// Open and validate a TRK file.
    ///
    /// Fails with `FormatMismatch` on a bad signature, `MalformedHeader` when
    /// the file is shorter than the header or the byte order cannot be
    /// resolved.  When the header declares zero fibers the records are
    /// counted before this returns, so `header()` is always trustworthy.
    pub fn open(path: &Path) -> Result<Self> {
        let file     = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut buf = Vec::with_capacity(HEADER_SIZE);
        (&mut reader).take(DATA_OFFSET).read_to_end(&mut buf)?;

        if buf.len() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
            return Err(TractError::FormatMismatch { path: path.to_path_buf(), format: Format::Trk });
        }
        if buf.len() < HEADER_SIZE {
            return Err(TractError::malformed(
                path,
                format!("file ends at byte {} inside the {HEADER_SIZE}-byte header", buf.len()),
            ));
        }

        let (mut header, endian) =
            decode_header(&buf).map_err(|reason| TractError::malformed(path, reason))?;
        let layout = RecordLayout::from_header(&header);
        debug!(path = %path.display(), endian = endian.name(), "resolved TRK byte order");

        if header.nb_fibers() == 0 {
            let n = count_records(&mut reader, endian, layout, file_len)?;
            debug!(path = %path.display(), fibers = n, "TRK header declares 0 fibers; counted records");
            header.set_nb_fibers(n);
        }

        Ok(Self { path: path.to_path_buf(), reader, header, endian, layout, file_len })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily decode records from the start of data.  Each call restarts.
    pub fn streamlines(&mut self) -> Result<TrkStreamlines<'_>> {
        self.reader.seek(SeekFrom::Start(DATA_OFFSET))?;
        Ok(TrkStreamlines {
            reader:  &mut self.reader,
            endian:  self.endian,
            layout:  self.layout,
            offset:  DATA_OFFSET,
            end:     self.file_len,
            row_buf: Vec::new(),
            done:    false,
        })
    }

    pub fn close(self) {}
}

pub struct TrkStreamlines<'a> {
    reader:  &'a mut BufReader<File>,
    endian:  Endian,
    layout:  RecordLayout,
    offset:  u64,
    end:     u64,
    row_buf: Vec<f32>,
    done:    bool,
}

impl TrkStreamlines<'_> {
    fn read_record(&mut self) -> Result<Streamline> {
        let start     = self.offset;
        let remaining = self.end - start;
        if remaining < 4 {
            return Err(TractError::truncated(
                start,
                format!("{remaining} trailing bytes cannot hold a point count"),
            ));
        }

        let n = self.endian.read_i32(&mut *self.reader)
            .map_err(|e| TractError::from_record_io(e, start))?;
        if n < 0 {
            return Err(TractError::bad_record(start, format!("negative point count {n}")));
        }
        let body = self.layout.body_len(n as u64);
        if 4 + body > remaining {
            return Err(TractError::truncated(
                start,
                format!("record needs {} bytes, {remaining} remain", 4 + body),
            ));
        }

        let width = self.layout.row_width();
        self.row_buf.resize(n as usize * width, 0.0);
        self.endian.read_f32_into(&mut *self.reader, &mut self.row_buf)
            .map_err(|e| TractError::from_record_io(e, start))?;
        let points = self.row_buf
            .chunks_exact(width)
            .map(|row| [row[0], row[1], row[2]])
            .collect();

        if self.layout.properties > 0 {
            self.reader.seek_relative(self.layout.properties as i64 * 4)?;
        }
        self.offset = start + 4 + body;
        Ok(points)
    }
}

impl Iterator for TrkStreamlines<'_> {
    type Item = Result<Streamline>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            self.done = true;
        }
        Some(record)
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct TrkWriter {
    path:   PathBuf,
    writer: BufWriter<File>,
    header: Header,
}

impl TrkWriter {
    /// Create (truncate) `path` and write the complete header.
    pub fn create(path: &Path, header: Header) -> Result<Self> {
        let file = File::create(path)?;
        let mut w = Self { path: path.to_path_buf(), writer: BufWriter::new(file), header };
        w.write_header()?;
        Ok(w)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Rewrite the header in place; the cursor returns to the end of data.
    pub fn write_header(&mut self) -> Result<()> {
        let buf = encode_header(&self.header)
            .map_err(|reason| TractError::malformed(&self.path, reason))?;
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&buf)?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append records.  Scalar and property columns declared by the header
    /// are zero-filled.
    pub fn append(&mut self, streamlines: &[Streamline]) -> Result<()> {
        let layout = RecordLayout::from_header(&self.header);
        for s in streamlines {
            let n = i32::try_from(s.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "streamline has more than i32::MAX points")
            })?;
            self.writer.write_i32::<LittleEndian>(n)?;
            for p in s {
                Endian::Little.write_point(&mut self.writer, p)?;
                for _ in 0..layout.scalars {
                    self.writer.write_f32::<LittleEndian>(0.0)?;
                }
            }
            for _ in 0..layout.properties {
                self.writer.write_f32::<LittleEndian>(0.0)?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
