//! MRtrix `.tck` adapter.
//!
//! A text header (`key: value` lines between `mrtrix tracks` and `END`)
//! followed, at the offset named by the `file` key, by a flat stream of f32
//! triplets.  A NaN triplet closes a streamline; an Inf triplet closes the
//! file.  Byte order is declared by `datatype` (`Float32LE` / `Float32BE`).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Format, Streamline};
use crate::endian::Endian;
use crate::error::{Result, TractError};
use crate::header::{Header, HeaderKey};

pub const MAGIC:      &[u8] = b"mrtrix tracks";
const MAX_HEADER_LEN: u64   = 64 * 1024;
const TRIPLET_LEN:    u64   = 12;
/// Width of the zero-padded `count` field; keeps the header length fixed so
/// it can be rewritten in place.
const COUNT_WIDTH:    usize = 10;
const MAX_COUNT:      u64   = 9_999_999_999;

const DELIMITER:  [f32; 3] = [f32::NAN; 3];
const TERMINATOR: [f32; 3] = [f32::INFINITY; 3];

pub fn detect(path: &Path) -> bool {
    let mut sig = [0u8; MAGIC.len()];
    match File::open(path) {
        Ok(mut f) => f.read_exact(&mut sig).is_ok() && &sig[..] == MAGIC,
        Err(_)    => false,
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

fn parse_header<R: BufRead>(reader: &mut R, path: &Path) -> Result<(Header, Endian)> {
    let mut line     = Vec::new();
    let mut consumed = 0u64;
    let mut count    = None;
    let mut endian   = None;
    let mut offset   = None;

    loop {
        line.clear();
        // One byte past the limit is enough to tell an overlong header.
        let n = (&mut *reader).take(MAX_HEADER_LEN - consumed + 1).read_until(b'\n', &mut line)?;
        if n == 0 {
            if consumed == 0 {
                return Err(TractError::FormatMismatch { path: path.to_path_buf(), format: Format::Tck });
            }
            return Err(TractError::malformed(path, "end of file before END line"));
        }
        consumed += n as u64;
        if consumed > MAX_HEADER_LEN {
            return Err(TractError::malformed(path, format!("no END line in the first {MAX_HEADER_LEN} bytes")));
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if consumed == n as u64 {
            if text.as_bytes() != MAGIC {
                return Err(TractError::FormatMismatch { path: path.to_path_buf(), format: Format::Tck });
            }
            continue;
        }
        if text == "END" {
            break;
        }
        let Some((key, value)) = text.split_once(':') else { continue };
        let value = value.trim();
        match key.trim() {
            "count" => {
                count = Some(value.parse::<u64>()
                    .map_err(|_| TractError::malformed(path, format!("bad count {value:?}")))?);
            }
            "datatype" => {
                endian = Some(match value {
                    "Float32LE" => Endian::Little,
                    "Float32BE" => Endian::Big,
                    other => {
                        return Err(TractError::malformed(path, format!("unsupported datatype {other:?}")));
                    }
                });
            }
            "file" => {
                let at = value
                    .strip_prefix('.')
                    .map(str::trim)
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| TractError::malformed(path, format!("bad file entry {value:?}")))?;
                offset = Some(at);
            }
            _ => {}
        }
    }

    let endian = endian.ok_or_else(|| TractError::malformed(path, "missing datatype"))?;
    let offset = offset.ok_or_else(|| TractError::malformed(path, "missing file entry"))?;
    if offset < consumed {
        return Err(TractError::malformed(path, format!("data offset {offset} lies inside the header")));
    }

    let count = i64::try_from(count.unwrap_or(0))
        .map_err(|_| TractError::malformed(path, "count does not fit in a signed 64-bit value"))?;

    let mut header = Header::new();
    header.set(HeaderKey::NbFibers,   count);
    header.set(HeaderKey::DataOffset, offset as i64);
    Ok((header, endian))
}

fn render_header(count: u64) -> Vec<u8> {
    const TAIL: &str = "\nEND\n";
    let head = format!(
        "mrtrix tracks\ncount: {count:0width$}\ndatatype: Float32LE\nfile: . ",
        width = COUNT_WIDTH,
    );
    // The offset names the header length, which includes its own digits.
    let mut offset = head.len() + TAIL.len();
    loop {
        let total = head.len() + offset.to_string().len() + TAIL.len();
        if total == offset {
            break;
        }
        offset = total;
    }
    format!("{head}{offset}{TAIL}").into_bytes()
}

// ── Triplet cursor ───────────────────────────────────────────────────────────

struct TckCursor<R> {
    reader: R,
    endian: Endian,
    offset: u64,
    end:    u64,
}

impl<R: Read> TckCursor<R> {
    /// Fill `out` with the next streamline.  Returns `false` at the end
    /// marker or at a clean end-of-file.
    fn next_record(&mut self, out: &mut Streamline) -> Result<bool> {
        out.clear();
        let start = self.offset;
        loop {
            if self.offset == self.end {
                if out.is_empty() {
                    return Ok(false);
                }
                return Err(TractError::truncated(start, "streamline not delimited before end of file"));
            }
            if self.end - self.offset < TRIPLET_LEN {
                return Err(TractError::truncated(
                    self.offset,
                    format!("{} trailing bytes cannot hold a point", self.end - self.offset),
                ));
            }

            let mut t = [0f32; 3];
            self.endian.read_f32_into(&mut self.reader, &mut t)
                .map_err(|e| TractError::from_record_io(e, self.offset))?;
            self.offset += TRIPLET_LEN;

            if t.iter().all(|v| v.is_nan()) {
                return Ok(true);
            }
            if t.iter().all(|v| v.is_infinite()) {
                if !out.is_empty() {
                    return Err(TractError::bad_record(start, "streamline not delimited before end marker"));
                }
                return Ok(false);
            }
            out.push(t);
        }
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct TckReader {
    path:     PathBuf,
    reader:   BufReader<File>,
    header:   Header,
    endian:   Endian,
    offset:   u64,
    file_len: u64,
}

impl TckReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file     = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let (mut header, endian) = parse_header(&mut reader, path)?;
        let offset = header.get(HeaderKey::DataOffset) as u64;
        if offset > file_len {
            return Err(TractError::malformed(path, format!("data offset {offset} beyond end of file")));
        }
        debug!(path = %path.display(), endian = endian.name(), "TCK byte order from datatype");

        if header.nb_fibers() == 0 {
            reader.seek(SeekFrom::Start(offset))?;
            let mut cursor  = TckCursor { reader: &mut reader, endian, offset, end: file_len };
            let mut scratch = Vec::new();
            let mut tally   = 0u64;
            while cursor.next_record(&mut scratch)? {
                tally += 1;
            }
            debug!(path = %path.display(), fibers = tally, "TCK count missing or 0; counted delimiters");
            header.set_nb_fibers(tally);
        }

        Ok(Self { path: path.to_path_buf(), reader, header, endian, offset, file_len })
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

    pub fn streamlines(&mut self) -> Result<TckStreamlines<'_>> {
        self.reader.seek(SeekFrom::Start(self.offset))?;
        Ok(TckStreamlines {
            cursor: TckCursor {
                reader: &mut self.reader,
                endian: self.endian,
                offset: self.offset,
                end:    self.file_len,
            },
            done: false,
        })
    }

    pub fn close(self) {}
}

pub struct TckStreamlines<'a> {
    cursor: TckCursor<&'a mut BufReader<File>>,
    done:   bool,
}

impl Iterator for TckStreamlines<'_> {
    type Item = Result<Streamline>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut points = Vec::new();
        match self.cursor.next_record(&mut points) {
            Ok(true)  => Some(Ok(points)),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct TckWriter {
    path:     PathBuf,
    writer:   BufWriter<File>,
    header:   Header,
    /// Position of the end marker; the next append overwrites it.
    data_end: u64,
}

impl TckWriter {
    pub fn create(path: &Path, mut header: Header) -> Result<Self> {
        let file = File::create(path)?;
        let offset = render_header(header.nb_fibers()).len() as u64;
        header.set(HeaderKey::DataOffset, offset as i64);

        let mut w = Self { path: path.to_path_buf(), writer: BufWriter::new(file), header, data_end: offset };
        w.write_header()?;
        w.writer.seek(SeekFrom::Start(offset))?;
        Endian::Little.write_point(&mut w.writer, &TERMINATOR)?;
        w.writer.flush()?;
        Ok(w)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn write_header(&mut self) -> Result<()> {
        let count = self.header.nb_fibers();
        if count > MAX_COUNT {
            return Err(TractError::malformed(&self.path, format!("fiber count {count} exceeds {COUNT_WIDTH} digits")));
        }
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&render_header(count))?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append streamlines in place of the current end marker, then restore it.
    pub fn append(&mut self, streamlines: &[Streamline]) -> Result<()> {
        self.writer.seek(SeekFrom::Start(self.data_end))?;
        for s in streamlines {
            for p in s {
                Endian::Little.write_point(&mut self.writer, p)?;
            }
            Endian::Little.write_point(&mut self.writer, &DELIMITER)?;
            self.data_end += (s.len() as u64 + 1) * TRIPLET_LEN;
        }
        Endian::Little.write_point(&mut self.writer, &TERMINATOR)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::trk::tests::temp_with;
    use tempfile::NamedTempFile;

    fn sample() -> Vec<Streamline> {
        vec![
            vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            vec![],
            vec![[-1.5, 0.25, 8.0]],
        ]
    }

    fn raw_tck(endian: Endian, count: Option<u64>, records: &[Streamline], terminate: bool) -> Vec<u8> {
        let datatype = match endian { Endian::Little => "Float32LE", Endian::Big => "Float32BE" };
        let mut text = String::from("mrtrix tracks\n");
        if let Some(c) = count {
            text += &format!("count: {c}\n");
        }
        text += &format!("datatype: {datatype}\nfile: . 200\nEND\n");
        let mut out = text.into_bytes();
        out.resize(200, 0);
        for r in records {
            for p in r {
                endian.write_point(&mut out, p).unwrap();
            }
            endian.write_point(&mut out, &DELIMITER).unwrap();
        }
        if terminate {
            endian.write_point(&mut out, &TERMINATOR).unwrap();
        }
        out
    }

    fn read_all(r: &mut TckReader) -> Vec<Streamline> {
        r.streamlines().unwrap().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn header_offset_is_self_consistent() {
        let h = render_header(42);
        let text = String::from_utf8(h.clone()).unwrap();
        assert!(text.contains("count: 0000000042\n"));
        assert!(text.contains(&format!("file: . {}\n", h.len())));
        assert_eq!(render_header(7).len(), h.len());
    }

    #[test]
    fn writer_roundtrip_and_rewrite() {
        let f = NamedTempFile::new().unwrap();
        let mut w = TckWriter::create(f.path(), Header::new()).unwrap();
        w.append(&sample()[..2]).unwrap();
        w.append(&sample()[2..]).unwrap();
        w.header_mut().set_nb_fibers(3);
        w.write_header().unwrap();
        w.close().unwrap();

        assert!(detect(f.path()));
        let mut r = TckReader::open(f.path()).unwrap();
        assert_eq!(r.header().nb_fibers(), 3);
        assert_eq!(read_all(&mut r), sample());
        assert_eq!(read_all(&mut r), sample());
    }

    #[test]
    fn big_endian_datatype() {
        let f = temp_with(&raw_tck(Endian::Big, Some(3), &sample(), true));
        let mut r = TckReader::open(f.path()).unwrap();
        assert_eq!(r.endian(), Endian::Big);
        assert_eq!(read_all(&mut r), sample());
    }

    #[test]
    fn missing_count_is_recounted() {
        let f = temp_with(&raw_tck(Endian::Little, None, &sample(), true));
        let r = TckReader::open(f.path()).unwrap();
        assert_eq!(r.header().nb_fibers(), 3);
    }

    #[test]
    fn unterminated_file_ends_cleanly_after_delimiter() {
        let f = temp_with(&raw_tck(Endian::Little, Some(3), &sample(), false));
        let mut r = TckReader::open(f.path()).unwrap();
        assert_eq!(read_all(&mut r), sample());
    }

    #[test]
    fn partial_point_is_truncated() {
        let mut bytes = raw_tck(Endian::Little, Some(3), &sample(), false);
        bytes.truncate(bytes.len() - 14);
        let f = temp_with(&bytes);
        let mut r = TckReader::open(f.path()).unwrap();
        let last = r.streamlines().unwrap().last().unwrap();
        assert!(matches!(last, Err(TractError::TruncatedStream { .. })));
    }

    #[test]
    fn unsupported_datatype_is_malformed() {
        let mut bytes = raw_tck(Endian::Little, Some(0), &[], true);
        let pos = bytes.windows(9).position(|w| w == b"Float32LE").unwrap();
        bytes[pos..pos + 9].copy_from_slice(b"Float64LE");
        let f = temp_with(&bytes);
        assert!(matches!(TckReader::open(f.path()), Err(TractError::MalformedHeader { .. })));
    }

    #[test]
    fn endless_header_line_stops_at_limit() {
        let endless = std::io::Cursor::new(&b"mrtrix tracks\n"[..]).chain(std::io::repeat(b'a'));
        let mut reader = BufReader::new(endless);
        assert!(matches!(
            parse_header(&mut reader, Path::new("endless.tck")),
            Err(TractError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn count_beyond_i64_is_malformed() {
        let bytes = raw_tck(Endian::Little, Some(i64::MAX as u64 + 1), &sample(), true);
        let f = temp_with(&bytes);
        assert!(matches!(TckReader::open(f.path()), Err(TractError::MalformedHeader { .. })));
    }

    #[test]
    fn other_signature_is_mismatch() {
        let f = temp_with(b"TRACK\0 definitely not mrtrix");
        assert!(!detect(f.path()));
        assert!(matches!(TckReader::open(f.path()), Err(TractError::FormatMismatch { .. })));
    }
}
