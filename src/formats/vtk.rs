//! Legacy VTK polydata adapter, used for both `.vtk` and FiberNavigator
//! `.fib` files.
//!
//! Only the `BINARY` flavour is handled.  Binary legacy VTK is big-endian by
//! definition, so there is nothing to probe:
//!
//! ```text
//! # vtk DataFile Version 3.0
//! <title>
//! BINARY
//! DATASET POLYDATA
//! POINTS <n> float
//! <n × 3 f32>
//! LINES <n_lines> <size>
//! <size i32: per line, count followed by point indices>
//! ```
//!
//! The writer streams points as they arrive and keeps only per-line point
//! counts in memory.  The `LINES` section is written by [`VtkWriter::close`],
//! which must be called for the file to be complete.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Format, Streamline};
use crate::endian::Endian;
use crate::error::{Result, TractError};
use crate::header::{Header, HeaderKey};

pub const MAGIC: &[u8] = b"# vtk DataFile";
const ORDER:       Endian = Endian::Big;
const POINT_LEN:   u64    = 12;
const COUNT_WIDTH: usize  = 10;
const TITLE:       &str   = "tractconv streamlines";

pub fn detect(path: &Path) -> bool {
    let mut sig = [0u8; MAGIC.len()];
    match File::open(path) {
        Ok(mut f) => f.read_exact(&mut sig).is_ok() && &sig[..] == MAGIC,
        Err(_)    => false,
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Section offsets of an opened polydata file.
#[derive(Debug, Clone, Copy, Default)]
struct Layout {
    points_offset: u64,
    n_points:      u64,
    lines_offset:  u64,
    n_lines:       u64,
    conn_size:     u64,
}

/// Next line with content, trimmed.  `None` at end of file.
fn next_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&buf).trim().to_string();
        if !text.is_empty() {
            return Ok(Some(text));
        }
    }
}

fn parse_count(token: Option<&str>, what: &str, path: &Path) -> Result<u64> {
    token
        .and_then(|t| t.parse::<u64>().ok())
        .ok_or_else(|| TractError::malformed(path, format!("bad {what} in section header")))
}

/// `start + count × width`, or `MalformedHeader` when a declared count is
/// too large to address.
fn section_end(start: u64, count: u64, width: u64, section: &str, path: &Path) -> Result<u64> {
    count
        .checked_mul(width)
        .and_then(|len| len.checked_add(start))
        .ok_or_else(|| TractError::malformed(path, format!("{section} section size overflows")))
}

fn parse_layout(reader: &mut BufReader<File>, file_len: u64, path: &Path) -> Result<Layout> {
    let mismatch = || TractError::FormatMismatch { path: path.to_path_buf(), format: Format::Vtk };
    let eof      = || TractError::malformed(path, "end of file inside the header");

    let version = next_line(reader)?.ok_or_else(mismatch)?;
    if !version.as_bytes().starts_with(MAGIC) {
        return Err(mismatch());
    }
    let _title   = next_line(reader)?.ok_or_else(eof)?;
    let encoding = next_line(reader)?.ok_or_else(eof)?;
    if !encoding.eq_ignore_ascii_case("BINARY") {
        return Err(TractError::malformed(path, format!("unsupported encoding {encoding:?}")));
    }
    let dataset = next_line(reader)?.ok_or_else(eof)?;
    if !dataset.eq_ignore_ascii_case("DATASET POLYDATA") {
        return Err(TractError::malformed(path, format!("unsupported dataset {dataset:?}")));
    }

    let points = next_line(reader)?.ok_or_else(eof)?;
    let mut tokens = points.split_whitespace();
    if tokens.next() != Some("POINTS") {
        return Err(TractError::malformed(path, format!("expected POINTS, found {points:?}")));
    }
    let n_points = parse_count(tokens.next(), "point count", path)?;
    match tokens.next() {
        Some(t) if t.eq_ignore_ascii_case("float") => {}
        other => return Err(TractError::malformed(path, format!("unsupported point type {other:?}"))),
    }

    let mut layout = Layout { points_offset: reader.stream_position()?, n_points, ..Layout::default() };
    let mut cursor = section_end(layout.points_offset, n_points, POINT_LEN, "POINTS", path)?;
    if cursor > file_len {
        return Err(TractError::malformed(path, "POINTS section runs past end of file"));
    }

    // Cell sections that may precede LINES are skipped by their declared size.
    loop {
        reader.seek(SeekFrom::Start(cursor))?;
        let Some(section) = next_line(reader)? else { break };
        let mut tokens = section.split_whitespace();
        match tokens.next() {
            Some("LINES") => {
                layout.n_lines      = parse_count(tokens.next(), "line count", path)?;
                layout.conn_size    = parse_count(tokens.next(), "connectivity size", path)?;
                layout.lines_offset = reader.stream_position()?;
                if section_end(layout.lines_offset, layout.conn_size, 4, "LINES", path)? > file_len {
                    return Err(TractError::malformed(path, "LINES section runs past end of file"));
                }
                break;
            }
            Some("VERTICES") => {
                let _ = parse_count(tokens.next(), "vertex count", path)?;
                let size = parse_count(tokens.next(), "connectivity size", path)?;
                cursor = section_end(reader.stream_position()?, size, 4, "VERTICES", path)?;
            }
            _ => break,
        }
    }
    Ok(layout)
}

fn render_preamble(n_points: u64) -> Vec<u8> {
    format!(
        "# vtk DataFile Version 3.0\n{TITLE}\nBINARY\nDATASET POLYDATA\nPOINTS {n_points:0width$} float\n",
        width = COUNT_WIDTH,
    )
    .into_bytes()
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct VtkReader {
    path:   PathBuf,
    reader: BufReader<File>,
    header: Header,
    layout: Layout,
}

impl VtkReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file     = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let layout = parse_layout(&mut reader, file_len, path)?;
        debug!(
            path = %path.display(),
            points = layout.n_points,
            lines = layout.n_lines,
            "parsed VTK polydata layout"
        );

        let mut header = Header::new();
        header.set(HeaderKey::NbFibers,   layout.n_lines as i64);
        header.set(HeaderKey::NbPoints,   layout.n_points as i64);
        header.set(HeaderKey::DataOffset, layout.points_offset as i64);

        Ok(Self { path: path.to_path_buf(), reader, header, layout })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn streamlines(&mut self) -> Result<VtkStreamlines<'_>> {
        Ok(VtkStreamlines {
            reader:   &mut self.reader,
            layout:   self.layout,
            consumed: 0,
            emitted:  0,
            indices:  Vec::new(),
            coords:   Vec::new(),
            done:     false,
        })
    }

    pub fn close(self) {}
}

pub struct VtkStreamlines<'a> {
    reader:   &'a mut BufReader<File>,
    layout:   Layout,
    /// i32 words of connectivity already read.
    consumed: u64,
    emitted:  u64,
    indices:  Vec<i32>,
    coords:   Vec<f32>,
    done:     bool,
}

impl VtkStreamlines<'_> {
    fn read_line(&mut self) -> Result<Streamline> {
        let start = self.layout.lines_offset + self.consumed * 4;
        if self.consumed >= self.layout.conn_size {
            return Err(TractError::bad_record(start, "connectivity ends before the declared line count"));
        }
        self.reader.seek(SeekFrom::Start(start))?;
        let count = ORDER.read_i32(&mut *self.reader)
            .map_err(|e| TractError::from_record_io(e, start))?;
        if count < 0 {
            return Err(TractError::bad_record(start, format!("negative point count {count}")));
        }
        let count = count as u64;
        if self.consumed + 1 + count > self.layout.conn_size {
            return Err(TractError::bad_record(start, "line overruns the connectivity array"));
        }

        self.indices.resize(count as usize, 0);
        ORDER.read_i32_into(&mut *self.reader, &mut self.indices)
            .map_err(|e| TractError::from_record_io(e, start))?;
        self.consumed += 1 + count;

        if let Some(bad) = self.indices.iter().find(|&&i| i < 0 || i as u64 >= self.layout.n_points) {
            return Err(TractError::bad_record(
                start,
                format!("point index {bad} outside 0..{}", self.layout.n_points),
            ));
        }

        // Consecutive indices are fetched with a single read.
        let mut points = Vec::with_capacity(self.indices.len());
        let mut i = 0;
        while i < self.indices.len() {
            let mut j = i + 1;
            while j < self.indices.len() && self.indices[j] == self.indices[j - 1] + 1 {
                j += 1;
            }
            let at = self.layout.points_offset + self.indices[i] as u64 * POINT_LEN;
            self.reader.seek(SeekFrom::Start(at))?;
            self.coords.resize((j - i) * 3, 0.0);
            ORDER.read_f32_into(&mut *self.reader, &mut self.coords)
                .map_err(|e| TractError::from_record_io(e, at))?;
            points.extend(self.coords.chunks_exact(3).map(|c| [c[0], c[1], c[2]]));
            i = j;
        }
        Ok(points)
    }
}

impl Iterator for VtkStreamlines<'_> {
    type Item = Result<Streamline>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.emitted == self.layout.n_lines {
            return None;
        }
        let line = self.read_line();
        match line {
            Ok(_)  => self.emitted += 1,
            Err(_) => self.done = true,
        }
        Some(line)
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct VtkWriter {
    path:         PathBuf,
    writer:       BufWriter<File>,
    header:       Header,
    /// End of the POINTS payload; the next append starts here.
    points_end:   u64,
    n_points:     u64,
    line_lengths: Vec<u32>,
}

impl VtkWriter {
    pub fn create(path: &Path, mut header: Header) -> Result<Self> {
        let file = File::create(path)?;
        let points_offset = render_preamble(0).len() as u64;
        header.set(HeaderKey::DataOffset, points_offset as i64);
        header.set(HeaderKey::NbPoints,   0);

        let mut w = Self {
            path:         path.to_path_buf(),
            writer:       BufWriter::new(file),
            header,
            points_end:   points_offset,
            n_points:     0,
            line_lengths: Vec::new(),
        };
        w.write_header()?;
        Ok(w)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Rewrite the preamble with the number of points written so far.  The
    /// line count lives in the `LINES` section and is written on close.
    pub fn write_header(&mut self) -> Result<()> {
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&render_preamble(self.n_points))?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn append(&mut self, streamlines: &[Streamline]) -> Result<()> {
        self.writer.seek(SeekFrom::Start(self.points_end))?;
        for s in streamlines {
            let total = self.n_points + s.len() as u64;
            if total > i32::MAX as u64 {
                return Err(TractError::malformed(&self.path, "point count exceeds the i32 index range"));
            }
            for p in s {
                ORDER.write_point(&mut self.writer, p)?;
            }
            self.n_points = total;
            self.points_end += s.len() as u64 * POINT_LEN;
            self.line_lengths.push(s.len() as u32);
        }
        self.header.set(HeaderKey::NbPoints, self.n_points as i64);
        self.writer.flush()?;
        Ok(())
    }

    /// Write the `LINES` section and patch the point count.
    pub fn close(mut self) -> Result<()> {
        let n_lines   = self.line_lengths.len() as u64;
        let conn_size = n_lines + self.n_points;

        self.writer.seek(SeekFrom::Start(self.points_end))?;
        write!(self.writer, "\nLINES {n_lines} {conn_size}\n")?;
        let mut next = 0i32;
        for &len in &self.line_lengths {
            ORDER.write_i32(&mut self.writer, len as i32)?;
            for _ in 0..len {
                ORDER.write_i32(&mut self.writer, next)?;
                next += 1;
            }
        }
        self.writer.write_all(b"\n")?;
        self.header.set_nb_fibers(n_lines);
        self.write_header()
    }
}
