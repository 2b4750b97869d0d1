//! Format registry: a closed set of adapters behind one capability surface.
//!
//! [`Format`] names an adapter; [`TractReader`], [`TractWriter`] and
//! [`Streamlines`] are enums over the per-format handles so callers never
//! inspect adapter types at runtime.
//!
//! # Detection order
//! Formats are probed in [`Format::ALL`] order: TCK, TRK, FIB, VTK.  FIB and
//! VTK share the legacy VTK signature; FIB additionally requires the `.fib`
//! extension, so it must be probed first.

use std::fmt;
use std::path::Path;

use crate::error::{Result, TractError};
use crate::header::Header;

pub mod tck;
pub mod trk;
pub mod vtk;

pub use tck::{TckReader, TckWriter};
pub use trk::{TrkReader, TrkWriter};
pub use vtk::{VtkReader, VtkWriter};

/// One point: x, y, z.
pub type Point = [f32; 3];
/// One fiber: an ordered sequence of points.
pub type Streamline = Vec<Point>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Tck,
    Trk,
    Fib,
    Vtk,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::Tck, Format::Trk, Format::Fib, Format::Vtk];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Tck => "tck",
            Format::Trk => "trk",
            Format::Fib => "fib",
            Format::Vtk => "vtk",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "tck" => Some(Format::Tck),
            "trk" => Some(Format::Trk),
            "fib" => Some(Format::Fib),
            "vtk" => Some(Format::Vtk),
            _     => None,
        }
    }

    pub fn from_path_extension(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }

    /// Signature check.  Never fails; unreadable files are simply not a match.
    pub fn detect(self, path: &Path) -> bool {
        match self {
            Format::Tck => tck::detect(path),
            Format::Trk => trk::detect(path),
            Format::Fib => vtk::detect(path) && Self::from_path_extension(path) == Some(Format::Fib),
            Format::Vtk => vtk::detect(path),
        }
    }

    pub fn open(self, path: &Path) -> Result<TractReader> {
        Ok(match self {
            Format::Tck => TractReader::Tck(TckReader::open(path)?),
            Format::Trk => TractReader::Trk(TrkReader::open(path)?),
            Format::Fib => TractReader::Fib(VtkReader::open(path)?),
            Format::Vtk => TractReader::Vtk(VtkReader::open(path)?),
        })
    }

    pub fn create(self, path: &Path, header: Header) -> Result<TractWriter> {
        Ok(match self {
            Format::Tck => TractWriter::Tck(TckWriter::create(path, header)?),
            Format::Trk => TractWriter::Trk(TrkWriter::create(path, header)?),
            Format::Fib => TractWriter::Fib(VtkWriter::create(path, header)?),
            Format::Vtk => TractWriter::Vtk(VtkWriter::create(path, header)?),
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Tck => "TCK",
            Format::Trk => "TRK",
            Format::Fib => "FIB",
            Format::Vtk => "VTK",
        })
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// First format, in declared order, whose signature matches the file.
pub fn detect_format(path: &Path) -> Option<Format> {
    Format::ALL.into_iter().find(|f| f.detect(path))
}

/// Format for an existing file by signature, or for a not-yet-existing
/// destination by extension.
pub fn format_for_path(path: &Path) -> Result<Format> {
    let found = if path.is_file() {
        detect_format(path)
    } else {
        Format::from_path_extension(path)
    };
    found.ok_or_else(|| TractError::UnsupportedExtension(path.to_path_buf()))
}

pub fn is_supported(path: &Path) -> bool {
    format_for_path(path).is_ok()
}

/// Detect and open in one step.
pub fn open(path: &Path) -> Result<TractReader> {
    let format = detect_format(path)
        .ok_or_else(|| TractError::UnsupportedExtension(path.to_path_buf()))?;
    format.open(path)
}

// ── Handles ──────────────────────────────────────────────────────────────────

/// A file opened for reading.
pub enum TractReader {
    Tck(TckReader),
    Trk(TrkReader),
    Fib(VtkReader),
    Vtk(VtkReader),
}

impl TractReader {
    pub fn format(&self) -> Format {
        match self {
            TractReader::Tck(_) => Format::Tck,
            TractReader::Trk(_) => Format::Trk,
            TractReader::Fib(_) => Format::Fib,
            TractReader::Vtk(_) => Format::Vtk,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            TractReader::Tck(r) => r.header(),
            TractReader::Trk(r) => r.header(),
            TractReader::Fib(r) | TractReader::Vtk(r) => r.header(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TractReader::Tck(r) => r.path(),
            TractReader::Trk(r) => r.path(),
            TractReader::Fib(r) | TractReader::Vtk(r) => r.path(),
        }
    }

    /// Lazy, single-pass sequence from the start of data.  Calling again
    /// restarts from the beginning.
    pub fn streamlines(&mut self) -> Result<Streamlines<'_>> {
        Ok(match self {
            TractReader::Tck(r) => Streamlines::Tck(r.streamlines()?),
            TractReader::Trk(r) => Streamlines::Trk(r.streamlines()?),
            TractReader::Fib(r) | TractReader::Vtk(r) => Streamlines::Vtk(r.streamlines()?),
        })
    }

    pub fn close(self) {}
}

pub enum Streamlines<'a> {
    Tck(tck::TckStreamlines<'a>),
    Trk(trk::TrkStreamlines<'a>),
    Vtk(vtk::VtkStreamlines<'a>),
}

impl Iterator for Streamlines<'_> {
    type Item = Result<Streamline>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Streamlines::Tck(it) => it.next(),
            Streamlines::Trk(it) => it.next(),
            Streamlines::Vtk(it) => it.next(),
        }
    }
}

/// A file created for writing.
pub enum TractWriter {
    Tck(TckWriter),
    Trk(TrkWriter),
    Fib(VtkWriter),
    Vtk(VtkWriter),
}

impl TractWriter {
    pub fn format(&self) -> Format {
        match self {
            TractWriter::Tck(_) => Format::Tck,
            TractWriter::Trk(_) => Format::Trk,
            TractWriter::Fib(_) => Format::Fib,
            TractWriter::Vtk(_) => Format::Vtk,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            TractWriter::Tck(w) => w.header(),
            TractWriter::Trk(w) => w.header(),
            TractWriter::Fib(w) | TractWriter::Vtk(w) => w.header(),
        }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            TractWriter::Tck(w) => w.header_mut(),
            TractWriter::Trk(w) => w.header_mut(),
            TractWriter::Fib(w) | TractWriter::Vtk(w) => w.header_mut(),
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        match self {
            TractWriter::Tck(w) => w.write_header(),
            TractWriter::Trk(w) => w.write_header(),
            TractWriter::Fib(w) | TractWriter::Vtk(w) => w.write_header(),
        }
    }

    pub fn append(&mut self, streamlines: &[Streamline]) -> Result<()> {
        match self {
            TractWriter::Tck(w) => w.append(streamlines),
            TractWriter::Trk(w) => w.append(streamlines),
            TractWriter::Fib(w) | TractWriter::Vtk(w) => w.append(streamlines),
        }
    }

    pub fn close(self) -> Result<()> {
        match self {
            TractWriter::Tck(w) => w.close(),
            TractWriter::Trk(w) => w.close(),
            TractWriter::Fib(w) | TractWriter::Vtk(w) => w.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extension_fallback_only_for_missing_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("out.TCK");
        assert_eq!(format_for_path(&missing).unwrap(), Format::Tck);
        assert!(is_supported(&missing));

        let junk = dir.path().join("junk.trk");
        std::fs::write(&junk, b"not a tract file").unwrap();
        assert!(detect_format(&junk).is_none());
        assert!(!is_supported(&junk));
        assert!(matches!(format_for_path(&junk), Err(TractError::UnsupportedExtension(_))));
    }

    #[test]
    fn fib_and_vtk_share_a_signature() {
        let dir = tempdir().unwrap();
        for (name, expected) in [("a.fib", Format::Fib), ("a.vtk", Format::Vtk), ("a.dat", Format::Vtk)] {
            let path = dir.path().join(name);
            let w = Format::Vtk.create(&path, Header::new()).unwrap();
            w.close().unwrap();
            assert_eq!(detect_format(&path), Some(expected), "{name}");
        }
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        assert!(!is_supported(Path::new("/nonexistent/file.nii")));
        assert_eq!(Format::from_extension("Trk"), Some(Format::Trk));
    }
}
