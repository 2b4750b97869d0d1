//! Conversion and merge engines.
//!
//! # Conversion
//! [`convert`] streams streamlines from a reader into a sink in fixed-size
//! batches, so memory use is bounded by one batch regardless of file size.
//! The destination header is written by the caller before conversion and is
//! not corrected afterwards.
//!
//! # Merge
//! [`merge`] is eager: every source is materialized, the destination fiber
//! count is set to the total, the header is rewritten, and the whole
//! sequence is appended in one call.
//!
//! Neither engine catches adapter failures.  A failure aborts the operation
//! and a partially written destination stays on disk.

use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::anatomy;
use crate::error::{Result, TractError};
use crate::formats::{self, format_for_path, Streamline, TractReader, TractWriter};
use crate::header::Header;

/// Streamlines per `append` call.
pub const DEFAULT_BATCH_SIZE:        usize = 100;
/// Streamlines between progress observations.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub batch_size:        usize,
    pub progress_interval: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            batch_size:        DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed:      u64,
    pub total_declared: u64,
}

// ── Sink ─────────────────────────────────────────────────────────────────────

/// Destination side of a conversion or merge.
pub trait StreamlineSink {
    fn header(&self) -> &Header;
    fn header_mut(&mut self) -> &mut Header;
    fn write_header(&mut self) -> Result<()>;
    fn append(&mut self, streamlines: &[Streamline]) -> Result<()>;
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

impl StreamlineSink for TractWriter {
    fn header(&self) -> &Header {
        TractWriter::header(self)
    }

    fn header_mut(&mut self) -> &mut Header {
        TractWriter::header_mut(self)
    }

    fn write_header(&mut self) -> Result<()> {
        TractWriter::write_header(self)
    }

    fn append(&mut self, streamlines: &[Streamline]) -> Result<()> {
        TractWriter::append(self, streamlines)
    }

    fn close(self) -> Result<()> {
        TractWriter::close(self)
    }
}

// ── Engines ──────────────────────────────────────────────────────────────────

/// Convert with default batching; progress is logged.
pub fn convert<S: StreamlineSink>(source: &mut TractReader, dest: S) -> Result<u64> {
    convert_with(source, dest, &ConvertOptions::default(), |p| {
        info!("({}/{} fibers)", p.processed, p.total_declared);
    })
}

pub fn convert_with<S, F>(
    source:          &mut TractReader,
    mut dest:        S,
    options:         &ConvertOptions,
    mut on_progress: F,
) -> Result<u64>
where
    S: StreamlineSink,
    F: FnMut(Progress),
{
    let batch_size     = options.batch_size.max(1);
    let interval       = options.progress_interval.max(1) as u64;
    let total_declared = source.header().nb_fibers();

    let mut batch: Vec<Streamline> = Vec::with_capacity(batch_size);
    let mut processed = 0u64;

    for streamline in source.streamlines()? {
        batch.push(streamline?);
        processed += 1;

        if batch.len() == batch_size {
            dest.append(&batch)?;
            batch.clear();
        }
        if processed % interval == 0 {
            on_progress(Progress { processed, total_declared });
        }
    }

    if !batch.is_empty() {
        dest.append(&batch)?;
    }
    dest.close()?;

    info!("Done! ({processed}/{total_declared} fibers)");
    Ok(processed)
}

/// Concatenate `sources` (input order, then file order) into `dest`.
pub fn merge<S: StreamlineSink>(sources: &mut [TractReader], mut dest: S) -> Result<u64> {
    let mut all: Vec<Streamline> = Vec::new();
    for source in sources.iter_mut() {
        debug!(path = %source.path().display(), "reading merge source");
        for streamline in source.streamlines()? {
            all.push(streamline?);
        }
    }

    let total = all.len() as u64;
    dest.header_mut().set_nb_fibers(total);
    dest.write_header()?;
    dest.append(&all)?;
    dest.close()?;

    info!("Done! ({total} streamlines merged.)");
    Ok(total)
}

// ── File-level entry points ──────────────────────────────────────────────────

/// Header for a destination built from a source: fiber count and volume
/// geometry carry over; an anatomy file, when given, supplies the geometry.
fn destination_header(source: &TractReader, anatomy: Option<&Path>) -> Result<Header> {
    let mut header = Header::with_fibers(source.header().nb_fibers());
    header.geometry = match anatomy {
        Some(path) => Some(anatomy::read_geometry(path)?),
        None       => source.header().geometry,
    };
    Ok(header)
}

/// Detect `input`, create `output` in the format named by its extension, and
/// convert.  Returns the number of streamlines written.
pub fn convert_file(input: &Path, output: &Path, anatomy: Option<&Path>) -> Result<u64> {
    let mut source = formats::open(input)?;
    let dest_format = format_for_path(output)?;
    let header = destination_header(&source, anatomy)?;
    debug!(
        input = %input.display(),
        output = %output.display(),
        "{} -> {}", source.format(), dest_format
    );
    let dest = dest_format.create(output, header)?;
    convert(&mut source, dest)
}

pub fn merge_files(inputs: &[&Path], output: &Path, anatomy: Option<&Path>) -> Result<u64> {
    let mut sources = inputs
        .iter()
        .map(|p| formats::open(p))
        .collect::<Result<Vec<_>>>()?;
    let first = sources.first().ok_or_else(|| {
        TractError::Io(io::Error::new(io::ErrorKind::InvalidInput, "merge needs at least one input"))
    })?;
    let header = destination_header(first, anatomy)?;
    let dest = format_for_path(output)?.create(output, header)?;
    merge(&mut sources, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Format;
    use tempfile::tempdir;

    /// Records every append call instead of writing.
    #[derive(Default)]
    struct RecordingSink {
        header:  Header,
        batches: Vec<usize>,
        rows:    Vec<Streamline>,
        headers_written: usize,
    }

    impl StreamlineSink for &mut RecordingSink {
        fn header(&self) -> &Header { &self.header }
        fn header_mut(&mut self) -> &mut Header { &mut self.header }
        fn write_header(&mut self) -> Result<()> {
            self.headers_written += 1;
            Ok(())
        }
        fn append(&mut self, streamlines: &[Streamline]) -> Result<()> {
            self.batches.push(streamlines.len());
            self.rows.extend_from_slice(streamlines);
            Ok(())
        }
        fn close(self) -> Result<()> { Ok(()) }
    }

    fn trk_with(dir: &Path, name: &str, n: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut w = Format::Trk.create(&path, Header::with_fibers(n as u64)).unwrap();
        let lines: Vec<Streamline> = (0..n).map(|i| vec![[i as f32, 0.0, 0.0]; i % 3 + 1]).collect();
        w.append(&lines).unwrap();
        w.close().unwrap();
        path
    }

    #[test]
    fn convert_appends_in_batches_of_100() {
        let dir = tempdir().unwrap();
        let path = trk_with(dir.path(), "in.trk", 250);
        let mut source = formats::open(&path).unwrap();
        let mut sink = RecordingSink::default();

        let n = convert(&mut source, &mut sink).unwrap();
        assert_eq!(n, 250);
        assert_eq!(sink.batches, vec![100, 100, 50]);
        assert_eq!(sink.headers_written, 0);
    }

    #[test]
    fn progress_every_interval() {
        let dir = tempdir().unwrap();
        let path = trk_with(dir.path(), "in.trk", 25);
        let mut source = formats::open(&path).unwrap();
        let mut sink = RecordingSink::default();
        let opts = ConvertOptions { batch_size: 7, progress_interval: 10 };

        let mut seen = Vec::new();
        convert_with(&mut source, &mut sink, &opts, |p| seen.push(p)).unwrap();
        assert_eq!(sink.batches, vec![7, 7, 7, 4]);
        assert_eq!(seen, vec![
            Progress { processed: 10, total_declared: 25 },
            Progress { processed: 20, total_declared: 25 },
        ]);
    }

    #[test]
    fn merge_concatenates_and_sets_total() {
        let dir = tempdir().unwrap();
        let a = trk_with(dir.path(), "a.trk", 3);
        let b = trk_with(dir.path(), "b.trk", 5);
        let mut sources = vec![formats::open(&a).unwrap(), formats::open(&b).unwrap()];
        let mut sink = RecordingSink::default();

        assert_eq!(merge(&mut sources, &mut sink).unwrap(), 8);
        assert_eq!(sink.header.nb_fibers(), 8);
        assert_eq!(sink.headers_written, 1);
        assert_eq!(sink.batches, vec![8]);
        assert_eq!(sink.rows[3], vec![[0.0, 0.0, 0.0]]);
    }

    #[test]
    fn source_failure_aborts_conversion() {
        let dir = tempdir().unwrap();
        let path = trk_with(dir.path(), "in.trk", 4);
        let len = std::fs::metadata(&path).unwrap().len();
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 4).unwrap();

        let mut source = formats::open(&path).unwrap();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            convert(&mut source, &mut sink),
            Err(TractError::TruncatedStream { .. })
        ));
    }
}
