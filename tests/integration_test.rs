use byteorder::{BigEndian, ByteOrder, LittleEndian};
use proptest::prelude::*;
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};
use tractconv::engine::{convert_with, ConvertOptions};
use tractconv::{
    convert_file, detect_format, formats, merge_files, Format, Header, HeaderKey, Streamline,
    TractError,
};

fn sample(n: usize) -> Vec<Streamline> {
    (0..n)
        .map(|i| (0..(i % 4 + 1)).map(|j| [i as f32, j as f32, 0.5 * i as f32]).collect())
        .collect()
}

fn write_file(path: &Path, format: Format, header: Header, lines: &[Streamline]) {
    let mut w = format.create(path, header).unwrap();
    w.append(lines).unwrap();
    w.close().unwrap();
}

fn read_all(path: &Path) -> Vec<Streamline> {
    let mut r = formats::open(path).unwrap();
    r.streamlines().unwrap().collect::<Result<Vec<_>, _>>().unwrap()
}

/// One-record TRK image with `hdr_size` encoded by `B`.
fn trk_bytes<B: ByteOrder>(hdr_size: i32) -> Vec<u8> {
    let mut buf = vec![0u8; 1000];
    buf[..5].copy_from_slice(b"TRACK");
    B::write_i32(&mut buf[988..], 1);
    B::write_i32(&mut buf[992..], 2);
    B::write_i32(&mut buf[996..], hdr_size);
    let mut record = [0u8; 16];
    B::write_i32(&mut record[..4], 1);
    B::write_f32_into(&[1.0, 2.0, 3.0], &mut record[4..]);
    buf.extend_from_slice(&record);
    buf
}

fn temp_with(bytes: &[u8]) -> NamedTempFile {
    let f = NamedTempFile::new().unwrap();
    std::fs::write(f.path(), bytes).unwrap();
    f
}

// ── Detection ────────────────────────────────────────────────────────────────

#[test]
fn valid_trk_is_detected_and_opens() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.dat");
    write_file(&path, Format::Trk, Header::with_fibers(2), &sample(2));

    assert_eq!(detect_format(&path), Some(Format::Trk));
    assert!(Format::Trk.open(&path).is_ok());

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[4] = b'C';
    let bad = temp_with(&bytes);
    assert!(!Format::Trk.detect(bad.path()));
}

#[test]
fn byte_order_is_resolved_from_hdr_size() {
    let le = temp_with(&trk_bytes::<LittleEndian>(1000));
    let be = temp_with(&trk_bytes::<BigEndian>(1000));
    for f in [&le, &be] {
        let mut r = Format::Trk.open(f.path()).unwrap();
        let got: Vec<_> = r.streamlines().unwrap().map(Result::unwrap).collect();
        assert_eq!(got, vec![vec![[1.0, 2.0, 3.0]]]);
    }

    let neither = temp_with(&trk_bytes::<LittleEndian>(1234));
    assert!(matches!(
        Format::Trk.open(neither.path()),
        Err(TractError::MalformedHeader { .. })
    ));
}

#[test]
fn truncated_header_never_yields_a_handle() {
    let bytes = trk_bytes::<LittleEndian>(1000);
    let f = temp_with(&bytes[..640]);
    assert!(matches!(Format::Trk.open(f.path()), Err(TractError::MalformedHeader { .. })));
}

// ── Round trips ──────────────────────────────────────────────────────────────

#[test]
fn every_format_round_trips_and_reiterates() {
    let dir = tempdir().unwrap();
    let lines = sample(7);
    for format in Format::ALL {
        let path = dir.path().join(format!("rt.{}", format.extension()));
        write_file(&path, format, Header::with_fibers(7), &lines);

        let mut r = format.open(&path).unwrap();
        assert_eq!(r.header().nb_fibers(), 7, "{format}");
        let first: Vec<_> = r.streamlines().unwrap().map(Result::unwrap).collect();
        let second: Vec<_> = r.streamlines().unwrap().map(Result::unwrap).collect();
        assert_eq!(first, lines, "{format}");
        assert_eq!(second, first, "{format}");
    }
}

#[test]
fn zero_declared_count_is_resolved_on_open() {
    let dir = tempdir().unwrap();
    for format in [Format::Trk, Format::Tck] {
        let path = dir.path().join(format!("zero.{}", format.extension()));
        write_file(&path, format, Header::new(), &sample(6));
        let r = format.open(&path).unwrap();
        assert_eq!(r.header().get(HeaderKey::NbFibers), 6, "{format}");
    }
}

// ── Engines ──────────────────────────────────────────────────────────────────

#[test]
fn convert_file_across_formats() {
    let dir = tempdir().unwrap();
    let trk = dir.path().join("a.trk");
    let tck = dir.path().join("a.tck");
    let vtk = dir.path().join("a.vtk");
    write_file(&trk, Format::Trk, Header::with_fibers(12), &sample(12));

    assert_eq!(convert_file(&trk, &tck, None).unwrap(), 12);
    assert_eq!(convert_file(&tck, &vtk, None).unwrap(), 12);
    assert_eq!(detect_format(&vtk), Some(Format::Vtk));
    assert_eq!(read_all(&vtk), sample(12));
}

#[test]
fn convert_to_unknown_extension_fails() {
    let dir = tempdir().unwrap();
    let trk = dir.path().join("a.trk");
    write_file(&trk, Format::Trk, Header::with_fibers(1), &sample(1));
    assert!(matches!(
        convert_file(&trk, &dir.path().join("a.xyz"), None),
        Err(TractError::UnsupportedExtension(_))
    ));
}

#[test]
fn merge_three_and_five() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.trk");
    let b = dir.path().join("b.tck");
    let out = dir.path().join("out.trk");
    let (la, lb) = (sample(3), sample(5));
    write_file(&a, Format::Trk, Header::with_fibers(3), &la);
    write_file(&b, Format::Tck, Header::with_fibers(5), &lb);

    assert_eq!(merge_files(&[a.as_path(), b.as_path()], &out, None).unwrap(), 8);
    let r = formats::open(&out).unwrap();
    assert_eq!(r.header().nb_fibers(), 8);
    assert_eq!(read_all(&out), [la, lb].concat());
}

#[test]
fn convert_reports_progress_for_large_sources() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("big.trk");
    write_file(&src, Format::Trk, Header::with_fibers(2500), &sample(2500));

    let mut reader = formats::open(&src).unwrap();
    let dest = Format::Tck.create(&dir.path().join("big.tck"), Header::with_fibers(2500)).unwrap();
    let mut ticks = Vec::new();
    let n = convert_with(&mut reader, dest, &ConvertOptions::default(), |p| ticks.push(p.processed))
        .unwrap();
    assert_eq!(n, 2500);
    assert_eq!(ticks, vec![1000, 2000]);
}

// ── Properties ───────────────────────────────────────────────────────────────

fn streamline_strategy() -> impl Strategy<Value = Vec<Streamline>> {
    let point = prop::array::uniform3(-500.0f32..500.0);
    prop::collection::vec(prop::collection::vec(point, 0..12), 0..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn trk_preserves_arbitrary_streamlines(lines in streamline_strategy()) {
        let f = NamedTempFile::new().unwrap();
        write_file(f.path(), Format::Trk, Header::with_fibers(lines.len() as u64), &lines);
        let mut r = Format::Trk.open(f.path()).unwrap();
        let got: Vec<_> = r.streamlines().unwrap().map(Result::unwrap).collect();
        prop_assert_eq!(got, lines);
    }
}
