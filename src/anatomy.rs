//! Anatomy reference volumes (NIfTI-1, optionally gzip-compressed).
//!
//! Only the header is read: image dimensions and voxel size feed the TRK
//! volume metadata.  Streamline coordinates are never transformed.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::endian::Endian;
use crate::error::{Result, TractError};
use crate::header::VolumeGeometry;

pub const NIFTI1_HEADER_SIZE: usize = 348;
/// Accepted anatomy file suffixes.
pub const EXTENSIONS: [&str; 2] = [".nii", ".nii.gz"];

mod offsets {
    pub const SIZEOF_HDR: usize = 0;
    pub const DIM:        usize = 40;
    pub const PIXDIM:     usize = 76;
    pub const MAGIC:      usize = 344;
}

pub fn has_anatomy_extension(path: &Path) -> bool {
    let name = path.to_string_lossy().to_ascii_lowercase();
    EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Read dimensions and voxel size from a NIfTI-1 header.
pub fn read_geometry(path: &Path) -> Result<VolumeGeometry> {
    let file = File::open(path)?;
    let mut reader: Box<dyn Read> = if path.to_string_lossy().to_ascii_lowercase().ends_with(".gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut buf = [0u8; NIFTI1_HEADER_SIZE];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TractError::malformed(path, "shorter than a NIfTI-1 header"),
        _ => TractError::Io(e),
    })?;
    decode_geometry(&buf).map_err(|reason| TractError::malformed(path, reason))
}

fn decode_geometry(buf: &[u8; NIFTI1_HEADER_SIZE]) -> std::result::Result<VolumeGeometry, String> {
    use offsets::*;

    let endian = Endian::resolve_i32(&buf[SIZEOF_HDR..], NIFTI1_HEADER_SIZE as i32)
        .ok_or_else(|| "sizeof_hdr is not 348 under either byte order".to_string())?;
    let magic = &buf[MAGIC..MAGIC + 4];
    if magic != b"n+1\0" && magic != b"ni1\0" {
        return Err(format!("bad NIfTI-1 magic {magic:?}"));
    }

    let dim        = [1, 2, 3].map(|i| endian.decode_i16(&buf[DIM + 2 * i..]));
    let voxel_size = [1, 2, 3].map(|i| endian.decode_f32(&buf[PIXDIM + 4 * i..]));
    if dim.iter().any(|&d| d < 0) {
        return Err(format!("negative dimension in {dim:?}"));
    }
    Ok(VolumeGeometry { dim, voxel_size })
}
