pub mod error;
pub mod endian;
pub mod header;
pub mod anatomy;
pub mod formats;
pub mod engine;
pub mod walk;

pub use error::{Result, TractError};
pub use header::{Header, HeaderKey, VolumeGeometry};
pub use formats::{detect_format, format_for_path, is_supported, Format, Streamline, TractReader, TractWriter};
pub use engine::{convert, convert_file, merge, merge_files, ConvertOptions, StreamlineSink};
