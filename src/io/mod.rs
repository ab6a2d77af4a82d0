//! Minimal native codecs.
//!
//! The engine needs to open file headers to plan chunks and needs a point
//! codec for its reader and writer stages. This module carries exactly that:
//! uncompressed las 1.0–1.4 and ascii/binary pcd. Compressed (laz) payloads
//! are delegated to an external codec; their headers still parse, so
//! planning works on compressed collections.

pub mod las;
pub mod pcd;

use crate::{Error, Header, Result};
use std::path::Path;

/// Opens a file header without reading any point, dispatching on the
/// extension.
pub fn open_header(path: &Path) -> Result<Header> {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("las") | Some("laz") => las::read_header(path),
        Some("pcd") => pcd::read_header(path),
        _ => Err(Error::UnknownFileType(path.to_path_buf())),
    }
}
