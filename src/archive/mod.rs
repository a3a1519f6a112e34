//! Archive acquisition and extraction (zip, 7z, rar).

mod download;
mod extract;

pub use download::{Archive, DownloadProgress, Downloader};
pub use extract::{ExtractedTree, Extractor};

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
}

impl ArchiveFormat {
    /// Detect the format from the file's magic bytes. The extension is
    /// informational only and never consulted.
    pub fn sniff(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ArchiveNotFound(path.display().to_string()));
        }

        let mut file = std::fs::File::open(path)?;
        let mut magic = [0u8; 8];
        let read = file.read(&mut magic)?;
        let magic = &magic[..read];

        if magic.starts_with(&[0x50, 0x4B]) {
            Ok(Self::Zip)
        } else if magic.starts_with(&[0x37, 0x7A, 0xBC, 0xAF]) {
            Ok(Self::SevenZip)
        } else if magic.starts_with(&[0x52, 0x61, 0x72, 0x21]) {
            Ok(Self::Rar)
        } else {
            Err(Error::UnsupportedArchive)
        }
    }
}
