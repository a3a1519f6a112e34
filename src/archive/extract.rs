//! Safe archive extraction into scratch trees.
//!
//! Every entry path is validated against the output root before anything is
//! written; hostile archives are reported, not repaired. Per-file and total
//! size caps abort the extraction and delete the partial output.

use super::ArchiveFormat;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::manifest::normalize_path;
use std::path::{Path, PathBuf};

/// An extracted subtree in scratch storage. Exists only between extraction
/// and consumption by a parser; callers release it with [`cleanup`].
///
/// [`cleanup`]: ExtractedTree::cleanup
#[derive(Debug, Clone)]
pub struct ExtractedTree {
    pub root: PathBuf,
    /// Regular files below `root`, relative, in archive order.
    pub files: Vec<PathBuf>,
    pub total_size: u64,
}

impl ExtractedTree {
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove extracted tree {}: {}", self.root.display(), e);
            }
        }
    }
}

/// Re-entrant extractor over a shared scratch root.
pub struct Extractor {
    root: PathBuf,
    max_file_bytes: u64,
    max_total_bytes: u64,
}

/// Case-insensitive prefix filter over normalized entry paths. `None`
/// matches everything.
struct PrefixFilter(Option<Vec<String>>);

impl PrefixFilter {
    fn all() -> Self {
        Self(None)
    }

    fn prefixes(prefixes: &[&str]) -> Self {
        Self(Some(
            prefixes.iter().map(|p| normalize_path(p)).collect(),
        ))
    }

    fn matches(&self, entry_name: &str) -> bool {
        let Some(prefixes) = &self.0 else {
            return true;
        };
        let normalized = normalize_path(entry_name);
        prefixes.iter().any(|p| {
            p.is_empty() || normalized == *p || normalized.starts_with(&format!("{}/", p))
        })
    }
}

/// Validate an archive entry name and return the relative path it may be
/// written to. Rejects absolute paths and any `..` that would climb out of
/// the extraction root; case is preserved for the on-disk path.
fn safe_relative_path(raw: &str) -> Result<PathBuf> {
    let unified = raw.replace('\\', "/");

    if unified.starts_with('/') {
        return Err(Error::PathTraversalRejected(raw.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::PathTraversalRejected(raw.to_string()));
                }
            }
            other => {
                // Windows drive prefixes smuggle in absolute paths.
                if other.contains(':') {
                    return Err(Error::PathTraversalRejected(raw.to_string()));
                }
                parts.push(other);
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::PathTraversalRejected(raw.to_string()));
    }

    Ok(parts.iter().collect())
}

impl Extractor {
    pub fn new(root: PathBuf, max_file_bytes: u64, max_total_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_file_bytes,
            max_total_bytes,
        })
    }

    /// Extract the full archive.
    pub fn extract(&self, archive: &Path, cancel: &CancelToken) -> Result<ExtractedTree> {
        self.extract_filtered(archive, PrefixFilter::all(), cancel)
    }

    /// Extract only entries under the given prefixes. Matching is
    /// case-insensitive and accepts both separators.
    pub fn extract_paths(
        &self,
        archive: &Path,
        prefixes: &[&str],
        cancel: &CancelToken,
    ) -> Result<ExtractedTree> {
        self.extract_filtered(archive, PrefixFilter::prefixes(prefixes), cancel)
    }

    /// Extract the FOMOD installer subtree.
    pub fn extract_fomod(&self, archive: &Path, cancel: &CancelToken) -> Result<ExtractedTree> {
        self.extract_paths(archive, &["fomod/"], cancel)
    }

    /// List the archive's file entries without extracting anything.
    pub fn list_files(&self, archive: &Path) -> Result<Vec<String>> {
        match ArchiveFormat::sniff(archive)? {
            ArchiveFormat::Zip => {
                let file = std::fs::File::open(archive)?;
                let mut zip = zip::ZipArchive::new(file)
                    .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
                let mut names = Vec::new();
                for i in 0..zip.len() {
                    let entry = zip
                        .by_index(i)
                        .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
                    if !entry.is_dir() {
                        names.push(entry.name().to_string());
                    }
                }
                Ok(names)
            }
            ArchiveFormat::SevenZip => {
                let reader =
                    sevenz_rust::SevenZReader::open(archive, sevenz_rust::Password::empty())
                        .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
                Ok(reader
                    .archive()
                    .files
                    .iter()
                    .filter(|entry| !entry.is_directory())
                    .map(|entry| entry.name().to_string())
                    .collect())
            }
            ArchiveFormat::Rar => rar_list(archive),
        }
    }

    /// Whether any file entry lies under the given prefix.
    pub fn has_subtree(&self, archive: &Path, prefix: &str) -> Result<bool> {
        let filter = PrefixFilter::prefixes(&[prefix]);
        Ok(self.list_files(archive)?.iter().any(|name| filter.matches(name)))
    }

    fn extract_filtered(
        &self,
        archive: &Path,
        filter: PrefixFilter,
        cancel: &CancelToken,
    ) -> Result<ExtractedTree> {
        let format = ArchiveFormat::sniff(archive)?;

        let out_root = self.root.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&out_root)?;

        let result = match format {
            ArchiveFormat::Zip => self.extract_zip(archive, &out_root, &filter, cancel),
            ArchiveFormat::SevenZip => self.extract_7z(archive, &out_root, &filter, cancel),
            ArchiveFormat::Rar => self.extract_rar(archive, &out_root, &filter, cancel),
        };

        match result {
            Ok((files, total_size)) => Ok(ExtractedTree {
                root: out_root,
                files,
                total_size,
            }),
            Err(e) => {
                let _ = std::fs::remove_dir_all(&out_root);
                Err(e)
            }
        }
    }

    fn check_caps(&self, entry: &str, size: u64, total: u64) -> Result<()> {
        if size > self.max_file_bytes {
            tracing::warn!(entry, size, "entry exceeds per-file extraction cap");
            return Err(Error::FileTooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }
        if total + size > self.max_total_bytes {
            return Err(Error::FileTooLarge {
                size: total + size,
                limit: self.max_total_bytes,
            });
        }
        Ok(())
    }

    fn extract_zip(
        &self,
        archive: &Path,
        out_root: &Path,
        filter: &PrefixFilter,
        cancel: &CancelToken,
    ) -> Result<(Vec<PathBuf>, u64)> {
        let file = std::fs::File::open(archive)?;
        let mut zip =
            zip::ZipArchive::new(file).map_err(|e| Error::ExtractionFailed(e.to_string()))?;

        let mut files = Vec::new();
        let mut total: u64 = 0;

        for i in 0..zip.len() {
            cancel.check()?;

            let mut entry = zip
                .by_index(i)
                .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            if !filter.matches(&name) {
                continue;
            }

            let rel = safe_relative_path(&name)?;
            self.check_caps(&name, entry.size(), total)?;

            let dest = out_root.join(&rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dest)?;
            let written = std::io::copy(&mut entry, &mut out)?;

            total += written;
            if total > self.max_total_bytes {
                return Err(Error::FileTooLarge {
                    size: total,
                    limit: self.max_total_bytes,
                });
            }
            files.push(rel);
        }

        Ok((files, total))
    }

    fn extract_7z(
        &self,
        archive: &Path,
        out_root: &Path,
        filter: &PrefixFilter,
        cancel: &CancelToken,
    ) -> Result<(Vec<PathBuf>, u64)> {
        let mut reader = sevenz_rust::SevenZReader::open(archive, sevenz_rust::Password::empty())
            .map_err(|e| Error::ExtractionFailed(e.to_string()))?;

        let mut files = Vec::new();
        let mut total: u64 = 0;
        let mut failure: Option<Error> = None;

        reader
            .for_each_entries(|entry, entry_reader| {
                if cancel.is_cancelled() {
                    failure = Some(Error::Cancelled);
                    return Ok(false);
                }
                if entry.is_directory() {
                    return Ok(true);
                }

                let name = entry.name().to_string();
                if !filter.matches(&name) {
                    return Ok(true);
                }

                let rel = match safe_relative_path(&name) {
                    Ok(rel) => rel,
                    Err(e) => {
                        failure = Some(e);
                        return Ok(false);
                    }
                };
                if let Err(e) = self.check_caps(&name, entry.size(), total) {
                    failure = Some(e);
                    return Ok(false);
                }

                let dest = out_root.join(&rel);
                if let Some(parent) = dest.parent() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        failure = Some(e.into());
                        return Ok(false);
                    }
                }

                let mut out = match std::fs::File::create(&dest) {
                    Ok(f) => f,
                    Err(e) => {
                        failure = Some(e.into());
                        return Ok(false);
                    }
                };
                match std::io::copy(entry_reader, &mut out) {
                    Ok(written) => {
                        total += written;
                        if total > self.max_total_bytes {
                            failure = Some(Error::FileTooLarge {
                                size: total,
                                limit: self.max_total_bytes,
                            });
                            return Ok(false);
                        }
                        files.push(rel);
                        Ok(true)
                    }
                    Err(e) => {
                        failure = Some(e.into());
                        Ok(false)
                    }
                }
            })
            .map_err(|e| Error::ExtractionFailed(e.to_string()))?;

        if let Some(e) = failure {
            return Err(e);
        }
        Ok((files, total))
    }

    /// Rar extraction is delegated to the system unrar binary. Entry names
    /// are screened from the listing before anything touches the disk, and
    /// the caps are enforced on the extracted tree.
    fn extract_rar(
        &self,
        archive: &Path,
        out_root: &Path,
        filter: &PrefixFilter,
        cancel: &CancelToken,
    ) -> Result<(Vec<PathBuf>, u64)> {
        cancel.check()?;

        let listed = rar_list(archive)?;
        let wanted: Vec<&String> = listed.iter().filter(|name| filter.matches(name)).collect();

        for name in &wanted {
            safe_relative_path(name)?;
        }

        if wanted.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let unrar = rar_binary()?;
        let mut command = std::process::Command::new(unrar);
        command.args(["x", "-o+", "-y"]).arg(archive);
        if wanted.len() < listed.len() {
            for name in &wanted {
                command.arg(name.as_str());
            }
        }
        // unrar requires the trailing separator to treat this as a directory.
        command.arg(format!("{}/", out_root.display()));

        let output = command
            .output()
            .map_err(|e| Error::ExtractionFailed(format!("failed to run unrar: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExtractionFailed(format!("unrar failed: {}", stderr.trim())));
        }

        cancel.check()?;

        let mut files = Vec::new();
        let mut total: u64 = 0;
        for entry in walkdir::WalkDir::new(out_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel = entry
                .path()
                .strip_prefix(out_root)
                .unwrap_or(entry.path())
                .to_path_buf();

            self.check_caps(&rel.to_string_lossy(), size, total)?;
            total += size;
            files.push(rel);
        }

        Ok((files, total))
    }
}

fn rar_binary() -> Result<PathBuf> {
    which::which("unrar").map_err(|_| {
        Error::ExtractionFailed(
            "RAR extraction requires 'unrar' to be installed.\n\
             Install it with: sudo apt install unrar (Debian/Ubuntu)\n\
                              sudo pacman -S unrar (Arch)"
                .to_string(),
        )
    })
}

fn rar_list(archive: &Path) -> Result<Vec<String>> {
    let unrar = rar_binary()?;
    let output = std::process::Command::new(unrar)
        .arg("lb")
        .arg(archive)
        .output()
        .map_err(|e| Error::ExtractionFailed(format!("failed to run unrar: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ExtractionFailed(format!("unrar failed: {}", stderr.trim())));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}
