//! The three analysis pipelines.
//!
//! Each pipeline is cache-first: on a miss it resolves download links,
//! streams the archives to scratch, extracts and parses what it needs,
//! runs the analyzer, and writes the report back to the cache. Scratch
//! resources are released on every exit path, including cancellation.

use crate::analysis::{
    analyze_conflicts, analyze_load_order, ConflictReport, LoadOrderReport, PluginEntry,
};
use crate::archive::{Archive, DownloadProgress, Downloader, Extractor};
use crate::cache::Cache;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fomod::{self, FomodModel};
use crate::manifest::{normalize_path, FileEntry, ModManifest};
use crate::nexus::{Collection, DownloadLink, ModFileRef, NexusClient, Revision, RevisionDetails};
use crate::plugins::parse_plugin_file;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Collection metadata turns over much faster than analysis results.
const METADATA_TTL: Duration = Duration::from_secs(6 * 3600);

/// Upstream registry operations the pipelines depend on.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_collection(&self, slug: &str, cancel: &CancelToken) -> Result<Collection>;

    async fn get_revisions(&self, slug: &str, cancel: &CancelToken) -> Result<Vec<Revision>>;

    async fn get_revision_mods(
        &self,
        slug: &str,
        revision: u32,
        cancel: &CancelToken,
    ) -> Result<RevisionDetails>;

    async fn get_download_links(
        &self,
        game_domain: &str,
        mod_id: i64,
        file_id: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<DownloadLink>>;

    async fn validate_credential(&self, cancel: &CancelToken) -> Result<bool>;
}

#[async_trait]
impl Registry for NexusClient {
    async fn get_collection(&self, slug: &str, cancel: &CancelToken) -> Result<Collection> {
        NexusClient::get_collection(self, slug, cancel).await
    }

    async fn get_revisions(&self, slug: &str, cancel: &CancelToken) -> Result<Vec<Revision>> {
        NexusClient::get_revisions(self, slug, cancel).await
    }

    async fn get_revision_mods(
        &self,
        slug: &str,
        revision: u32,
        cancel: &CancelToken,
    ) -> Result<RevisionDetails> {
        NexusClient::get_revision_mods(self, slug, revision, cancel).await
    }

    async fn get_download_links(
        &self,
        game_domain: &str,
        mod_id: i64,
        file_id: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<DownloadLink>> {
        NexusClient::get_download_links(self, game_domain, mod_id, file_id, cancel).await
    }

    async fn validate_credential(&self, cancel: &CancelToken) -> Result<bool> {
        NexusClient::validate_credential(self, cancel).await
    }
}

/// FOMOD report for one mod file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FomodAnalysis {
    pub game_domain: String,
    pub mod_id: i64,
    pub file_id: i64,
    pub has_fomod: bool,
    pub data: Option<FomodModel>,
    #[serde(default)]
    pub cached: bool,
}

/// Load-order report for one collection revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderAnalysis {
    pub slug: String,
    pub revision: u32,
    pub report: LoadOrderReport,
    #[serde(default)]
    pub cached: bool,
}

/// Conflict report for one collection revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAnalysis {
    pub slug: String,
    pub revision: u32,
    pub include_hashes: bool,
    pub report: ConflictReport,
    #[serde(default)]
    pub cached: bool,
}

/// Owns the collaborators and scratch roots the pipelines run over.
pub struct Engine {
    registry: Arc<dyn Registry>,
    cache: Arc<Cache>,
    downloader: Downloader,
    extractor: Extractor,
    cache_ttl: Duration,
    progress: Option<DownloadProgress>,
}

impl Engine {
    pub fn new(config: &Config, registry: Arc<dyn Registry>, cache: Arc<Cache>) -> Result<Self> {
        Ok(Self {
            registry,
            cache,
            downloader: Downloader::new(config.downloads_dir(), Some(config.max_download_bytes))?,
            extractor: Extractor::new(
                config.extracted_dir(),
                config.max_extracted_file_bytes,
                config.max_extracted_total_bytes,
            )?,
            cache_ttl: config.cache_ttl(),
            progress: None,
        })
    }

    /// Attach a progress callback forwarded to every archive download.
    pub fn with_progress(mut self, progress: DownloadProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Remove any scratch directories still tracked by the downloader.
    pub fn cleanup_scratch(&self) {
        self.downloader.cleanup_all();
    }

    /// Parse the FOMOD installer of one mod file.
    pub async fn analyze_fomod(
        &self,
        cancel: &CancelToken,
        game_domain: &str,
        mod_id: i64,
        file_id: i64,
    ) -> Result<FomodAnalysis> {
        let key = format!("fomod:{}:{}:{}", game_domain, mod_id, file_id);
        if let Some(hit) = self.cache_hit::<FomodAnalysis>(&key)? {
            return Ok(hit);
        }
        cancel.check()?;

        let archive = self
            .fetch_archive(cancel, game_domain, mod_id, file_id)
            .await?;

        let outcome = self.parse_fomod_archive(cancel, &archive);
        self.downloader.cleanup_path(&archive.path);

        let (has_fomod, data) = outcome?;
        let analysis = FomodAnalysis {
            game_domain: game_domain.to_string(),
            mod_id,
            file_id,
            has_fomod,
            data,
            cached: false,
        };

        // A mod without a FOMOD is a result too; cache it all the same.
        self.store(&key, &analysis);
        Ok(analysis)
    }

    /// Validate the plugin load order of one collection revision.
    pub async fn analyze_load_order(
        &self,
        cancel: &CancelToken,
        slug: &str,
        revision: u32,
    ) -> Result<LoadOrderAnalysis> {
        let key = format!("loadorder:{}:{}", slug, revision);
        if let Some(hit) = self.cache_hit::<LoadOrderAnalysis>(&key)? {
            return Ok(hit);
        }
        cancel.check()?;

        let details = self.revision_mods(cancel, slug, revision).await?;

        let mut entries: Vec<PluginEntry> = Vec::new();
        for file_ref in details.mod_files.iter().filter(|f| !f.optional) {
            cancel.check()?;
            let plugins = self
                .collect_plugins(cancel, file_ref)
                .await
                .map_err(|e| name_failed_mod(file_ref, e))?;
            entries.extend(plugins);
        }

        cancel.check()?;
        let analysis = LoadOrderAnalysis {
            slug: slug.to_string(),
            revision,
            report: analyze_load_order(&entries),
            cached: false,
        };

        self.store(&key, &analysis);
        Ok(analysis)
    }

    /// Detect file conflicts across one collection revision.
    pub async fn analyze_conflicts(
        &self,
        cancel: &CancelToken,
        slug: &str,
        revision: u32,
        include_hashes: bool,
    ) -> Result<ConflictAnalysis> {
        let key = format!("conflicts:{}:{}:{}", slug, revision, include_hashes);
        if let Some(hit) = self.cache_hit::<ConflictAnalysis>(&key)? {
            return Ok(hit);
        }
        cancel.check()?;

        let details = self.revision_mods(cancel, slug, revision).await?;

        let mut manifests: Vec<ModManifest> = Vec::new();
        for (index, file_ref) in details.mod_files.iter().enumerate() {
            cancel.check()?;
            let files = self
                .collect_manifest(cancel, file_ref, include_hashes)
                .await
                .map_err(|e| name_failed_mod(file_ref, e))?;

            manifests.push(ModManifest {
                mod_id: file_ref.mod_id.to_string(),
                mod_name: file_ref.name.clone(),
                load_order: index as i32,
                files,
            });
        }

        cancel.check()?;
        let analysis = ConflictAnalysis {
            slug: slug.to_string(),
            revision,
            include_hashes,
            report: analyze_conflicts(&manifests),
            cached: false,
        };

        self.store(&key, &analysis);
        Ok(analysis)
    }

    fn cache_hit<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned + Cached,
    {
        match self.cache.get::<T>(key) {
            Ok(mut hit) => {
                tracing::debug!(key, "cache hit");
                hit.mark_cached();
                Ok(Some(hit))
            }
            Err(e) if e.is_cache_miss() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value, self.cache_ttl) {
            tracing::warn!(key, "failed to cache analysis: {}", e);
        }
    }

    /// Revision metadata, cached under its own short-lived key.
    async fn revision_mods(
        &self,
        cancel: &CancelToken,
        slug: &str,
        revision: u32,
    ) -> Result<RevisionDetails> {
        let key = format!("revision:{}:{}", slug, revision);
        match self.cache.get::<RevisionDetails>(&key) {
            Ok(details) => return Ok(details),
            Err(e) if e.is_cache_miss() => {}
            Err(e) => return Err(e),
        }

        let details = self.registry.get_revision_mods(slug, revision, cancel).await?;
        if let Err(e) = self.cache.set(&key, &details, METADATA_TTL) {
            tracing::warn!(key, "failed to cache revision metadata: {}", e);
        }
        Ok(details)
    }

    async fn fetch_archive(
        &self,
        cancel: &CancelToken,
        game_domain: &str,
        mod_id: i64,
        file_id: i64,
    ) -> Result<Archive> {
        let links = self
            .registry
            .get_download_links(game_domain, mod_id, file_id, cancel)
            .await?;

        let url = links
            .iter()
            .map(|l| l.uri.trim())
            .find(|u| !u.is_empty())
            .ok_or(Error::NoUrl)?
            .to_string();

        self.downloader
            .download(&url, self.progress.clone(), cancel)
            .await
    }

    fn parse_fomod_archive(
        &self,
        cancel: &CancelToken,
        archive: &Archive,
    ) -> Result<(bool, Option<FomodModel>)> {
        cancel.check()?;

        if !self.extractor.has_subtree(&archive.path, "fomod/")? {
            return Ok((false, None));
        }

        let tree = self.extractor.extract_fomod(&archive.path, cancel)?;
        let model = (|| {
            cancel.check()?;
            fomod::parse_fomod_dir(&tree.root)
        })();
        tree.cleanup();

        Ok((true, Some(model?)))
    }

    /// Download one mod archive and parse the plugin files it ships.
    /// Unparseable plugins degrade to filename-only entries.
    async fn collect_plugins(
        &self,
        cancel: &CancelToken,
        file_ref: &ModFileRef,
    ) -> Result<Vec<PluginEntry>> {
        let archive = self
            .fetch_archive(cancel, &file_ref.game_domain, file_ref.mod_id, file_ref.file_id)
            .await?;

        let outcome = self.plugins_from_archive(cancel, &archive);
        self.downloader.cleanup_path(&archive.path);
        outcome
    }

    fn plugins_from_archive(
        &self,
        cancel: &CancelToken,
        archive: &Archive,
    ) -> Result<Vec<PluginEntry>> {
        let names = self.extractor.list_files(&archive.path)?;
        let plugin_paths: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| is_plugin_path(name))
            .collect();
        if plugin_paths.is_empty() {
            return Ok(Vec::new());
        }

        let tree = self.extractor.extract_paths(&archive.path, &plugin_paths, cancel)?;

        let outcome = (|| {
            let mut entries = Vec::new();
            for rel in &tree.files {
                cancel.check()?;
                let filename = rel
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match parse_plugin_file(&tree.root.join(rel)) {
                    Ok(header) => entries.push(PluginEntry::parsed(header)),
                    Err(e) => {
                        tracing::warn!(plugin = %filename, "plugin header unparseable, keeping filename only: {}", e);
                        entries.push(PluginEntry::named(filename));
                    }
                }
            }
            Ok(entries)
        })();

        tree.cleanup();
        outcome
    }

    /// Download one mod archive and build its full file manifest.
    async fn collect_manifest(
        &self,
        cancel: &CancelToken,
        file_ref: &ModFileRef,
        include_hashes: bool,
    ) -> Result<Vec<FileEntry>> {
        let archive = self
            .fetch_archive(cancel, &file_ref.game_domain, file_ref.mod_id, file_ref.file_id)
            .await?;

        let outcome = self.manifest_from_archive(cancel, &archive, include_hashes);
        self.downloader.cleanup_path(&archive.path);
        outcome
    }

    fn manifest_from_archive(
        &self,
        cancel: &CancelToken,
        archive: &Archive,
        include_hashes: bool,
    ) -> Result<Vec<FileEntry>> {
        let tree = self.extractor.extract(&archive.path, cancel)?;

        let outcome = (|| {
            let mut files = Vec::new();
            for rel in &tree.files {
                cancel.check()?;
                let original = rel.to_string_lossy();
                files.push(FileEntry::from_file(
                    &original,
                    &tree.root.join(rel),
                    include_hashes,
                )?);
            }
            Ok(files)
        })();

        tree.cleanup();
        outcome
    }
}

fn is_plugin_path(name: &str) -> bool {
    let normalized = normalize_path(name);
    normalized.ends_with(".esp") || normalized.ends_with(".esm") || normalized.ends_with(".esl")
}

/// Keep the kind, name the offending mod where the message allows it.
fn name_failed_mod(file_ref: &ModFileRef, e: Error) -> Error {
    tracing::error!(mod_name = %file_ref.name, mod_id = file_ref.mod_id, "mod processing failed: {}", e);
    match e {
        Error::DownloadFailed(msg) => {
            Error::DownloadFailed(format!("{}: {}", file_ref.name, msg))
        }
        other => other,
    }
}

/// Marker for reports that record whether they came from the cache.
trait Cached {
    fn mark_cached(&mut self);
}

impl Cached for FomodAnalysis {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

impl Cached for LoadOrderAnalysis {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

impl Cached for ConflictAnalysis {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

#[cfg(test)]
mod tests;
