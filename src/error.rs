//! Error taxonomy shared across the engine.
//!
//! One flat enum; pipelines forward their dependencies' errors verbatim.
//! `ErrorKind` is the machine-readable tag consumers map to HTTP statuses.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the analysis engine.
#[derive(Debug, Error)]
pub enum Error {
    // Input
    /// No usable download URL was returned for a mod file.
    #[error("no download URL available")]
    NoUrl,

    /// The file starts with a printable record signature that is not TES4.
    #[error("invalid plugin signature: {0}")]
    InvalidSignature(String),

    /// The file does not look like a Bethesda plugin at all.
    #[error("not a plugin file: {0}")]
    NotPlugin(String),

    /// The plugin file ended before the declared record data.
    #[error("plugin file truncated: {0}")]
    Truncated(String),

    /// The extracted tree contains no fomod directory.
    #[error("no fomod directory found")]
    NoFomodDir,

    /// The fomod directory has no ModuleConfig.xml.
    #[error("ModuleConfig.xml not found in fomod directory")]
    NoModuleConfig,

    /// The installer XML could not be parsed.
    #[error("invalid XML: {0}")]
    InvalidXml(String),

    /// ModuleConfig.xml has a missing or empty moduleName.
    #[error("FOMOD module name is missing or empty")]
    MissingModuleName,

    // Resource
    /// A download or archive entry exceeded a configured size cap.
    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    /// An archive entry would escape the extraction root.
    #[error("archive entry escapes extraction root: {0}")]
    PathTraversalRejected(String),

    /// The archive path does not exist.
    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    /// The file is not a zip, 7z, or rar archive.
    #[error("unsupported archive format")]
    UnsupportedArchive,

    /// The archive could not be read or unpacked.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The HTTP response had an unexpected status.
    #[error("unexpected response status: {0}")]
    InvalidResponse(u16),

    /// The download stream failed mid-transfer.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    // Upstream
    /// The registry rejected the API credential.
    #[error("registry rejected the API credential")]
    Unauthorized,

    /// The requested resource does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry returned 429.
    #[error("registry rate limit exceeded")]
    RateLimited,

    /// The registry returned a 5xx status.
    #[error("registry server error: status {0}")]
    ServerError(u16),

    /// The GraphQL response carried errors.
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// The credential lacks download privileges for this file.
    #[error("download requires a premium registry account")]
    PremiumRequired,

    // Lifecycle
    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// No API credential was configured.
    #[error("no API credential configured")]
    NotConfigured,

    // Cache
    /// Cache miss. Not a user-facing failure.
    #[error("cache miss")]
    CacheMiss,

    /// The cache entry's TTL elapsed; treated as a miss.
    #[error("cache entry expired")]
    CacheExpired,

    // Carriers
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Machine-readable tag for an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoUrl,
    InvalidSignature,
    NotPlugin,
    Truncated,
    NoFomodDir,
    NoModuleConfig,
    InvalidXml,
    MissingModuleName,
    FileTooLarge,
    PathTraversalRejected,
    ArchiveNotFound,
    UnsupportedArchive,
    ExtractionFailed,
    InvalidResponse,
    DownloadFailed,
    Unauthorized,
    NotFound,
    RateLimited,
    ServerError,
    GraphQl,
    PremiumRequired,
    Cancelled,
    NotConfigured,
    CacheMiss,
    CacheExpired,
    Io,
    Http,
    Json,
    Db,
}

impl ErrorKind {
    /// Status code the HTTP surface should answer with for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::PremiumRequired => 402,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Cancelled => 499,
            _ => 500,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoUrl => ErrorKind::NoUrl,
            Error::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Error::NotPlugin(_) => ErrorKind::NotPlugin,
            Error::Truncated(_) => ErrorKind::Truncated,
            Error::NoFomodDir => ErrorKind::NoFomodDir,
            Error::NoModuleConfig => ErrorKind::NoModuleConfig,
            Error::InvalidXml(_) => ErrorKind::InvalidXml,
            Error::MissingModuleName => ErrorKind::MissingModuleName,
            Error::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            Error::PathTraversalRejected(_) => ErrorKind::PathTraversalRejected,
            Error::ArchiveNotFound(_) => ErrorKind::ArchiveNotFound,
            Error::UnsupportedArchive => ErrorKind::UnsupportedArchive,
            Error::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Error::InvalidResponse(_) => ErrorKind::InvalidResponse,
            Error::DownloadFailed(_) => ErrorKind::DownloadFailed,
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::RateLimited => ErrorKind::RateLimited,
            Error::ServerError(_) => ErrorKind::ServerError,
            Error::GraphQl(_) => ErrorKind::GraphQl,
            Error::PremiumRequired => ErrorKind::PremiumRequired,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::NotConfigured => ErrorKind::NotConfigured,
            Error::CacheMiss => ErrorKind::CacheMiss,
            Error::CacheExpired => ErrorKind::CacheExpired,
            Error::Io(_) => ErrorKind::Io,
            Error::Http(_) => ErrorKind::Http,
            Error::Json(_) => ErrorKind::Json,
            Error::Db(_) => ErrorKind::Db,
        }
    }

    /// True for failures the registry client is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RateLimited | Error::ServerError(_))
    }

    /// True when the error represents a cache miss (absent or expired).
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Error::CacheMiss | Error::CacheExpired)
    }
}
