//! Configuration options for the human view and the cache orchestrator.
//!
//! - [`LayoutOptions`]: table width and column spacing for the human view
//! - [`CacheOptions`]: where cache artifacts live and how writes are retried
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::{CacheOptions, LayoutOptions};
//!
//! let layout = LayoutOptions::new().with_max_line_width(80);
//! assert_eq!(layout.column_gap, 2);
//!
//! let cache = CacheOptions::new().with_write_attempts(5);
//! assert_eq!(cache.cache_dir.to_str(), Some(".dx/cache"));
//! ```

use std::path::PathBuf;

/// Table layout settings for the human view.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::LayoutOptions;
///
/// let options = LayoutOptions::new()
///     .with_max_line_width(60)
///     .with_column_gap(4);
/// assert_eq!(options.max_line_width, 60);
/// assert_eq!(options.column_gap, 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Widest a table line may get before columns wrap into groups.
    pub max_line_width: usize,
    /// Spaces between adjacent columns.
    pub column_gap: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            max_line_width: 120,
            column_gap: 2,
        }
    }
}

impl LayoutOptions {
    /// Creates default options (120 columns, 2-space gap).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum line width.
    #[must_use]
    pub fn with_max_line_width(mut self, width: usize) -> Self {
        self.max_line_width = width;
        self
    }

    /// Sets the gap between columns.
    ///
    /// The human codec splits cells on runs of two or more spaces, so it
    /// never uses a gap below 2 whatever is set here.
    #[must_use]
    pub fn with_column_gap(mut self, gap: usize) -> Self {
        self.column_gap = gap;
        self
    }
}

/// Cache orchestrator settings.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::CacheOptions;
///
/// let options = CacheOptions::new().with_cache_dir("build/dx");
/// assert_eq!(options.cache_dir.to_str(), Some("build/dx"));
/// assert_eq!(options.write_attempts, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheOptions {
    /// Cache directory, relative to the project root.
    pub cache_dir: PathBuf,
    /// How many times one atomic write is attempted before giving up.
    pub write_attempts: u32,
    /// Directory of the per-source manifest records, inside the cache
    /// directory.
    pub manifest_dir: PathBuf,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            cache_dir: PathBuf::from(".dx/cache"),
            write_attempts: 3,
            manifest_dir: PathBuf::from("manifest"),
        }
    }
}

impl CacheOptions {
    /// Creates default options (`.dx/cache`, 3 attempts, `manifest`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache directory, relative to the project root.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Sets the number of write attempts. Zero is treated as one.
    #[must_use]
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts;
        self
    }

    /// Sets the manifest directory, relative to the cache directory.
    #[must_use]
    pub fn with_manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest_dir = dir.into();
        self
    }
}
