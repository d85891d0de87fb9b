use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use pkl_types::{PackageFlags, PackageGuid};

use crate::error::{LinkError, LinkResult};
use crate::summary::Generation;

/// Default limit on nested export creation.
pub const MAX_CREATE_DEPTH: u32 = 512;

/// Process-level linker configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Directories searched, in order, for providing packages.
    pub search_paths: Vec<PathBuf>,
    /// File extension of package files, without the dot.
    pub package_extension: String,
    /// Substitute null for unresolvable imports instead of failing the load.
    pub forgiving: bool,
    /// Verify imports on first use instead of when the package opens.
    pub defer_verify: bool,
    /// Longest accepted length-prefixed string.
    pub max_string_len: usize,
    /// Uncompressed bytes per compressed chunk.
    pub compression_chunk_size: usize,
    /// Deepest outer, class or archetype chain followed while creating one
    /// export. Deeper chains read back as null and flag the loader's stream.
    pub max_create_depth: u32,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from(".")],
            package_extension: "pkg".to_string(),
            forgiving: false,
            defer_verify: false,
            max_string_len: 64 * 1024,
            compression_chunk_size: 128 * 1024,
            max_create_depth: MAX_CREATE_DEPTH,
        }
    }
}

impl LinkerConfig {
    pub fn from_toml_str(text: &str) -> LinkResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| LinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> LinkResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> LinkResult<String> {
        toml::to_string_pretty(self).map_err(|e| LinkError::Config(e.to_string()))
    }

    fn validate(&self) -> LinkResult<()> {
        if self.compression_chunk_size == 0 {
            return Err(LinkError::Config("compression_chunk_size must be positive".into()));
        }
        if self.max_create_depth == 0 {
            return Err(LinkError::Config("max_create_depth must be positive".into()));
        }
        if self.package_extension.starts_with('.') {
            return Err(LinkError::Config(
                "package_extension must not start with '.'".into(),
            ));
        }
        Ok(())
    }

    /// Candidate file paths for a package name, in search order.
    pub fn candidate_paths(&self, package: &str) -> Vec<PathBuf> {
        let file = format!("{package}.{}", self.package_extension);
        self.search_paths.iter().map(|dir| dir.join(&file)).collect()
    }
}

/// Per-load overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub forgiving: bool,
    pub defer_verify: bool,
    /// Counts a remote peer recorded for this package. When smaller than the
    /// file's own, the visible name and export counts are clamped to them.
    pub remote_generation: Option<Generation>,
}

impl LoadOptions {
    pub fn from_config(config: &LinkerConfig) -> Self {
        Self {
            forgiving: config.forgiving,
            defer_verify: config.defer_verify,
            remote_generation: None,
        }
    }

    #[must_use]
    pub fn forgiving(mut self, forgiving: bool) -> Self {
        self.forgiving = forgiving;
        self
    }

    #[must_use]
    pub fn deferred(mut self, defer: bool) -> Self {
        self.defer_verify = defer;
        self
    }

    #[must_use]
    pub fn with_remote_generation(mut self, generation: Generation) -> Self {
        self.remote_generation = Some(generation);
        self
    }
}

/// Per-save settings written into the summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOptions {
    /// zstd-compress everything after the summary.
    pub compress: bool,
    pub package_flags: PackageFlags,
    pub engine_version: i32,
    pub cooked_content_version: i32,
    pub licensee_version: u16,
    pub folder_name: String,
    /// Identity to stamp; `None` keeps the package's existing guid.
    pub guid: Option<PackageGuid>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compress: false,
            package_flags: PackageFlags::empty(),
            engine_version: 0,
            cooked_content_version: 0,
            licensee_version: 0,
            folder_name: String::new(),
            guid: None,
        }
    }
}

impl SaveOptions {
    #[must_use]
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: PackageFlags) -> Self {
        self.package_flags = flags;
        self
    }
}
