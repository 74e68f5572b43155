//! Catalog configuration file (`declcat.toml`) parsing and validation.
//!
//! ```toml
//! [catalog]
//! source = "catalog"        # directory, document file, or tar archive
//! format = "auto"           # auto | dir | file | tar
//! objects = "bundles"       # optional unpacked bundle tree
//!
//! [log]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "declcat.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Errors that can occur when working with the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown log level '{0}', expected one of: trace, debug, info, warn, error, off")]
    UnknownLogLevel(String),

    #[error("unknown source format '{0}', expected one of: auto, dir, file, tar")]
    UnknownFormat(String),
}

/// The complete `declcat.toml` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    pub catalog: CatalogSection,

    #[serde(default)]
    pub log: LogSection,
}

/// Where the catalog is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSection {
    pub source: PathBuf,

    #[serde(default)]
    pub format: SourceFormat,

    /// Unpacked bundle tree laid out as `<package>/<bundle>/<file>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// How a catalog source is laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Decide from the path itself.
    #[default]
    Auto,
    Dir,
    File,
    Tar,
}

const TAR_EXTENSIONS: &[&str] = &[".tar", ".tar.gz", ".tgz"];
const USTAR_MAGIC_OFFSET: usize = 257;

impl SourceFormat {
    /// Inspect `path` to decide its format.
    ///
    /// Directories are [`SourceFormat::Dir`]. Files are [`SourceFormat::Tar`]
    /// when their name has a tar extension or their content starts with a
    /// gzip or tar header, and [`SourceFormat::File`] otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not exist or cannot be read.
    pub fn detect(path: &Path) -> io::Result<Self> {
        let metadata = path.metadata()?;
        if metadata.is_dir() {
            return Ok(Self::Dir);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if TAR_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            return Ok(Self::Tar);
        }

        let mut header = Vec::with_capacity(USTAR_MAGIC_OFFSET + 5);
        File::open(path)?
            .take((USTAR_MAGIC_OFFSET + 5) as u64)
            .read_to_end(&mut header)?;
        let gzip = header.starts_with(&[0x1f, 0x8b]);
        let ustar = header.get(USTAR_MAGIC_OFFSET..).is_some_and(|m| m == b"ustar");
        Ok(if gzip || ustar { Self::Tar } else { Self::File })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Dir => "dir",
            Self::File => "file",
            Self::Tar => "tar",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "dir" => Ok(Self::Dir),
            "file" => Ok(Self::File),
            "tar" => Ok(Self::Tar),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

impl CatalogConfig {
    /// Load a configuration file.
    ///
    /// Relative `source` and `objects` paths are resolved against the
    /// directory containing the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        if let Some(base) = path.parent() {
            config.catalog.source = base.join(&config.catalog.source);
            config.catalog.objects = config.catalog.objects.map(|o| base.join(o));
        }
        Ok(config)
    }

    /// Parse a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a field fails validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.source.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("catalog.source"));
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::UnknownLogLevel(self.log.level.clone()));
        }
        Ok(())
    }

    /// The catalog format with [`SourceFormat::Auto`] resolved against the source path.
    ///
    /// # Errors
    ///
    /// Returns an error if the source must be inspected and cannot be read.
    pub fn source_format(&self) -> io::Result<SourceFormat> {
        match self.catalog.format {
            SourceFormat::Auto => SourceFormat::detect(&self.catalog.source),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_minimal() {
        let config = CatalogConfig::parse(
            r#"
[catalog]
source = "catalog"
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.source, PathBuf::from("catalog"));
        assert_eq!(config.catalog.format, SourceFormat::Auto);
        assert_eq!(config.catalog.objects, None);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn parse_full() {
        let config = CatalogConfig::parse(
            r#"
[catalog]
source = "index.tar"
format = "tar"
objects = "bundles"

[log]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.format, SourceFormat::Tar);
        assert_eq!(config.catalog.objects, Some(PathBuf::from("bundles")));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn reject_unknown_fields() {
        let err = CatalogConfig::parse(
            r#"
[catalog]
source = "catalog"
colour = "blue"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn reject_empty_source() {
        let err = CatalogConfig::parse(
            r#"
[catalog]
source = ""
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("catalog.source")));
    }

    #[test]
    fn reject_unknown_log_level() {
        let err = CatalogConfig::parse(
            r#"
[catalog]
source = "catalog"

[log]
level = "loud"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLogLevel(..)));
    }

    #[test]
    fn from_path_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[catalog]\nsource = \"catalog\"\nobjects = \"bundles\"\n",
        )
        .unwrap();

        let config = CatalogConfig::from_path(&path).unwrap();
        assert_eq!(config.catalog.source, dir.path().join("catalog"));
        assert_eq!(config.catalog.objects, Some(dir.path().join("bundles")));
    }

    #[test]
    fn detect_formats() {
        let dir = TempDir::new().unwrap();
        assert_eq!(SourceFormat::detect(dir.path()).unwrap(), SourceFormat::Dir);

        let json = dir.path().join("catalog.json");
        std::fs::write(&json, "{}").unwrap();
        assert_eq!(SourceFormat::detect(&json).unwrap(), SourceFormat::File);

        let named = dir.path().join("catalog.tgz");
        std::fs::write(&named, "").unwrap();
        assert_eq!(SourceFormat::detect(&named).unwrap(), SourceFormat::Tar);

        let gzip = dir.path().join("catalog.bin");
        std::fs::write(&gzip, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert_eq!(SourceFormat::detect(&gzip).unwrap(), SourceFormat::Tar);

        assert!(SourceFormat::detect(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn source_format_resolves_auto() {
        let dir = TempDir::new().unwrap();
        let config = CatalogConfig {
            catalog: CatalogSection {
                source: dir.path().to_path_buf(),
                format: SourceFormat::Auto,
                objects: None,
            },
            log: LogSection::default(),
        };
        assert_eq!(config.source_format().unwrap(), SourceFormat::Dir);
    }

    #[test]
    fn format_from_str() {
        assert_eq!("dir".parse::<SourceFormat>().unwrap(), SourceFormat::Dir);
        assert!(matches!(
            "zip".parse::<SourceFormat>(),
            Err(ConfigError::UnknownFormat(..))
        ));
        assert_eq!(SourceFormat::Tar.to_string(), "tar");
    }
}
