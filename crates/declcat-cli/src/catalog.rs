//! Locating and loading the catalog a command operates on.

use anyhow::{Context, Result};
use declcat::{declcfg, to_model, CatalogConfig, DeclarativeConfig, Model, SourceFormat, CONFIG_FILE};
use std::path::{Path, PathBuf};

/// Where a command reads its catalog from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSource {
    pub path: PathBuf,
    pub format: SourceFormat,
    /// Unpacked bundle tree for the query engine.
    pub objects: Option<PathBuf>,
}

/// Load the configuration file named on the command line, or `./declcat.toml`
/// if one exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<CatalogConfig>> {
    load_config_from(explicit, Path::new(CONFIG_FILE))
}

fn load_config_from(explicit: Option<&Path>, fallback: &Path) -> Result<Option<CatalogConfig>> {
    let path = match explicit {
        Some(path) => path,
        None if fallback.is_file() => fallback,
        None => return Ok(None),
    };
    let config = CatalogConfig::from_path(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    Ok(Some(config))
}

/// Pick the catalog source: an explicit path wins over the config file.
pub fn resolve(
    path: Option<PathBuf>,
    objects: Option<PathBuf>,
    config: Option<&CatalogConfig>,
) -> Result<CatalogSource> {
    match (path, config) {
        (Some(path), _) => Ok(CatalogSource {
            path,
            format: SourceFormat::Auto,
            objects,
        }),
        (None, Some(config)) => Ok(CatalogSource {
            path: config.catalog.source.clone(),
            format: config.catalog.format,
            objects: objects.or_else(|| config.catalog.objects.clone()),
        }),
        (None, None) => Err(anyhow::anyhow!(
            "No catalog path given and no {CONFIG_FILE} found. Pass a path or use --config."
        )),
    }
}

/// Read the catalog documents.
pub fn load(source: &CatalogSource) -> Result<DeclarativeConfig> {
    declcfg::load_source(&source.path, source.format)
        .with_context(|| format!("Failed to load catalog from {}", source.path.display()))
}

/// Read the catalog documents and build the validated graph.
pub fn load_model(source: &CatalogSource) -> Result<(DeclarativeConfig, Model)> {
    let cfg = load(source)?;
    let model = to_model(&cfg)
        .with_context(|| format!("Invalid catalog {}", source.path.display()))?;
    Ok((cfg, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn explicit_path_wins_over_config() {
        let config = CatalogConfig::parse("[catalog]\nsource = \"from-config\"\nobjects = \"objs\"\n").unwrap();
        let source = resolve(Some(PathBuf::from("explicit")), None, Some(&config)).unwrap();
        assert_eq!(source.path, PathBuf::from("explicit"));
        assert_eq!(source.format, SourceFormat::Auto);
        assert_eq!(source.objects, None);
    }

    #[test]
    fn config_supplies_source_and_objects() {
        let config = CatalogConfig::parse(
            "[catalog]\nsource = \"index.tar\"\nformat = \"tar\"\nobjects = \"objs\"\n",
        )
        .unwrap();
        let source = resolve(None, None, Some(&config)).unwrap();
        assert_eq!(source.path, PathBuf::from("index.tar"));
        assert_eq!(source.format, SourceFormat::Tar);
        assert_eq!(source.objects, Some(PathBuf::from("objs")));

        let source = resolve(None, Some(PathBuf::from("other")), Some(&config)).unwrap();
        assert_eq!(source.objects, Some(PathBuf::from("other")));
    }

    #[test]
    fn missing_source_is_an_error() {
        let err = resolve(None, None, None).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn config_is_optional() {
        let dir = TempDir::new().unwrap();
        let fallback = dir.path().join(CONFIG_FILE);
        assert!(load_config_from(None, &fallback).unwrap().is_none());

        fs::write(&fallback, "[catalog]\nsource = \"catalog\"\n").unwrap();
        let config = load_config_from(None, &fallback).unwrap().unwrap();
        assert_eq!(config.catalog.source, dir.path().join("catalog"));
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load_config_from(Some(&missing), &dir.path().join(CONFIG_FILE)).is_err());
    }
}
