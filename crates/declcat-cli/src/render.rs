//! Implementation of the `declcat render` command.

use anyhow::{Context, Result};
use clap::ValueEnum;
use declcat::declcfg::{write_dir, write_json, write_tar};
use declcat::{from_model, Scheme};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::catalog::{self, CatalogSource};

/// Layout of a rendered catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One file per package plus side-car objects.
    Dir,
    /// The directory layout inside an uncompressed tar under `index/`.
    Tar,
}

impl OutputFormat {
    fn infer(output: &Path) -> Self {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar") {
            Self::Tar
        } else {
            Self::Dir
        }
    }
}

/// Options for rendering a catalog.
#[derive(Debug)]
pub struct RenderOptions {
    pub source: CatalogSource,
    /// Where to write; `None` streams documents to the command output.
    pub output: Option<PathBuf>,
    pub format: Option<OutputFormat>,
}

/// Rebuild the catalog through its graph and write the canonical documents.
///
/// Documents of schemas other than package and bundle are carried over as
/// loaded.
pub fn render_catalog<W: Write>(options: &RenderOptions, out: &mut W) -> Result<()> {
    let (loaded, model) = catalog::load_model(&options.source)?;
    let mut rendered = from_model(&model, &Scheme::default()).context("Failed to render catalog")?;
    rendered.others = loaded.others;

    let Some(output) = &options.output else {
        write_json(&rendered, &mut *out).context("Failed to write documents")?;
        return Ok(());
    };

    match options.format.unwrap_or_else(|| OutputFormat::infer(output)) {
        OutputFormat::Dir => write_dir(&rendered, output),
        OutputFormat::Tar => write_tar(&rendered, output),
    }
    .with_context(|| format!("Failed to write catalog to {}", output.display()))?;

    writeln!(
        out,
        "Rendered {} package(s) and {} bundle(s) to {}",
        rendered.packages.len(),
        rendered.bundles.len(),
        output.display()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use declcat::{declcfg, SourceFormat};
    use std::fs;
    use tempfile::TempDir;

    const CATALOG: &str = r#"{"schema": "olm.package", "name": "etcd", "defaultChannel": "stable"}
{"schema": "olm.bundle", "name": "etcd.v0.9.0", "package": "etcd", "image": "etcd:v0.9.0", "properties": [
    {"type": "olm.channel", "value": {"name": "stable"}},
    {"type": "olm.package", "value": {"packageName": "etcd", "version": "0.9.0"}}
]}
{"schema": "custom.note", "text": "kept"}
"#;

    fn options(dir: &TempDir, output: Option<PathBuf>, format: Option<OutputFormat>) -> RenderOptions {
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("etcd.json"), CATALOG).unwrap();
        RenderOptions {
            source: CatalogSource {
                path: source,
                format: SourceFormat::Dir,
                objects: None,
            },
            output,
            format,
        }
    }

    #[test]
    fn test_render_to_stdout_is_canonical() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        render_catalog(&options(&dir, None, None), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let package = text.find("\"type\": \"olm.package\"").unwrap();
        let channel = text.find("\"type\": \"olm.channel\"").unwrap();
        assert!(package < channel, "identity property must come first:\n{text}");
        assert!(text.contains("\"schema\": \"custom.note\""));
    }

    #[test]
    fn test_render_to_directory() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out");
        let mut out = Vec::new();
        render_catalog(&options(&dir, Some(output.clone()), None), &mut out).unwrap();

        assert!(output.join("etcd.json").is_file());
        assert!(output.join("__global.json").is_file());
        let message = String::from_utf8(out).unwrap();
        assert!(message.starts_with("Rendered 1 package(s) and 1 bundle(s)"));
    }

    #[test]
    fn test_render_to_archive_by_extension() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("catalog.tar");
        render_catalog(&options(&dir, Some(output.clone()), None), &mut Vec::new()).unwrap();

        let reloaded = declcfg::load_source(&output, SourceFormat::Tar).unwrap();
        assert_eq!(reloaded.packages.len(), 1);
        assert_eq!(reloaded.bundles.len(), 1);
        assert_eq!(reloaded.others.len(), 1);
    }

    #[test]
    fn test_render_refuses_non_empty_directory() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("keep.txt"), "x").unwrap();

        let err = render_catalog(
            &options(&dir, Some(output), Some(OutputFormat::Dir)),
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("must be empty"));
    }

    #[test]
    fn infer_format() {
        assert_eq!(OutputFormat::infer(Path::new("out/catalog.TAR")), OutputFormat::Tar);
        assert_eq!(OutputFormat::infer(Path::new("out/catalog")), OutputFormat::Dir);
    }
}
