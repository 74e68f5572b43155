//! Reading catalog documents from a directory, a single file, or a tar archive.

use super::{Bundle, DeclarativeConfig, Meta, Package, OBJECTS_DIR, SCHEMA_BUNDLE, SCHEMA_PACKAGE, TAR_ROOT};
use crate::config::SourceFormat;
use crate::model::CSV_KIND;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading catalog documents.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a stream of JSON values.
    #[error("could not load config file {}: parse error at offset {offset}: {source}", path.display())]
    Parse {
        path: PathBuf,
        offset: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A JSON value parsed but does not decode as its declared schema.
    #[error("could not load config file {}: invalid {schema} document at offset {offset}: {source}", path.display())]
    Document {
        path: PathBuf,
        offset: usize,
        schema: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LoadError + '_ {
    move |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a catalog from `path`, detecting its format.
///
/// # Errors
///
/// Returns an error if the path cannot be read or any document is malformed.
pub fn load_path(path: &Path) -> Result<DeclarativeConfig, LoadError> {
    load_source(path, SourceFormat::Auto)
}

/// Load a catalog from `path` using the given format.
///
/// # Errors
///
/// Returns an error if the path cannot be read or any document is malformed.
pub fn load_source(path: &Path, format: SourceFormat) -> Result<DeclarativeConfig, LoadError> {
    let format = match format {
        SourceFormat::Auto => SourceFormat::detect(path).map_err(io_error(path))?,
        other => other,
    };
    tracing::debug!(path = %path.display(), ?format, "loading catalog");
    match format {
        SourceFormat::Dir => load_dir(path),
        SourceFormat::Tar => load_tar(path),
        SourceFormat::File | SourceFormat::Auto => load_file(path),
    }
}

/// Load every file below `root`, in lexical path order.
///
/// Files under `objects/<package>/<bundle>/` are attached to the matching
/// bundle instead of being parsed as documents.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked or any document is malformed.
pub fn load_dir(root: &Path) -> Result<DeclarativeConfig, LoadError> {
    let mut loader = Loader::default();
    walk_dir(root, root, &mut loader)?;
    let cfg = loader.finish();
    tracing::debug!(
        root = %root.display(),
        packages = cfg.packages.len(),
        bundles = cfg.bundles.len(),
        others = cfg.others.len(),
        "loaded catalog directory"
    );
    Ok(cfg)
}

fn walk_dir(root: &Path, dir: &Path, loader: &mut Loader) -> Result<(), LoadError> {
    let mut paths = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(dir))?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk_dir(root, &path, loader)?;
        } else if path.is_file() {
            let data = fs::read(&path).map_err(io_error(&path))?;
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            loader.add_file(&path, &relative, &data)?;
        }
    }
    Ok(())
}

/// Load a single document stream file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or any document is malformed.
pub fn load_file(path: &Path) -> Result<DeclarativeConfig, LoadError> {
    let data = fs::read(path).map_err(io_error(path))?;
    let mut cfg = DeclarativeConfig::default();
    read_documents(path, &data, &mut cfg)?;
    Ok(cfg)
}

/// Load a document stream from any reader.
///
/// `name` is used in error messages only.
///
/// # Errors
///
/// Returns an error if reading fails or any document is malformed.
pub fn load_reader<R: Read>(name: &Path, mut reader: R) -> Result<DeclarativeConfig, LoadError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data).map_err(io_error(name))?;
    let mut cfg = DeclarativeConfig::default();
    read_documents(name, &data, &mut cfg)?;
    Ok(cfg)
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Load a catalog archive, optionally gzip-compressed.
///
/// Only regular files under the archive's `index/` directory are read.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or any document is malformed.
pub fn load_tar(path: &Path) -> Result<DeclarativeConfig, LoadError> {
    let mut magic = [0u8; 2];
    let mut probe = File::open(path).map_err(io_error(path))?;
    let compressed = match probe.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(io_error(path)(e)),
    };
    let file = File::open(path).map_err(io_error(path))?;
    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut archive = tar::Archive::new(reader);

    let prefix = format!("{TAR_ROOT}/");
    let mut loader = Loader::default();
    for entry in archive.entries().map_err(io_error(path))? {
        let mut entry = entry.map_err(io_error(path))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().map_err(io_error(path))?.to_string_lossy().into_owned();
        let name = name.trim_start_matches("./");
        let Some(relative) = name.strip_prefix(&prefix) else {
            continue;
        };
        let relative = relative.to_string();

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(io_error(path))?;
        loader.add_file(&path.join(&relative), &relative, &data)?;
    }
    Ok(loader.finish())
}

/// Accumulates documents and side-car objects while walking a catalog tree.
#[derive(Default)]
struct Loader {
    cfg: DeclarativeConfig,
    /// Side-car objects keyed by (package, bundle), in walk order.
    objects: HashMap<(String, String), Vec<String>>,
}

impl Loader {
    fn add_file(&mut self, path: &Path, relative: &str, data: &[u8]) -> Result<(), LoadError> {
        let segments: Vec<&str> = relative.split('/').collect();
        if segments.first() == Some(&OBJECTS_DIR) {
            if let [_, package, bundle, _] = segments.as_slice() {
                let object = String::from_utf8_lossy(data).into_owned();
                self.objects
                    .entry(((*package).to_string(), (*bundle).to_string()))
                    .or_default()
                    .push(object);
            } else {
                tracing::debug!(path = %path.display(), "ignoring misplaced object file");
            }
            return Ok(());
        }
        read_documents(path, data, &mut self.cfg)
    }

    fn finish(mut self) -> DeclarativeConfig {
        for bundle in &mut self.cfg.bundles {
            let Some(package) = bundle.package_name() else {
                continue;
            };
            if let Some(objects) = self.objects.remove(&(package, bundle.name.clone())) {
                bundle.csv_json = objects.iter().find(|o| is_csv(o)).cloned();
                bundle.objects = objects;
            }
        }
        for (package, bundle) in self.objects.keys() {
            tracing::warn!(package = %package, bundle = %bundle, "objects found for unknown bundle");
        }
        self.cfg
    }
}

/// Returns true if `object` is a JSON object of kind `ClusterServiceVersion`.
pub(crate) fn is_csv(object: &str) -> bool {
    #[derive(Deserialize)]
    struct Kind {
        #[serde(default)]
        kind: String,
    }
    serde_json::from_str::<Kind>(object).is_ok_and(|k| k.kind == CSV_KIND)
}

fn read_documents(path: &Path, data: &[u8], cfg: &mut DeclarativeConfig) -> Result<(), LoadError> {
    let mut stream = serde_json::Deserializer::from_slice(data).into_iter::<&RawValue>();
    loop {
        let offset = stream.byte_offset();
        let Some(next) = stream.next() else {
            break;
        };
        let raw = next.map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            offset,
            source,
        })?;
        let document = |schema: &str, source| LoadError::Document {
            path: path.to_path_buf(),
            offset,
            schema: schema.to_string(),
            source,
        };

        let meta = Meta::from_blob(raw.get()).map_err(|e| document("meta", e))?;
        match meta.schema.as_str() {
            SCHEMA_PACKAGE => {
                let package: Package =
                    serde_json::from_str(raw.get()).map_err(|e| document(SCHEMA_PACKAGE, e))?;
                cfg.packages.push(package);
            }
            SCHEMA_BUNDLE => {
                let bundle: Bundle =
                    serde_json::from_str(raw.get()).map_err(|e| document(SCHEMA_BUNDLE, e))?;
                cfg.bundles.push(bundle);
            }
            _ => cfg.others.push(meta),
        }
    }
    Ok(())
}
