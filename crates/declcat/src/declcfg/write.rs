//! Writing catalog documents as a JSON stream, a directory tree, or a tar archive.
//!
//! The tree layout is the one [`super::load_dir`] reads back:
//!
//! ```text
//! <root>/<package>.json                    package, its bundles, its other documents
//! <root>/__global.json                     documents not attached to a package
//! <root>/objects/<package>/<bundle>/obj_NNNN
//! ```

use super::{Bundle, DeclarativeConfig, Meta, Package, GLOBAL_NAME, OBJECTS_DIR, TAR_ROOT};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur while writing catalog documents.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("config dir {} must be empty", .0.display())]
    NotEmpty(PathBuf),

    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write document stream: {0}")]
    Stream(#[source] io::Error),

    #[error("failed to encode {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

const INDENT: &[u8] = b"    ";

fn encode<T: Serialize>(w: &mut impl Write, name: &str, value: &T) -> Result<(), WriteError> {
    let mut ser = serde_json::Serializer::with_formatter(&mut *w, PrettyFormatter::with_indent(INDENT));
    value
        .serialize(&mut ser)
        .map_err(|source| WriteError::Encode {
            name: name.to_string(),
            source,
        })?;
    w.write_all(b"\n").map_err(WriteError::Stream)
}

/// Write every document as an indented JSON stream.
///
/// Each package is followed by its bundles; other documents come last.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub fn write_json<W: Write>(cfg: &DeclarativeConfig, mut w: W) -> Result<(), WriteError> {
    let mut bundles: BTreeMap<String, Vec<&Bundle>> = BTreeMap::new();
    for bundle in &cfg.bundles {
        bundles
            .entry(bundle.package_name().unwrap_or_default())
            .or_default()
            .push(bundle);
    }

    for package in &cfg.packages {
        encode(&mut w, &package.name, package)?;
        for bundle in bundles.remove(&package.name).unwrap_or_default() {
            encode(&mut w, &bundle.name, bundle)?;
        }
    }
    for bundle in bundles.into_values().flatten() {
        encode(&mut w, &bundle.name, bundle)?;
    }
    for meta in &cfg.others {
        encode(&mut w, &meta.schema, meta)?;
    }
    Ok(())
}

/// A destination that accepts directories and files by relative path.
trait TreeWriter {
    fn create_dir(&mut self, path: &str) -> Result<(), WriteError>;
    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), WriteError>;
}

struct DiskWriter {
    root: PathBuf,
}

impl TreeWriter for DiskWriter {
    fn create_dir(&mut self, path: &str) -> Result<(), WriteError> {
        let full = self.root.join(path);
        fs::create_dir_all(&full).map_err(io_error(&full))
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), WriteError> {
        let full = self.root.join(path);
        fs::write(&full, data).map_err(io_error(&full))
    }
}

struct ArchiveWriter<W: Write> {
    path: PathBuf,
    builder: tar::Builder<W>,
    dirs: HashSet<String>,
    mtime: u64,
}

impl<W: Write> ArchiveWriter<W> {
    fn header(&self, entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(self.mtime);
        header
    }
}

impl<W: Write> TreeWriter for ArchiveWriter<W> {
    fn create_dir(&mut self, path: &str) -> Result<(), WriteError> {
        let mut prefix = String::new();
        for segment in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if !self.dirs.insert(prefix.clone()) {
                continue;
            }
            let mut header = self.header(tar::EntryType::Directory, 0o755, 0);
            self.builder
                .append_data(&mut header, format!("{prefix}/"), io::empty())
                .map_err(io_error(&self.path))?;
        }
        Ok(())
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), WriteError> {
        let mut header = self.header(tar::EntryType::Regular, 0o644, data.len() as u64);
        self.builder
            .append_data(&mut header, path, data)
            .map_err(io_error(&self.path))
    }
}

/// Write the catalog as a directory tree.
///
/// `dir` must not exist or must be an empty directory.
///
/// # Errors
///
/// Returns [`WriteError::NotEmpty`] or [`WriteError::NotADirectory`] for an
/// unusable target, or an error if any file cannot be written.
pub fn write_dir(cfg: &DeclarativeConfig, dir: &Path) -> Result<(), WriteError> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(WriteError::NotADirectory(dir.to_path_buf()));
        }
        let mut entries = fs::read_dir(dir).map_err(io_error(dir))?;
        if entries.next().is_some() {
            return Err(WriteError::NotEmpty(dir.to_path_buf()));
        }
    }
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let mut writer = DiskWriter {
        root: dir.to_path_buf(),
    };
    write_tree(cfg, &mut writer, "")?;
    tracing::info!(dir = %dir.display(), "wrote catalog directory");
    Ok(())
}

/// Write the catalog as an uncompressed tar archive rooted at `index/`.
///
/// # Errors
///
/// Returns an error if the archive cannot be created or written.
pub fn write_tar(cfg: &DeclarativeConfig, path: &Path) -> Result<(), WriteError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut writer = ArchiveWriter {
        path: path.to_path_buf(),
        builder: tar::Builder::new(BufWriter::new(file)),
        dirs: HashSet::new(),
        mtime,
    };
    write_tree(cfg, &mut writer, TAR_ROOT)?;
    writer
        .builder
        .into_inner()
        .and_then(|mut w| w.flush())
        .map_err(io_error(path))?;
    tracing::info!(path = %path.display(), "wrote catalog archive");
    Ok(())
}

fn join(root: &str, path: &str) -> String {
    if root.is_empty() {
        path.to_string()
    } else {
        format!("{root}/{path}")
    }
}

fn write_tree(cfg: &DeclarativeConfig, w: &mut impl TreeWriter, root: &str) -> Result<(), WriteError> {
    let mut packages: BTreeMap<String, Vec<&Package>> = BTreeMap::new();
    for package in &cfg.packages {
        packages.entry(package.name.clone()).or_default().push(package);
    }
    let mut bundles: BTreeMap<String, Vec<&Bundle>> = BTreeMap::new();
    for bundle in &cfg.bundles {
        bundles
            .entry(bundle.package_name().unwrap_or_default())
            .or_default()
            .push(bundle);
    }
    let mut others: BTreeMap<String, Vec<&Meta>> = BTreeMap::new();
    for meta in &cfg.others {
        let key = if meta.package.is_empty() {
            GLOBAL_NAME.to_string()
        } else {
            meta.package.clone()
        };
        others.entry(key).or_default().push(meta);
    }

    if !root.is_empty() {
        w.create_dir(root)?;
    }

    let names: BTreeSet<&String> = packages.keys().chain(bundles.keys()).collect();
    for name in names {
        if name.is_empty() {
            for bundle in bundles.get(name).into_iter().flatten() {
                tracing::warn!(bundle = %bundle.name, "skipping bundle with no package");
            }
            continue;
        }
        let file_cfg = DeclarativeConfig {
            packages: packages.get(name).into_iter().flatten().map(|p| (*p).clone()).collect(),
            bundles: bundles.get(name).into_iter().flatten().map(|b| (*b).clone()).collect(),
            others: others.remove(name).into_iter().flatten().cloned().collect(),
        };
        let mut data = Vec::new();
        write_json(&file_cfg, &mut data)?;
        w.write_file(&join(root, &format!("{name}.json")), &data)?;

        for bundle in &file_cfg.bundles {
            if bundle.objects.is_empty() {
                continue;
            }
            let dir = join(root, &format!("{OBJECTS_DIR}/{name}/{}", bundle.name));
            w.create_dir(&dir)?;
            for (i, object) in bundle.objects.iter().enumerate() {
                w.write_file(&format!("{dir}/obj_{i:04}"), object.as_bytes())?;
            }
        }
    }

    let remaining: Vec<Meta> = others.into_values().flatten().cloned().collect();
    if !remaining.is_empty() {
        let global = DeclarativeConfig {
            others: remaining,
            ..DeclarativeConfig::default()
        };
        let mut data = Vec::new();
        write_json(&global, &mut data)?;
        w.write_file(&join(root, &format!("{GLOBAL_NAME}.json")), &data)?;
    }
    Ok(())
}
