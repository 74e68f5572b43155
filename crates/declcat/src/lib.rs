//! Declarative package catalogs.
//!
//! This crate provides:
//! - A typed codec for the `(type, value)` properties that carry every catalog fact
//! - The package/channel/bundle upgrade graph and its validation rules
//! - Loading and writing declarative catalog documents (directory, file, tar archive)
//! - Conversion between documents and the validated graph
//! - A read-only query engine over the graph
//! - The `declcat.toml` configuration file

mod config;
pub mod declcfg;
mod model;
pub mod property;
mod query;
mod semver_range;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CatalogConfig, CatalogSection, ConfigError, LogSection, SourceFormat, CONFIG_FILE};
pub use declcfg::{from_model, to_model, ConvertError, DeclarativeConfig, LoadError, WriteError};
pub use model::{
    Bundle, Channel, CsvMetadata, GroupVersionKind, HeadError, Icon, Model, Package,
    RelatedImage, RequiredPackage, ValidationError, CSV_KIND,
};
pub use property::{Properties, Property, PropertyError, Scheme};
pub use query::{
    BundleView, CatalogQuery, ChannelEntry, Dependency, PackageChannel, PackageView, QueryError,
    Querier,
};
pub use semver_range::{RangeError, VersionRange};
