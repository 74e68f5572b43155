//! The in-memory catalog graph.
//!
//! Ownership is strictly top-down: a [`Model`] owns its packages, a
//! [`Package`] owns its channels, and a [`Channel`] owns its bundles.
//! Back-references (`Channel::package`, `Bundle::package`, `Bundle::channel`)
//! are plain names resolved through the owning maps.

use crate::property::{
    CsvInstallMode, CsvLink, CsvMaintainer, CsvProvider, Property, PropertyError,
};
use crate::semver_range::{RangeError, VersionRange};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use thiserror::Error;

/// Kind of the primary descriptor among a bundle's attached objects.
pub const CSV_KIND: &str = "ClusterServiceVersion";

/// Errors from resolving a channel's head.
#[derive(Error, Debug)]
pub enum HeadError {
    #[error("no channel head found in graph")]
    NoHead,

    #[error("multiple channel heads found in graph: {}", .0.join(", "))]
    MultipleHeads(Vec<String>),

    #[error("invalid skip range \"{range}\" for bundle \"{bundle}\": {source}")]
    InvalidSkipRange {
        range: String,
        bundle: String,
        #[source]
        source: RangeError,
    },

    #[error("invalid version \"{version}\" for bundle \"{bundle}\": {source}")]
    InvalidVersion {
        version: String,
        bundle: String,
        #[source]
        source: semver::Error,
    },
}

/// Errors from validating the graph.
///
/// Nested variants carry the package, channel, and bundle names so the
/// rendered message reads as a path to the failure.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid package \"{name}\": {source}")]
    Package {
        name: String,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("package key \"{key}\" does not match package name \"{name}\"")]
    PackageKeyMismatch { key: String, name: String },

    #[error("package name must not be empty")]
    EmptyPackageName,

    #[error("invalid icon: icon data must be set if icon is defined")]
    EmptyIconData,

    #[error("default channel must be set")]
    MissingDefaultChannel,

    #[error("default channel \"{0}\" not found in channels list")]
    DefaultChannelNotFound(String),

    #[error("invalid channel \"{name}\": {source}")]
    Channel {
        name: String,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("channel \"{0}\" not correctly linked to parent package")]
    ChannelNotLinked(String),

    #[error("channel key \"{key}\" does not match channel name \"{name}\"")]
    ChannelKeyMismatch { key: String, name: String },

    #[error("channel name must not be empty")]
    EmptyChannelName,

    #[error("package must be set")]
    MissingPackage,

    #[error(transparent)]
    Head(#[from] HeadError),

    #[error("invalid bundle \"{name}\": {source}")]
    Bundle {
        name: String,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("bundle \"{0}\" not correctly linked to parent channel")]
    BundleNotLinked(String),

    #[error("bundle key \"{key}\" does not match bundle name \"{name}\"")]
    BundleKeyMismatch { key: String, name: String },

    #[error("name must be set")]
    EmptyBundleName,

    #[error("channel must be set")]
    MissingChannel,

    #[error("package does not match channel's package")]
    PackageMismatch,

    #[error("replaces \"{0}\" not found in channel")]
    ReplacesNotFound(String),

    #[error("invalid property[{index}]: {source}")]
    Property {
        index: usize,
        #[source]
        source: PropertyError,
    },

    #[error("invalid required api [{index}]: {source}")]
    RequiredApi {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("invalid provided api [{index}]: {source}")]
    ProvidedApi {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("invalid version \"{version}\": {source}")]
    Version {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("invalid skipRange \"{range}\": {source}")]
    SkipRange {
        range: String,
        #[source]
        source: RangeError,
    },

    #[error("skipRange \"{range}\" includes bundle's own version \"{version}\"")]
    SkipRangeIncludesSelf { range: String, version: String },

    #[error("skip[{0}] is empty")]
    EmptySkip(usize),

    #[error("image is unset")]
    MissingImage,

    #[error("invalid required package [{index}]: {source}")]
    RequiredPackage {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("invalid group \"{group}\": {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("invalid version \"{0}\": must not be empty")]
    EmptyApiVersion(String),

    #[error("invalid kind \"{kind}\": {reason}")]
    InvalidKind { kind: String, reason: String },

    #[error("invalid plural \"{plural}\": {reason}")]
    InvalidPlural { plural: String, reason: String },

    #[error("package name must be set")]
    EmptyRequiredPackageName,

    #[error("invalid version range \"{range}\": {source}")]
    VersionRange {
        range: String,
        #[source]
        source: RangeError,
    },
}

impl ValidationError {
    fn in_package(name: &str, source: Self) -> Self {
        Self::Package {
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    fn in_channel(name: &str, source: Self) -> Self {
        Self::Channel {
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    fn in_bundle(name: &str, source: Self) -> Self {
        Self::Bundle {
            name: name.to_string(),
            source: Box::new(source),
        }
    }
}

/// The whole catalog: packages keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub packages: BTreeMap<String, Package>,
}

impl Model {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package under its own name.
    pub fn insert(&mut self, package: Package) {
        self.packages.insert(package.name.clone(), package);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Iterate every bundle of every channel of every package.
    ///
    /// A bundle that belongs to several channels is yielded once per channel.
    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.packages
            .values()
            .flat_map(|p| p.channels.values())
            .flat_map(|c| c.bundles.values())
    }

    /// Validate every package, channel, and bundle.
    ///
    /// # Errors
    ///
    /// Returns the first failure, qualified with the package, channel, and
    /// bundle it was found in.
    pub fn validate(&self) -> Result<(), ValidationError> {
        tracing::debug!(packages = self.packages.len(), "validating catalog model");
        for (key, package) in &self.packages {
            package
                .validate()
                .map_err(|e| ValidationError::in_package(&package.name, e))?;
            if *key != package.name {
                return Err(ValidationError::PackageKeyMismatch {
                    key: key.clone(),
                    name: package.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A named unit of distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub description: String,
    pub icon: Option<Icon>,
    /// Name of the channel in `channels` that clients follow by default.
    pub default_channel: String,
    pub channels: BTreeMap<String, Channel>,
}

impl Package {
    /// Returns the default channel, if it exists.
    #[must_use]
    pub fn default_channel(&self) -> Option<&Channel> {
        self.channels.get(&self.default_channel)
    }

    /// Validate the package and everything below it.
    ///
    /// # Errors
    ///
    /// Returns the first failure found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyPackageName);
        }

        if let Some(icon) = &self.icon {
            icon.validate()?;
        }

        if self.default_channel.is_empty() {
            return Err(ValidationError::MissingDefaultChannel);
        }

        for (key, channel) in &self.channels {
            channel
                .validate()
                .map_err(|e| ValidationError::in_channel(&channel.name, e))?;
            if channel.package != self.name {
                return Err(ValidationError::ChannelNotLinked(channel.name.clone()));
            }
            if *key != channel.name {
                return Err(ValidationError::ChannelKeyMismatch {
                    key: key.clone(),
                    name: channel.name.clone(),
                });
            }
        }

        if !self.channels.contains_key(&self.default_channel) {
            return Err(ValidationError::DefaultChannelNotFound(
                self.default_channel.clone(),
            ));
        }
        Ok(())
    }
}

/// Package icon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Icon {
    pub data: Vec<u8>,
    pub media_type: String,
}

impl Icon {
    /// # Errors
    ///
    /// Returns an error if the icon has no data.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.data.is_empty() {
            return Err(ValidationError::EmptyIconData);
        }
        Ok(())
    }
}

/// An upgrade track within a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    /// Name of the owning package.
    pub package: String,
    pub name: String,
    pub bundles: BTreeMap<String, Bundle>,
}

impl Channel {
    /// Create an empty channel belonging to `package`.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
            bundles: BTreeMap::new(),
        }
    }

    /// Find the single bundle with no incoming upgrade edge.
    ///
    /// Incoming edges come from every other bundle's `replaces`, its `skips`,
    /// and every bundle whose version falls inside its `skip_range`.
    ///
    /// # Errors
    ///
    /// Returns [`HeadError::NoHead`] if every bundle has an incoming edge,
    /// [`HeadError::MultipleHeads`] if more than one does not, or a parse
    /// error for a bad skip range or version.
    pub fn head(&self) -> Result<&Bundle, HeadError> {
        let mut incoming: HashSet<&str> = HashSet::new();
        for bundle in self.bundles.values() {
            if let Some(replaces) = &bundle.replaces {
                incoming.insert(replaces.as_str());
            }
            incoming.extend(bundle.skips.iter().map(String::as_str));

            let Some(range) = &bundle.skip_range else {
                continue;
            };
            let skip_range =
                VersionRange::parse(range).map_err(|source| HeadError::InvalidSkipRange {
                    range: range.clone(),
                    bundle: bundle.name.clone(),
                    source,
                })?;
            for candidate in self.bundles.values() {
                if candidate.name == bundle.name {
                    continue;
                }
                let version = Version::parse(&candidate.version).map_err(|source| {
                    HeadError::InvalidVersion {
                        version: candidate.version.clone(),
                        bundle: candidate.name.clone(),
                        source,
                    }
                })?;
                if skip_range.matches(&version) {
                    incoming.insert(candidate.name.as_str());
                }
            }
        }

        let heads: Vec<&Bundle> = self
            .bundles
            .values()
            .filter(|b| !incoming.contains(b.name.as_str()))
            .collect();
        match heads.as_slice() {
            [] => Err(HeadError::NoHead),
            [head] => Ok(*head),
            _ => Err(HeadError::MultipleHeads(
                heads.iter().map(|b| b.name.clone()).collect(),
            )),
        }
    }

    /// Validate the channel and its bundles.
    ///
    /// # Errors
    ///
    /// Returns the first failure found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyChannelName);
        }
        if self.package.is_empty() {
            return Err(ValidationError::MissingPackage);
        }

        self.head()?;

        for (key, bundle) in &self.bundles {
            bundle
                .validate(self)
                .map_err(|e| ValidationError::in_bundle(&bundle.name, e))?;
            if bundle.channel != self.name {
                return Err(ValidationError::BundleNotLinked(bundle.name.clone()));
            }
            if *key != bundle.name {
                return Err(ValidationError::BundleKeyMismatch {
                    key: key.clone(),
                    name: bundle.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// One installable version of a package, placed in one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    /// Name of the owning package.
    pub package: String,
    /// Name of the owning channel.
    pub channel: String,
    pub name: String,
    pub version: String,
    pub image: String,
    pub replaces: Option<String>,
    pub skips: Vec<String>,
    pub skip_range: Option<String>,
    pub properties: Vec<Property>,
    pub provided_apis: Vec<GroupVersionKind>,
    pub required_apis: Vec<GroupVersionKind>,
    pub required_packages: Vec<RequiredPackage>,
    pub related_images: Vec<RelatedImage>,

    /// Manifest fields carried for older consumers.
    pub csv: Option<CsvMetadata>,
    /// The attached object whose kind is [`CSV_KIND`].
    pub csv_json: Option<String>,
    /// Every attached object, as raw text.
    pub objects: Vec<String>,
}

impl Bundle {
    /// Validate the bundle against the channel that owns it.
    ///
    /// # Errors
    ///
    /// Returns the first failure found.
    pub fn validate(&self, channel: &Channel) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyBundleName);
        }
        if self.channel.is_empty() {
            return Err(ValidationError::MissingChannel);
        }
        if self.package.is_empty() {
            return Err(ValidationError::MissingPackage);
        }
        if self.package != channel.package {
            return Err(ValidationError::PackageMismatch);
        }
        if let Some(replaces) = &self.replaces {
            if !channel.bundles.contains_key(replaces) {
                return Err(ValidationError::ReplacesNotFound(replaces.clone()));
            }
        }

        for (index, property) in self.properties.iter().enumerate() {
            property
                .validate()
                .map_err(|source| ValidationError::Property { index, source })?;
        }
        for (index, api) in self.required_apis.iter().enumerate() {
            api.validate()
                .map_err(|e| ValidationError::RequiredApi {
                    index,
                    source: Box::new(e),
                })?;
        }
        for (index, api) in self.provided_apis.iter().enumerate() {
            api.validate()
                .map_err(|e| ValidationError::ProvidedApi {
                    index,
                    source: Box::new(e),
                })?;
        }

        let version = Version::parse(&self.version).map_err(|source| ValidationError::Version {
            version: self.version.clone(),
            source,
        })?;

        if let Some(range) = &self.skip_range {
            let skip_range =
                VersionRange::parse(range).map_err(|source| ValidationError::SkipRange {
                    range: range.clone(),
                    source,
                })?;
            if skip_range.matches(&version) {
                return Err(ValidationError::SkipRangeIncludesSelf {
                    range: range.clone(),
                    version: self.version.clone(),
                });
            }
        }

        if let Some(index) = self.skips.iter().position(String::is_empty) {
            return Err(ValidationError::EmptySkip(index));
        }

        if self.image.is_empty() {
            return Err(ValidationError::MissingImage);
        }

        for (index, required) in self.required_packages.iter().enumerate() {
            required
                .validate()
                .map_err(|e| ValidationError::RequiredPackage {
                    index,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Returns true if the bundle provides the given API.
    ///
    /// The plural name does not take part in the comparison.
    #[must_use]
    pub fn provides(&self, group: &str, version: &str, kind: &str) -> bool {
        self.provided_apis
            .iter()
            .any(|api| api.group == group && api.version == version && api.kind == kind)
    }
}

/// Manifest fields decoded from `olm.csv.*` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvMetadata {
    pub annotations: BTreeMap<String, String>,
    pub description: String,
    pub display_name: String,
    pub install_modes: Vec<CsvInstallMode>,
    pub keywords: Vec<String>,
    pub links: Vec<CsvLink>,
    pub maintainers: Vec<CsvMaintainer>,
    pub maturity: String,
    pub min_kube_version: String,
    pub provider: Option<CsvProvider>,
}

/// A typed API reference (group/version/kind).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plural: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: String::new(),
        }
    }

    /// Returns true if both name the same group, version and kind, whatever their plurals.
    #[must_use]
    pub fn same_api(&self, other: &Self) -> bool {
        self.group == other.group && self.version == other.version && self.kind == other.kind
    }

    /// Check the naming conventions of each component.
    ///
    /// The group must be a DNS-1123 subdomain, the version must be set, the
    /// lower-cased kind must be a DNS-1035 label, and so must the plural if set.
    ///
    /// # Errors
    ///
    /// Returns the first component that fails.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(reason) = dns1123_subdomain_error(&self.group) {
            return Err(ValidationError::InvalidGroup {
                group: self.group.clone(),
                reason,
            });
        }
        if self.version.is_empty() {
            return Err(ValidationError::EmptyApiVersion(self.version.clone()));
        }
        if let Some(reason) = dns1035_label_error(&self.kind.to_lowercase()) {
            return Err(ValidationError::InvalidKind {
                kind: self.kind.clone(),
                reason,
            });
        }
        if !self.plural.is_empty() {
            if let Some(reason) = dns1035_label_error(&self.plural) {
                return Err(ValidationError::InvalidPlural {
                    plural: self.plural.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
const DNS1035_LABEL_MAX_LEN: usize = 63;

fn dns1123_subdomain_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
    })
    .as_ref()
}

fn dns1035_label_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").ok())
        .as_ref()
}

fn dns1123_subdomain_error(value: &str) -> Option<String> {
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        return Some(format!(
            "must be no more than {DNS1123_SUBDOMAIN_MAX_LEN} characters"
        ));
    }
    if !dns1123_subdomain_regex().is_some_and(|re| re.is_match(value)) {
        return Some(
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric \
             characters, '-' or '.', and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    None
}

fn dns1035_label_error(value: &str) -> Option<String> {
    if value.len() > DNS1035_LABEL_MAX_LEN {
        return Some(format!(
            "must be no more than {DNS1035_LABEL_MAX_LEN} characters"
        ));
    }
    if !dns1035_label_regex().is_some_and(|re| re.is_match(value)) {
        return Some(
            "a DNS-1035 label must consist of lower case alphanumeric characters or '-', \
             start with an alphabetic character, and end with an alphanumeric character"
                .to_string(),
        );
    }
    None
}

/// A dependency on another package within a version range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredPackage {
    pub package_name: String,
    pub version_range: String,
}

impl RequiredPackage {
    /// # Errors
    ///
    /// Returns an error if the name is empty or the range does not parse.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.package_name.is_empty() {
            return Err(ValidationError::EmptyRequiredPackageName);
        }
        VersionRange::parse(&self.version_range).map_err(|source| {
            ValidationError::VersionRange {
                range: self.version_range.clone(),
                source,
            }
        })?;
        Ok(())
    }
}

/// An image referenced by a bundle besides its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedImage {
    pub name: String,
    pub image: String,
}
