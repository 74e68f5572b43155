//! Read-only queries over a validated catalog graph.
//!
//! [`Querier`] answers package, channel, and bundle lookups plus the two
//! upgrade-related searches: which channel entries replace a bundle, and
//! which entries provide a given API.

use crate::declcfg::is_csv;
use crate::model::{Bundle, Channel, GroupVersionKind, HeadError, Model};
use crate::property::{self, Property, Scheme};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned by catalog queries.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("package \"{0}\" not found")]
    PackageNotFound(String),

    #[error("package \"{package}\", channel \"{channel}\" not found")]
    ChannelNotFound { package: String, channel: String },

    #[error("package \"{package}\", channel \"{channel}\", bundle \"{bundle}\" not found")]
    BundleNotFound {
        package: String,
        channel: String,
        bundle: String,
    },

    #[error("package \"{package}\", channel \"{channel}\" has invalid head: {source}")]
    InvalidHead {
        package: String,
        channel: String,
        #[source]
        source: HeadError,
    },

    #[error("no channel entries found that replace {0}")]
    NoReplacements(String),

    #[error("no entry found for package \"{package}\", channel \"{channel}\"")]
    NoEntry { package: String, channel: String },

    #[error("no channel entries found that provide group:\"{group}\" version:\"{version}\" kind:\"{kind}\"")]
    NoProviders {
        group: String,
        version: String,
        kind: String,
    },

    #[error("no entry found that provides group:\"{group}\" version:\"{version}\" kind:\"{kind}\"")]
    NoProvidingBundle {
        group: String,
        version: String,
        kind: String,
    },

    #[error("more than one ClusterServiceVersion is found in bundle \"{bundle}\"")]
    MultipleCsv { bundle: String },
}

/// A bundle as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleView {
    pub csv_name: String,
    pub package_name: String,
    pub channel_name: String,
    /// The bundle image.
    pub bundle_path: String,
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub skip_range: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub replaces: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skips: Vec<String>,
    pub provided_apis: Vec<GroupVersionKind>,
    pub required_apis: Vec<GroupVersionKind>,
    pub dependencies: Vec<Dependency>,
    pub properties: Vec<Property>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_json: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
}

/// A bundle requirement in client form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    #[serde(rename = "type")]
    pub typ: String,
    /// Raw JSON text.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageView {
    pub package_name: String,
    pub channels: Vec<PackageChannel>,
    pub default_channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageChannel {
    pub name: String,
    /// Name of the channel's head bundle.
    pub current_csv_name: String,
}

/// One upgrade edge: `bundle_name` in the given channel replaces `replaces`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub package_name: String,
    pub channel_name: String,
    pub bundle_name: String,
    pub replaces: String,
}

/// The query surface offered to catalog clients.
///
/// Implementations hold an immutable graph, so every method may be called
/// concurrently from multiple threads.
pub trait CatalogQuery: Send + Sync {
    /// Names of every package, sorted.
    fn list_packages(&self) -> Result<Vec<String>, QueryError>;

    /// Every bundle, once per channel it belongs to.
    fn list_bundles(&self) -> Result<Vec<BundleView>, QueryError>;

    fn get_package(&self, name: &str) -> Result<PackageView, QueryError>;

    fn get_bundle(&self, package: &str, channel: &str, bundle: &str) -> Result<BundleView, QueryError>;

    /// The head bundle of a channel.
    fn get_bundle_for_channel(&self, package: &str, channel: &str) -> Result<BundleView, QueryError>;

    /// Every channel entry that upgrades from the bundle named `name`.
    fn get_channel_entries_that_replace(&self, name: &str) -> Result<Vec<ChannelEntry>, QueryError>;

    /// The first bundle in the given channel that replaces or skips `name`.
    fn get_bundle_that_replaces(
        &self,
        name: &str,
        package: &str,
        channel: &str,
    ) -> Result<BundleView, QueryError>;

    /// Entries for every bundle in any channel that provides the API.
    fn get_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<ChannelEntry>, QueryError>;

    /// Entries for the newest provider of the API in each channel.
    fn get_latest_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<ChannelEntry>, QueryError>;

    /// The newest provider of the API in the first package's default channel.
    fn get_bundle_that_provides(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<BundleView, QueryError>;
}

#[derive(Debug, Clone, Default)]
struct BundleObjects {
    csv_json: Option<String>,
    objects: Vec<String>,
}

/// Answers [`CatalogQuery`] calls from an in-memory [`Model`].
#[derive(Debug, Clone)]
pub struct Querier {
    model: Model,
    scheme: Scheme,
    /// Objects loaded from an unpacked bundle tree, keyed by bundle name.
    objects: HashMap<String, BundleObjects>,
}

impl Querier {
    #[must_use]
    pub fn new(model: Model) -> Self {
        Self::with_scheme(model, Scheme::default())
    }

    /// Create a querier that encodes view properties with `scheme`.
    #[must_use]
    pub fn with_scheme(model: Model, scheme: Scheme) -> Self {
        Self {
            model,
            scheme,
            objects: HashMap::new(),
        }
    }

    /// Attach objects read from `<dir>/<package>/<bundle>/`.
    ///
    /// A missing bundle directory means the bundle has no objects. Files that
    /// cannot be read or are not JSON objects are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MultipleCsv`] if a bundle directory holds more
    /// than one `ClusterServiceVersion`.
    pub fn with_bundle_objects(mut self, dir: &Path) -> Result<Self, QueryError> {
        let mut loaded = HashMap::new();
        for bundle in self.model.bundles() {
            if loaded.contains_key(&bundle.name) {
                continue;
            }
            let path = dir.join(&bundle.package).join(&bundle.name);
            let objects = load_bundle_objects(&bundle.name, &path)?;
            loaded.insert(bundle.name.clone(), objects);
        }
        tracing::debug!(dir = %dir.display(), bundles = loaded.len(), "loaded bundle objects");
        self.objects = loaded;
        Ok(self)
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn package(&self, name: &str) -> Result<&crate::model::Package, QueryError> {
        self.model
            .get(name)
            .ok_or_else(|| QueryError::PackageNotFound(name.to_string()))
    }

    fn channel(&self, package: &str, channel: &str) -> Result<&Channel, QueryError> {
        self.package(package)?
            .channels
            .get(channel)
            .ok_or_else(|| QueryError::ChannelNotFound {
                package: package.to_string(),
                channel: channel.to_string(),
            })
    }

    fn bundle_view(&self, bundle: &Bundle) -> BundleView {
        let (csv_json, objects) = match self.objects.get(&bundle.name) {
            Some(loaded) => (loaded.csv_json.clone(), loaded.objects.clone()),
            None => (bundle.csv_json.clone(), bundle.objects.clone()),
        };

        let mut properties = Vec::with_capacity(bundle.properties.len());
        let mut dependencies = Vec::new();
        for prop in &bundle.properties {
            match prop.typ.as_str() {
                property::TYPE_GVK | property::TYPE_GVK_PROVIDED => {
                    properties.push(Property::new(prop.typ.clone(), self.without_plural(prop)));
                }
                property::TYPE_GVK_REQUIRED => {
                    let value = self.without_plural(prop);
                    dependencies.push(Dependency {
                        typ: property::TYPE_GVK.to_string(),
                        value: value.clone(),
                    });
                    properties.push(Property::new(prop.typ.clone(), value));
                }
                property::TYPE_PACKAGE_REQUIRED => {
                    dependencies.push(Dependency {
                        typ: property::TYPE_PACKAGE.to_string(),
                        value: prop.value.clone(),
                    });
                    properties.push(prop.clone());
                }
                _ => properties.push(prop.clone()),
            }
        }

        BundleView {
            csv_name: bundle.name.clone(),
            package_name: bundle.package.clone(),
            channel_name: bundle.channel.clone(),
            bundle_path: bundle.image.clone(),
            version: bundle.version.clone(),
            skip_range: bundle.skip_range.clone().unwrap_or_default(),
            replaces: bundle.replaces.clone().unwrap_or_default(),
            skips: bundle.skips.clone(),
            provided_apis: bundle.provided_apis.clone(),
            required_apis: bundle.required_apis.clone(),
            dependencies,
            properties,
            csv_json,
            objects,
        }
    }

    /// Re-encode a capability value as `olm.gvk` without its plural name.
    ///
    /// Values that do not decode are returned unchanged.
    fn without_plural(&self, prop: &Property) -> String {
        let Ok(gvk) = prop.decode::<property::Gvk>() else {
            return prop.value.clone();
        };
        self.scheme
            .build_gvk(&gvk.group, &gvk.version, &gvk.kind, "")
            .map_or_else(|_| prop.value.clone(), |p| p.value)
    }

    fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.model.packages.values().flat_map(|p| p.channels.values())
    }
}

fn channel_head(channel: &Channel) -> Result<&Bundle, QueryError> {
    channel.head().map_err(|source| QueryError::InvalidHead {
        package: channel.package.clone(),
        channel: channel.name.clone(),
        source,
    })
}

fn load_bundle_objects(bundle: &str, dir: &Path) -> Result<BundleObjects, QueryError> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(BundleObjects::default());
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut loaded = BundleObjects::default();
    for path in paths {
        let Ok(text) = fs::read_to_string(&path) else {
            tracing::debug!(path = %path.display(), "skipping unreadable object");
            continue;
        };
        if serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text).is_err() {
            tracing::debug!(path = %path.display(), "skipping object that is not a JSON object");
            continue;
        }
        if is_csv(&text) {
            if loaded.csv_json.is_some() {
                return Err(QueryError::MultipleCsv {
                    bundle: bundle.to_string(),
                });
            }
            loaded.csv_json = Some(text.clone());
        }
        loaded.objects.push(text);
    }
    Ok(loaded)
}

/// Entries for a bundle in its channel: one for `replaces`, one per skip.
fn channel_entries_for_bundle(bundle: &Bundle) -> Vec<ChannelEntry> {
    let replaces = bundle.replaces.clone().unwrap_or_default();
    let entry = |replaces: &str| ChannelEntry {
        package_name: bundle.package.clone(),
        channel_name: bundle.channel.clone(),
        bundle_name: bundle.name.clone(),
        replaces: replaces.to_string(),
    };
    let mut entries = vec![entry(&replaces)];
    entries.extend(
        bundle
            .skips
            .iter()
            .filter(|skip| **skip != replaces)
            .map(|skip| entry(skip)),
    );
    entries
}

/// Like [`channel_entries_for_bundle`], keeping only skips present in `channel`.
fn latest_channel_entries_for_bundle(bundle: &Bundle, channel: &Channel) -> Vec<ChannelEntry> {
    let mut entries = channel_entries_for_bundle(bundle);
    let replaces = bundle.replaces.as_deref().unwrap_or_default();
    entries.retain(|e| e.replaces == replaces || channel.bundles.contains_key(&e.replaces));
    entries
}

impl CatalogQuery for Querier {
    fn list_packages(&self) -> Result<Vec<String>, QueryError> {
        Ok(self.model.packages.keys().cloned().collect())
    }

    fn list_bundles(&self) -> Result<Vec<BundleView>, QueryError> {
        Ok(self.model.bundles().map(|b| self.bundle_view(b)).collect())
    }

    fn get_package(&self, name: &str) -> Result<PackageView, QueryError> {
        let package = self.package(name)?;
        let mut channels = Vec::with_capacity(package.channels.len());
        for channel in package.channels.values() {
            let head = channel_head(channel)?;
            channels.push(PackageChannel {
                name: channel.name.clone(),
                current_csv_name: head.name.clone(),
            });
        }
        Ok(PackageView {
            package_name: package.name.clone(),
            channels,
            default_channel_name: package.default_channel.clone(),
        })
    }

    fn get_bundle(&self, package: &str, channel: &str, bundle: &str) -> Result<BundleView, QueryError> {
        let found = self
            .channel(package, channel)?
            .bundles
            .get(bundle)
            .ok_or_else(|| QueryError::BundleNotFound {
                package: package.to_string(),
                channel: channel.to_string(),
                bundle: bundle.to_string(),
            })?;
        Ok(self.bundle_view(found))
    }

    fn get_bundle_for_channel(&self, package: &str, channel: &str) -> Result<BundleView, QueryError> {
        let head = channel_head(self.channel(package, channel)?)?;
        Ok(self.bundle_view(head))
    }

    fn get_channel_entries_that_replace(&self, name: &str) -> Result<Vec<ChannelEntry>, QueryError> {
        let mut entries = Vec::new();
        for bundle in self.model.bundles() {
            let replaces = bundle.replaces.clone().unwrap_or_default();
            let entry = || ChannelEntry {
                package_name: bundle.package.clone(),
                channel_name: bundle.channel.clone(),
                bundle_name: bundle.name.clone(),
                replaces: replaces.clone(),
            };
            if replaces == name {
                entries.push(entry());
            }
            for skip in &bundle.skips {
                if skip == name && *skip != replaces {
                    entries.push(entry());
                }
            }
        }
        if entries.is_empty() {
            return Err(QueryError::NoReplacements(name.to_string()));
        }
        Ok(entries)
    }

    fn get_bundle_that_replaces(
        &self,
        name: &str,
        package: &str,
        channel: &str,
    ) -> Result<BundleView, QueryError> {
        self.channel(package, channel)?
            .bundles
            .values()
            .find(|b| b.replaces.as_deref() == Some(name) || b.skips.iter().any(|s| s == name))
            .map(|b| self.bundle_view(b))
            .ok_or_else(|| QueryError::NoEntry {
                package: package.to_string(),
                channel: channel.to_string(),
            })
    }

    fn get_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<ChannelEntry>, QueryError> {
        let entries: Vec<ChannelEntry> = self
            .model
            .bundles()
            .filter(|b| b.provides(group, version, kind))
            .flat_map(channel_entries_for_bundle)
            .collect();
        if entries.is_empty() {
            return Err(no_providers(group, version, kind));
        }
        Ok(entries)
    }

    fn get_latest_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<ChannelEntry>, QueryError> {
        let mut entries = Vec::new();
        for channel in self.channels() {
            let mut visited: HashSet<&str> = HashSet::new();
            let mut current = Some(channel_head(channel)?);
            while let Some(bundle) = current {
                if !visited.insert(&bundle.name) {
                    break;
                }
                if bundle.provides(group, version, kind) {
                    entries.extend(latest_channel_entries_for_bundle(bundle, channel));
                    break;
                }
                current = bundle
                    .replaces
                    .as_ref()
                    .and_then(|r| channel.bundles.get(r));
            }
        }
        if entries.is_empty() {
            return Err(no_providers(group, version, kind));
        }
        Ok(entries)
    }

    fn get_bundle_that_provides(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<BundleView, QueryError> {
        let mut entries = match self.get_latest_channel_entries_that_provide(group, version, kind) {
            Err(QueryError::NoProviders { .. }) => Vec::new(),
            other => other?,
        };
        entries.sort_by(|a, b| a.package_name.cmp(&b.package_name));

        for entry in &entries {
            let Some(package) = self.model.get(&entry.package_name) else {
                continue;
            };
            if entry.channel_name == package.default_channel {
                return self.get_bundle(&entry.package_name, &entry.channel_name, &entry.bundle_name);
            }
        }
        Err(QueryError::NoProvidingBundle {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        })
    }
}

fn no_providers(group: &str, version: &str, kind: &str) -> QueryError {
    QueryError::NoProviders {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
    }
}
