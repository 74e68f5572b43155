//! Typed catalog properties.
//!
//! Every catalog fact is carried as a `(type, value)` pair where the value is
//! an opaque JSON document. [`parse`] decodes a property list into typed
//! buckets, and [`Scheme::build`] encodes a typed value back into a property
//! using an explicit registry of known shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::any::{type_name, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

pub const TYPE_PACKAGE: &str = "olm.package";
pub const TYPE_PACKAGE_PROVIDED: &str = "olm.package.provided";
pub const TYPE_PACKAGE_REQUIRED: &str = "olm.package.required";
pub const TYPE_CHANNEL: &str = "olm.channel";
pub const TYPE_GVK: &str = "olm.gvk";
pub const TYPE_GVK_PROVIDED: &str = "olm.gvk.provided";
pub const TYPE_GVK_REQUIRED: &str = "olm.gvk.required";
pub const TYPE_SKIPS: &str = "olm.skips";
pub const TYPE_SKIP_RANGE: &str = "olm.skipRange";
pub const TYPE_CSV_ANNOTATIONS: &str = "olm.csv.annotations";
pub const TYPE_CSV_DESCRIPTION: &str = "olm.csv.description";
pub const TYPE_CSV_DISPLAY_NAME: &str = "olm.csv.displayName";
pub const TYPE_CSV_INSTALL_MODE: &str = "olm.csv.installMode";
pub const TYPE_CSV_KEYWORD: &str = "olm.csv.keyword";
pub const TYPE_CSV_LINK: &str = "olm.csv.link";
pub const TYPE_CSV_MAINTAINER: &str = "olm.csv.maintainer";
pub const TYPE_CSV_MATURITY: &str = "olm.csv.maturity";
pub const TYPE_CSV_MIN_KUBE_VERSION: &str = "olm.csv.minKubeVersion";
pub const TYPE_CSV_PROVIDER: &str = "olm.csv.provider";
pub const TYPE_OBJECT: &str = "olm.object";

/// Errors that can occur when encoding, decoding, or validating properties.
#[derive(Error, Debug)]
pub enum PropertyError {
    #[error("type must be set")]
    MissingType,

    #[error("value must be set")]
    MissingValue,

    #[error("value is not valid json: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A value did not decode into the shape its declared type requires.
    #[error("properties[{index}].value parse error for \"{typ}\": {source}")]
    Parse {
        index: usize,
        typ: String,
        #[source]
        source: serde_json::Error,
    },

    /// `build` was called with a shape the scheme does not know.
    #[error("{shape} is not a registered property type")]
    UnregisteredShape { shape: &'static str },

    #[error("scheme already contains a registration for {shape} (as \"{typ}\")")]
    DuplicateRegistration { shape: &'static str, typ: String },

    #[error("failed to encode property value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("property type \"{0}\" is required")]
    Required(&'static str),

    #[error("property \"{typ}\" with value {value} has no matching \"{counterpart}\" property")]
    MatchMissing {
        typ: &'static str,
        value: String,
        counterpart: &'static str,
    },
}

/// A single `(type, value)` catalog fact.
///
/// `value` holds the raw JSON text exactly as it was read, so properties
/// round-trip without reformatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    pub typ: String,
    pub value: String,
}

impl Property {
    /// Create a property from a type and raw JSON text.
    pub fn new(typ: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            value: value.into(),
        }
    }

    /// Check that the type and value are set and the value is valid JSON.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first failed check.
    pub fn validate(&self) -> Result<(), PropertyError> {
        if self.typ.is_empty() {
            return Err(PropertyError::MissingType);
        }
        if self.value.is_empty() {
            return Err(PropertyError::MissingValue);
        }
        serde_json::from_str::<&RawValue>(&self.value).map_err(PropertyError::InvalidJson)?;
        Ok(())
    }

    /// Decode the value into a concrete shape.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if the value does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.value)
    }
}

impl Serialize for Property {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "type")]
            typ: &'a str,
            value: &'a RawValue,
        }

        let value: &RawValue =
            serde_json::from_str(&self.value).map_err(serde::ser::Error::custom)?;
        Wire {
            typ: &self.typ,
            value,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Property {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "type", default)]
            typ: String,
            #[serde(default)]
            value: Option<Box<RawValue>>,
        }

        let wire = Wire::deserialize(deserializer)?;
        Ok(Self {
            typ: wire.typ,
            value: wire.value.map(|v| v.get().to_string()).unwrap_or_default(),
        })
    }
}

/// Package identity (`olm.package`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_name: String,
    pub version: String,
}

/// Legacy package identity (`olm.package.provided`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageProvided {
    pub package_name: String,
    pub version: String,
}

/// Dependency on another package (`olm.package.required`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRequired {
    pub package_name: String,
    pub version_range: String,
}

/// Channel membership (`olm.channel`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
}

/// Provided capability (`olm.gvk`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub kind: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plural: String,
}

/// Legacy provided capability (`olm.gvk.provided`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GvkProvided {
    pub group: String,
    pub kind: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plural: String,
}

/// Required capability (`olm.gvk.required`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GvkRequired {
    pub group: String,
    pub kind: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plural: String,
}

/// A bundle name superseded without being the direct replacement (`olm.skips`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Skips(pub String);

/// A version range of superseded releases (`olm.skipRange`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipRange(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvAnnotations(pub BTreeMap<String, String>);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvDescription(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvDisplayName(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsvInstallMode {
    #[serde(rename = "type")]
    pub mode: String,
    pub supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvKeyword(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CsvLink {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CsvMaintainer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvMaturity(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvMinKubeVersion(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CsvProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// An embedded manifest fragment (`olm.object`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(pub serde_json::Value);

/// A property list decoded into one bucket per known type.
///
/// `all` keeps every input property in order; `others` keeps the ones whose
/// type is not part of the vocabulary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub packages: Vec<Package>,
    pub packages_provided: Vec<PackageProvided>,
    pub packages_required: Vec<PackageRequired>,
    pub channels: Vec<Channel>,
    pub gvks: Vec<Gvk>,
    pub gvks_provided: Vec<GvkProvided>,
    pub gvks_required: Vec<GvkRequired>,
    pub skips: Vec<Skips>,
    pub skip_ranges: Vec<SkipRange>,
    pub csv_annotations: Vec<CsvAnnotations>,
    pub csv_descriptions: Vec<CsvDescription>,
    pub csv_display_names: Vec<CsvDisplayName>,
    pub csv_install_modes: Vec<CsvInstallMode>,
    pub csv_keywords: Vec<CsvKeyword>,
    pub csv_links: Vec<CsvLink>,
    pub csv_maintainers: Vec<CsvMaintainer>,
    pub csv_maturities: Vec<CsvMaturity>,
    pub csv_min_kube_versions: Vec<CsvMinKubeVersion>,
    pub csv_providers: Vec<CsvProvider>,
    pub objects: Vec<Object>,

    pub all: Vec<Property>,
    pub others: Vec<Property>,
}

fn decode_at<T: DeserializeOwned>(index: usize, prop: &Property) -> Result<T, PropertyError> {
    prop.decode().map_err(|source| PropertyError::Parse {
        index,
        typ: prop.typ.clone(),
        source,
    })
}

/// Decode a property list into typed buckets.
///
/// # Errors
///
/// Returns [`PropertyError::Parse`] naming the list index and declared type of
/// the first value that does not decode into its shape. Values of unknown
/// types must still be valid JSON.
pub fn parse(props: &[Property]) -> Result<Properties, PropertyError> {
    let mut out = Properties::default();
    for (index, prop) in props.iter().enumerate() {
        out.all.push(prop.clone());
        match prop.typ.as_str() {
            TYPE_PACKAGE => out.packages.push(decode_at(index, prop)?),
            TYPE_PACKAGE_PROVIDED => out.packages_provided.push(decode_at(index, prop)?),
            TYPE_PACKAGE_REQUIRED => out.packages_required.push(decode_at(index, prop)?),
            TYPE_CHANNEL => out.channels.push(decode_at(index, prop)?),
            TYPE_GVK => out.gvks.push(decode_at(index, prop)?),
            TYPE_GVK_PROVIDED => out.gvks_provided.push(decode_at(index, prop)?),
            TYPE_GVK_REQUIRED => out.gvks_required.push(decode_at(index, prop)?),
            TYPE_SKIPS => out.skips.push(decode_at(index, prop)?),
            TYPE_SKIP_RANGE => out.skip_ranges.push(decode_at(index, prop)?),
            TYPE_CSV_ANNOTATIONS => out.csv_annotations.push(decode_at(index, prop)?),
            TYPE_CSV_DESCRIPTION => out.csv_descriptions.push(decode_at(index, prop)?),
            TYPE_CSV_DISPLAY_NAME => out.csv_display_names.push(decode_at(index, prop)?),
            TYPE_CSV_INSTALL_MODE => out.csv_install_modes.push(decode_at(index, prop)?),
            TYPE_CSV_KEYWORD => out.csv_keywords.push(decode_at(index, prop)?),
            TYPE_CSV_LINK => out.csv_links.push(decode_at(index, prop)?),
            TYPE_CSV_MAINTAINER => out.csv_maintainers.push(decode_at(index, prop)?),
            TYPE_CSV_MATURITY => out.csv_maturities.push(decode_at(index, prop)?),
            TYPE_CSV_MIN_KUBE_VERSION => out.csv_min_kube_versions.push(decode_at(index, prop)?),
            TYPE_CSV_PROVIDER => out.csv_providers.push(decode_at(index, prop)?),
            TYPE_OBJECT => out.objects.push(decode_at(index, prop)?),
            _ => {
                decode_at::<serde_json::Value>(index, prop)?;
                out.others.push(prop.clone());
            }
        }
    }
    Ok(out)
}

/// Drop every property whose `(type, value)` pair already appeared earlier.
///
/// First-seen order is preserved.
pub fn deduplicate(props: &[Property]) -> Vec<Property> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    props
        .iter()
        .filter(|p| seen.insert((p.typ.as_str(), p.value.as_str())))
        .cloned()
        .collect()
}

/// Check that legacy and current identity/capability properties mirror each other.
///
/// A bundle written for older consumers carries exactly one
/// `olm.package.provided` matching its `olm.package`, and an
/// `olm.gvk.provided` for every `olm.gvk` (plural ignored).
///
/// # Errors
///
/// Returns the first property with no counterpart.
pub fn validate_back_compat(props: &Properties) -> Result<(), PropertyError> {
    if props.packages_provided.len() != 1 {
        return Err(PropertyError::Required(TYPE_PACKAGE_PROVIDED));
    }

    let packages: HashSet<(&str, &str)> = props
        .packages
        .iter()
        .map(|p| (p.package_name.as_str(), p.version.as_str()))
        .collect();
    let packages_provided: HashSet<(&str, &str)> = props
        .packages_provided
        .iter()
        .map(|p| (p.package_name.as_str(), p.version.as_str()))
        .collect();
    let gvks: HashSet<(&str, &str, &str)> = props
        .gvks
        .iter()
        .map(|g| (g.group.as_str(), g.kind.as_str(), g.version.as_str()))
        .collect();
    let gvks_provided: HashSet<(&str, &str, &str)> = props
        .gvks_provided
        .iter()
        .map(|g| (g.group.as_str(), g.kind.as_str(), g.version.as_str()))
        .collect();

    let missing = |typ, value: String, counterpart| PropertyError::MatchMissing {
        typ,
        value,
        counterpart,
    };

    if let Some(p) = packages.difference(&packages_provided).next() {
        return Err(missing(TYPE_PACKAGE, format!("{p:?}"), TYPE_PACKAGE_PROVIDED));
    }
    if let Some(p) = packages_provided.difference(&packages).next() {
        return Err(missing(TYPE_PACKAGE_PROVIDED, format!("{p:?}"), TYPE_PACKAGE));
    }
    if let Some(g) = gvks.difference(&gvks_provided).next() {
        return Err(missing(TYPE_GVK, format!("{g:?}"), TYPE_GVK_PROVIDED));
    }
    if let Some(g) = gvks_provided.difference(&gvks).next() {
        return Err(missing(TYPE_GVK_PROVIDED, format!("{g:?}"), TYPE_GVK));
    }
    Ok(())
}

/// Registry of the concrete shapes that [`Scheme::build`] knows how to encode.
///
/// `Scheme::default()` holds the standard vocabulary. Applications add their
/// own shapes with [`Scheme::register`] before handing the scheme to the
/// builders that need it.
#[derive(Debug, Clone)]
pub struct Scheme {
    types: HashMap<TypeId, (&'static str, String)>,
}

impl Scheme {
    /// An empty scheme with no registered shapes.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    fn insert<T: 'static>(&mut self, typ: &str) {
        self.types
            .insert(TypeId::of::<T>(), (type_name::<T>(), typ.to_string()));
    }

    /// Register `T` as the shape for property type `typ`.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::DuplicateRegistration`] if `T` is already registered.
    pub fn register<T: Serialize + 'static>(
        &mut self,
        typ: impl Into<String>,
    ) -> Result<(), PropertyError> {
        if let Some((shape, existing)) = self.types.get(&TypeId::of::<T>()) {
            return Err(PropertyError::DuplicateRegistration {
                shape: *shape,
                typ: existing.clone(),
            });
        }
        self.insert::<T>(&typ.into());
        Ok(())
    }

    /// The property type registered for `T`, if any.
    #[must_use]
    pub fn type_of<T: 'static>(&self) -> Option<&str> {
        self.types
            .get(&TypeId::of::<T>())
            .map(|(_, typ)| typ.as_str())
    }

    /// Encode `value` as a property of its registered type.
    ///
    /// The value is written as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::UnregisteredShape`] if `T` was never
    /// registered, or [`PropertyError::Encode`] if serialization fails.
    pub fn build<T: Serialize + 'static>(&self, value: &T) -> Result<Property, PropertyError> {
        let typ = self
            .type_of::<T>()
            .ok_or(PropertyError::UnregisteredShape {
                shape: type_name::<T>(),
            })?;
        let value = serde_json::to_string(value).map_err(PropertyError::Encode)?;
        Ok(Property::new(typ, value))
    }

    pub fn build_package(&self, name: &str, version: &str) -> Result<Property, PropertyError> {
        self.build(&Package {
            package_name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn build_package_required(
        &self,
        name: &str,
        version_range: &str,
    ) -> Result<Property, PropertyError> {
        self.build(&PackageRequired {
            package_name: name.to_string(),
            version_range: version_range.to_string(),
        })
    }

    pub fn build_channel(&self, name: &str, replaces: &str) -> Result<Property, PropertyError> {
        self.build(&Channel {
            name: name.to_string(),
            replaces: replaces.to_string(),
        })
    }

    pub fn build_gvk(
        &self,
        group: &str,
        version: &str,
        kind: &str,
        plural: &str,
    ) -> Result<Property, PropertyError> {
        self.build(&Gvk {
            group: group.to_string(),
            kind: kind.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
        })
    }

    pub fn build_gvk_required(
        &self,
        group: &str,
        version: &str,
        kind: &str,
        plural: &str,
    ) -> Result<Property, PropertyError> {
        self.build(&GvkRequired {
            group: group.to_string(),
            kind: kind.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
        })
    }

    pub fn build_skips(&self, name: &str) -> Result<Property, PropertyError> {
        self.build(&Skips(name.to_string()))
    }

    pub fn build_skip_range(&self, range: &str) -> Result<Property, PropertyError> {
        self.build(&SkipRange(range.to_string()))
    }
}

impl Default for Scheme {
    fn default() -> Self {
        let mut scheme = Self::empty();
        scheme.insert::<Package>(TYPE_PACKAGE);
        scheme.insert::<PackageProvided>(TYPE_PACKAGE_PROVIDED);
        scheme.insert::<PackageRequired>(TYPE_PACKAGE_REQUIRED);
        scheme.insert::<Channel>(TYPE_CHANNEL);
        scheme.insert::<Gvk>(TYPE_GVK);
        scheme.insert::<GvkProvided>(TYPE_GVK_PROVIDED);
        scheme.insert::<GvkRequired>(TYPE_GVK_REQUIRED);
        scheme.insert::<Skips>(TYPE_SKIPS);
        scheme.insert::<SkipRange>(TYPE_SKIP_RANGE);
        scheme.insert::<CsvAnnotations>(TYPE_CSV_ANNOTATIONS);
        scheme.insert::<CsvDescription>(TYPE_CSV_DESCRIPTION);
        scheme.insert::<CsvDisplayName>(TYPE_CSV_DISPLAY_NAME);
        scheme.insert::<CsvInstallMode>(TYPE_CSV_INSTALL_MODE);
        scheme.insert::<CsvKeyword>(TYPE_CSV_KEYWORD);
        scheme.insert::<CsvLink>(TYPE_CSV_LINK);
        scheme.insert::<CsvMaintainer>(TYPE_CSV_MAINTAINER);
        scheme.insert::<CsvMaturity>(TYPE_CSV_MATURITY);
        scheme.insert::<CsvMinKubeVersion>(TYPE_CSV_MIN_KUBE_VERSION);
        scheme.insert::<CsvProvider>(TYPE_CSV_PROVIDER);
        scheme.insert::<Object>(TYPE_OBJECT);
        scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_uses_compact_json_without_html_escaping() {
        let scheme = Scheme::default();
        let prop = scheme.build_package_required("a<b>&c", ">=1.0.0 <2.0.0").unwrap();
        assert_eq!(prop.typ, TYPE_PACKAGE_REQUIRED);
        assert_eq!(
            prop.value,
            r#"{"packageName":"a<b>&c","versionRange":">=1.0.0 <2.0.0"}"#
        );
    }

    #[test]
    fn build_channel_omits_empty_replaces() {
        let scheme = Scheme::default();
        assert_eq!(
            scheme.build_channel("stable", "").unwrap().value,
            r#"{"name":"stable"}"#
        );
        assert_eq!(
            scheme.build_channel("stable", "foo.v1").unwrap().value,
            r#"{"name":"stable","replaces":"foo.v1"}"#
        );
    }

    #[test]
    fn build_gvk_field_order() {
        let scheme = Scheme::default();
        let prop = scheme.build_gvk("etcd.database.coreos.com", "v1", "EtcdCluster", "").unwrap();
        assert_eq!(
            prop.value,
            r#"{"group":"etcd.database.coreos.com","kind":"EtcdCluster","version":"v1"}"#
        );
    }

    #[test]
    fn build_unregistered_shape_fails() {
        #[derive(Serialize)]
        struct Custom {
            answer: u32,
        }

        let scheme = Scheme::default();
        let err = scheme.build(&Custom { answer: 42 }).unwrap_err();
        assert!(matches!(err, PropertyError::UnregisteredShape { .. }));
    }

    #[test]
    fn register_custom_shape() {
        #[derive(Serialize)]
        struct Custom {
            answer: u32,
        }

        let mut scheme = Scheme::default();
        scheme.register::<Custom>("example.custom").unwrap();
        let prop = scheme.build(&Custom { answer: 42 }).unwrap();
        assert_eq!(prop, Property::new("example.custom", r#"{"answer":42}"#));

        let err = scheme.register::<Custom>("example.other").unwrap_err();
        assert!(matches!(err, PropertyError::DuplicateRegistration { .. }));
    }

    #[test]
    fn empty_scheme_knows_nothing() {
        let scheme = Scheme::empty();
        assert!(scheme.type_of::<Package>().is_none());
        assert!(scheme.build_package("foo", "1.0.0").is_err());
    }

    #[test]
    fn parse_build_fidelity() {
        let scheme = Scheme::default();
        let props = vec![
            scheme.build_package("foo", "1.0.0").unwrap(),
            scheme
                .build(&PackageProvided {
                    package_name: "foo".to_string(),
                    version: "1.0.0".to_string(),
                })
                .unwrap(),
            scheme.build_package_required("bar", ">=1.0.0").unwrap(),
            scheme.build_channel("stable", "foo.v0.9.0").unwrap(),
            scheme.build_gvk("example.com", "v1", "Widget", "widgets").unwrap(),
            scheme.build_gvk_required("example.com", "v1", "Gadget", "").unwrap(),
            scheme.build_skips("foo.v0.8.0").unwrap(),
            scheme.build_skip_range("<0.9.0").unwrap(),
            scheme
                .build(&CsvInstallMode {
                    mode: "OwnNamespace".to_string(),
                    supported: true,
                })
                .unwrap(),
            scheme
                .build(&CsvMaintainer {
                    name: "Jane".to_string(),
                    email: String::new(),
                })
                .unwrap(),
            scheme
                .build(&Object(serde_json::json!({"kind": "ConfigMap"})))
                .unwrap(),
        ];

        let parsed = parse(&props).unwrap();
        assert_eq!(parsed.all, props);
        assert!(parsed.others.is_empty());
        assert_eq!(
            parsed.packages,
            vec![Package {
                package_name: "foo".to_string(),
                version: "1.0.0".to_string()
            }]
        );
        assert_eq!(parsed.packages_provided.len(), 1);
        assert_eq!(parsed.packages_required[0].version_range, ">=1.0.0");
        assert_eq!(
            parsed.channels,
            vec![Channel {
                name: "stable".to_string(),
                replaces: "foo.v0.9.0".to_string()
            }]
        );
        assert_eq!(parsed.gvks[0].plural, "widgets");
        assert_eq!(parsed.gvks_required[0].kind, "Gadget");
        assert_eq!(parsed.skips, vec![Skips("foo.v0.8.0".to_string())]);
        assert_eq!(parsed.skip_ranges, vec![SkipRange("<0.9.0".to_string())]);
        assert!(parsed.csv_install_modes[0].supported);
        assert_eq!(parsed.csv_maintainers[0].name, "Jane");
        assert_eq!(parsed.objects[0].0["kind"], "ConfigMap");
    }

    #[test]
    fn parse_unknown_types_go_to_others() {
        let props = vec![
            Property::new("example.custom", r#"{"a":1}"#),
            Property::new(TYPE_SKIPS, r#""foo.v1""#),
        ];
        let parsed = parse(&props).unwrap();
        assert_eq!(parsed.others, vec![props[0].clone()]);
        assert_eq!(parsed.all.len(), 2);
    }

    #[test]
    fn parse_error_names_index_and_type() {
        let props = vec![
            Property::new(TYPE_SKIPS, r#""foo.v1""#),
            Property::new(TYPE_CHANNEL, r#"{"name": 42}"#),
        ];
        let err = parse(&props).unwrap_err();
        match &err {
            PropertyError::Parse { index, typ, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(typ, TYPE_CHANNEL);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err
            .to_string()
            .starts_with("properties[1].value parse error for \"olm.channel\""));
    }

    #[test]
    fn parse_rejects_invalid_json_in_unknown_type() {
        let props = vec![Property::new("example.custom", "{not json")];
        assert!(matches!(
            parse(&props),
            Err(PropertyError::Parse { index: 0, .. })
        ));
    }

    #[test]
    fn deduplicate_keeps_first_occurrence() {
        let a = Property::new(TYPE_SKIPS, r#""a""#);
        let b = Property::new(TYPE_SKIPS, r#""b""#);
        let c = Property::new(TYPE_CHANNEL, r#"{"name":"stable"}"#);
        let out = deduplicate(&[a.clone(), b.clone(), a.clone(), c.clone(), b.clone()]);
        assert_eq!(out, vec![a, b, c]);
    }

    #[test]
    fn deduplicate_compares_raw_values() {
        let a = Property::new(TYPE_SKIPS, r#""a""#);
        let spaced = Property::new(TYPE_SKIPS, r#" "a" "#);
        assert_eq!(deduplicate(&[a, spaced]).len(), 2);
    }

    #[test]
    fn validate_property() {
        assert!(Property::new(TYPE_SKIPS, r#""a""#).validate().is_ok());
        assert!(matches!(
            Property::new("", r#""a""#).validate(),
            Err(PropertyError::MissingType)
        ));
        assert!(matches!(
            Property::new(TYPE_SKIPS, "").validate(),
            Err(PropertyError::MissingValue)
        ));
        assert!(matches!(
            Property::new(TYPE_SKIPS, "{").validate(),
            Err(PropertyError::InvalidJson(_))
        ));
    }

    #[test]
    fn serde_preserves_raw_value() {
        let json = r#"{"type":"example.custom","value":{"b": 2, "a": [1, 2]}}"#;
        let prop: Property = serde_json::from_str(json).unwrap();
        assert_eq!(prop.typ, "example.custom");
        assert_eq!(prop.value, r#"{"b": 2, "a": [1, 2]}"#);
        assert_eq!(serde_json::to_string(&prop).unwrap(), json);
    }

    #[test]
    fn serde_missing_value_is_empty() {
        let prop: Property = serde_json::from_str(r#"{"type":"olm.skips"}"#).unwrap();
        assert!(prop.value.is_empty());
        assert!(prop.validate().is_err());
    }

    #[test]
    fn back_compat_requires_matching_pairs() {
        let scheme = Scheme::default();
        let provided = scheme
            .build(&PackageProvided {
                package_name: "foo".to_string(),
                version: "1.0.0".to_string(),
            })
            .unwrap();
        let gvk_provided = scheme
            .build(&GvkProvided {
                group: "example.com".to_string(),
                kind: "Widget".to_string(),
                version: "v1".to_string(),
                plural: String::new(),
            })
            .unwrap();

        let good = parse(&[
            scheme.build_package("foo", "1.0.0").unwrap(),
            provided.clone(),
            scheme.build_gvk("example.com", "v1", "Widget", "widgets").unwrap(),
            gvk_provided,
        ])
        .unwrap();
        assert!(validate_back_compat(&good).is_ok());

        let missing_gvk = parse(&[
            scheme.build_package("foo", "1.0.0").unwrap(),
            provided,
            scheme.build_gvk("example.com", "v1", "Widget", "").unwrap(),
        ])
        .unwrap();
        assert!(matches!(
            validate_back_compat(&missing_gvk),
            Err(PropertyError::MatchMissing {
                typ: TYPE_GVK,
                ..
            })
        ));

        let no_provided = parse(&[scheme.build_package("foo", "1.0.0").unwrap()]).unwrap();
        assert!(matches!(
            validate_back_compat(&no_provided),
            Err(PropertyError::Required(TYPE_PACKAGE_PROVIDED))
        ));
    }
}
