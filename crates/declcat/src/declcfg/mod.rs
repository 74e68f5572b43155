//! Declarative catalog documents.
//!
//! A catalog on disk is a stream of JSON documents, each tagged by its
//! `schema` field. Package and bundle documents are decoded; anything else is
//! kept verbatim as a [`Meta`] so it survives a load/write cycle.

mod convert;
mod load;
mod write;

pub use convert::{from_model, to_model, ConvertError};
pub use load::{load_dir, load_file, load_path, load_reader, load_source, load_tar, LoadError};
pub(crate) use load::is_csv;
pub use write::{write_dir, write_json, write_tar, WriteError};

use crate::model::RelatedImage;
use crate::property::{self, Property};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

pub const SCHEMA_PACKAGE: &str = "olm.package";
pub const SCHEMA_BUNDLE: &str = "olm.bundle";

/// Directory holding side-car objects: `objects/<package>/<bundle>/<file>`.
pub const OBJECTS_DIR: &str = "objects";
/// File stem for documents not attached to any package.
pub const GLOBAL_NAME: &str = "__global";
/// Top-level directory inside catalog archives.
pub const TAR_ROOT: &str = "index";

/// A loaded set of catalog documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclarativeConfig {
    pub packages: Vec<Package>,
    pub bundles: Vec<Bundle>,
    pub others: Vec<Meta>,
}

impl DeclarativeConfig {
    /// Append every document of `other`.
    pub fn merge(&mut self, other: Self) {
        self.packages.extend(other.packages);
        self.bundles.extend(other.bundles);
        self.others.extend(other.others);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.bundles.is_empty() && self.others.is_empty()
    }
}

/// A package document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Package {
    pub schema: String,
    pub name: String,
    pub default_channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Channel names the package allows; empty means unconstrained.
    #[serde(alias = "validChannelNames", skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

/// Package icon with base64-encoded data on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Icon {
    #[serde(rename = "base64data", with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "mediatype")]
    pub media_type: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A bundle document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Bundle {
    pub schema: String,
    pub name: String,
    pub package: String,
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_images: Vec<RelatedImage>,

    /// The attached object whose kind is `ClusterServiceVersion`.
    #[serde(skip)]
    pub csv_json: Option<String>,
    /// Side-car objects found under `objects/<package>/<bundle>/`.
    #[serde(skip)]
    pub objects: Vec<String>,
}

impl Bundle {
    /// The package this bundle belongs to.
    ///
    /// Uses the document's `package` field, falling back to the package
    /// identity property.
    #[must_use]
    pub fn package_name(&self) -> Option<String> {
        if !self.package.is_empty() {
            return Some(self.package.clone());
        }
        [property::TYPE_PACKAGE, property::TYPE_PACKAGE_PROVIDED]
            .iter()
            .find_map(|typ| {
                self.properties
                    .iter()
                    .filter(|p| p.typ == *typ)
                    .find_map(|p| p.decode::<property::Package>().ok())
            })
            .map(|p| p.package_name)
    }
}

/// A document of any other schema, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub schema: String,
    /// Owning package, or empty for catalog-wide documents.
    pub package: String,
    /// The document's raw JSON text.
    pub blob: String,
}

impl Meta {
    /// Read the `schema` and `package` fields of a raw document.
    ///
    /// # Errors
    ///
    /// Returns an error if `blob` is not a JSON object or the fields have the wrong type.
    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Head {
            #[serde(default)]
            schema: String,
            #[serde(default)]
            package: String,
        }

        let head: Head = serde_json::from_str(blob)?;
        Ok(Self {
            schema: head.schema,
            package: head.package,
            blob: blob.to_string(),
        })
    }
}

impl Serialize for Meta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: &RawValue = serde_json::from_str(&self.blob).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_document_fields() {
        let json = r#"{
            "schema": "olm.package",
            "name": "foo",
            "defaultChannel": "stable",
            "icon": {"base64data": "PHN2Zy8+", "mediatype": "image/svg+xml"},
            "description": "foo operator",
            "validChannelNames": ["stable", "beta"]
        }"#;
        let pkg: Package = serde_json::from_str(json).unwrap();
        assert_eq!(pkg.default_channel, "stable");
        assert_eq!(pkg.icon.as_ref().unwrap().data, b"<svg/>");
        assert_eq!(pkg.channels, vec!["stable", "beta"]);

        let out = serde_json::to_value(&pkg).unwrap();
        assert_eq!(out["icon"]["base64data"], "PHN2Zy8+");
        assert_eq!(out["channels"][1], "beta");
    }

    #[test]
    fn test_package_icon_fields_are_optional() {
        let pkg: Package =
            serde_json::from_str(r#"{"schema": "olm.package", "name": "foo", "icon": {}}"#).unwrap();
        assert_eq!(pkg.icon, Some(Icon::default()));

        let pkg: Package = serde_json::from_str(
            r#"{"schema": "olm.package", "name": "foo", "icon": {"mediatype": "image/png"}}"#,
        )
        .unwrap();
        let icon = pkg.icon.unwrap();
        assert!(icon.data.is_empty());
        assert_eq!(icon.media_type, "image/png");
    }

    #[test]
    fn test_bundle_document_omits_empty_fields() {
        let bundle = Bundle {
            schema: SCHEMA_BUNDLE.to_string(),
            name: "foo.v1".to_string(),
            package: "foo".to_string(),
            image: "foo-bundle:v1".to_string(),
            objects: vec!["{}".to_string()],
            ..Bundle::default()
        };
        assert_eq!(
            serde_json::to_string(&bundle).unwrap(),
            r#"{"schema":"olm.bundle","name":"foo.v1","package":"foo","image":"foo-bundle:v1"}"#
        );
    }

    #[test]
    fn test_bundle_package_name_fallback() {
        let mut bundle = Bundle {
            properties: vec![Property::new(
                property::TYPE_PACKAGE,
                r#"{"packageName":"foo","version":"1.0.0"}"#,
            )],
            ..Bundle::default()
        };
        assert_eq!(bundle.package_name().as_deref(), Some("foo"));

        bundle.package = "bar".to_string();
        assert_eq!(bundle.package_name().as_deref(), Some("bar"));

        assert_eq!(Bundle::default().package_name(), None);
    }

    #[test]
    fn test_meta_keeps_blob() {
        let blob = r#"{"schema": "custom.3", "package": "anakin", "myField": "foobar"}"#;
        let meta = Meta::from_blob(blob).unwrap();
        assert_eq!(meta.schema, "custom.3");
        assert_eq!(meta.package, "anakin");
        assert_eq!(serde_json::to_string(&meta).unwrap(), blob);
    }
}
