//! Shared catalog fixture for unit tests.
//!
//! Two packages:
//!
//! ```text
//! anakin     light: v0.0.1 <- v0.1.0
//!            dark:  v0.0.1 <- v0.1.0
//!                   v0.0.1 <- v0.1.1 (skips v0.1.0)
//! boba-fett  mando: v1.0.0 <- v2.0.0
//! ```

use crate::declcfg::{self, DeclarativeConfig, Meta, SCHEMA_BUNDLE, SCHEMA_PACKAGE};
use crate::model::{Bundle, Channel, Icon, Model, Package, RelatedImage};
use crate::property::{PackageProvided, Property, Scheme};

pub const CSV_OBJECT: &str =
    r#"{"kind": "ClusterServiceVersion", "apiVersion": "operators.coreos.com/v1alpha1"}"#;
pub const CRD_OBJECT: &str =
    r#"{"kind": "CustomResourceDefinition", "apiVersion": "apiextensions.k8s.io/v1"}"#;

const SMALL_CIRCLE: &str = r#"<svg viewBox="0 0 100 100"><circle cx="25" cy="25" r="25"/></svg>"#;
const BIG_CIRCLE: &str = r#"<svg viewBox="0 0 100 100"><circle cx="50" cy="50" r="50"/></svg>"#;
const SVG: &str = "image/svg+xml";

struct Fixture {
    package: &'static str,
    version: &'static str,
    /// (channel, replaces) in channel-name order.
    channels: &'static [(&'static str, &'static str)],
    skips: &'static [&'static str],
}

const BUNDLES: &[Fixture] = &[
    Fixture {
        package: "anakin",
        version: "0.0.1",
        channels: &[("dark", ""), ("light", "")],
        skips: &[],
    },
    Fixture {
        package: "anakin",
        version: "0.1.0",
        channels: &[("dark", "anakin.v0.0.1"), ("light", "anakin.v0.0.1")],
        skips: &[],
    },
    Fixture {
        package: "anakin",
        version: "0.1.1",
        channels: &[("dark", "anakin.v0.0.1")],
        skips: &["anakin.v0.1.0"],
    },
    Fixture {
        package: "boba-fett",
        version: "1.0.0",
        channels: &[("mando", "")],
        skips: &[],
    },
    Fixture {
        package: "boba-fett",
        version: "2.0.0",
        channels: &[("mando", "boba-fett.v1.0.0")],
        skips: &[],
    },
];

impl Fixture {
    fn name(&self) -> String {
        format!("{}.v{}", self.package, self.version)
    }

    fn image(&self) -> String {
        format!("{}-bundle:v{}", self.package, self.version)
    }

    /// Properties in the order the graph builder regenerates them.
    fn properties(&self) -> Vec<Property> {
        let scheme = Scheme::default();
        let mut props = vec![scheme.build_package(self.package, self.version).unwrap()];
        props.extend(self.skips.iter().map(|s| scheme.build_skips(s).unwrap()));
        props.push(
            scheme
                .build(&PackageProvided {
                    package_name: self.package.to_string(),
                    version: self.version.to_string(),
                })
                .unwrap(),
        );
        props.extend(
            self.channels
                .iter()
                .map(|(ch, replaces)| scheme.build_channel(ch, replaces).unwrap()),
        );
        props
    }

    fn related_images(&self) -> Vec<RelatedImage> {
        vec![RelatedImage {
            name: "bundle".to_string(),
            image: self.image(),
        }]
    }

    fn objects() -> Vec<String> {
        vec![CSV_OBJECT.to_string(), CRD_OBJECT.to_string()]
    }
}

fn icon(svg: &str) -> Icon {
    Icon {
        data: svg.as_bytes().to_vec(),
        media_type: SVG.to_string(),
    }
}

fn package(name: &str, default_channel: &str, svg: &str) -> Package {
    Package {
        name: name.to_string(),
        description: format!("{name} operator"),
        icon: Some(icon(svg)),
        default_channel: default_channel.to_string(),
        ..Package::default()
    }
}

/// The fixture as a validated graph.
pub fn scenario_model() -> Model {
    let mut model = Model::new();
    model.insert(package("anakin", "dark", SMALL_CIRCLE));
    model.insert(package("boba-fett", "mando", BIG_CIRCLE));

    for fixture in BUNDLES {
        let pkg = model.packages.get_mut(fixture.package).unwrap();
        for (ch, replaces) in fixture.channels {
            let channel = pkg
                .channels
                .entry((*ch).to_string())
                .or_insert_with(|| Channel::new(fixture.package, *ch));
            let bundle = Bundle {
                package: fixture.package.to_string(),
                channel: (*ch).to_string(),
                name: fixture.name(),
                version: fixture.version.to_string(),
                image: fixture.image(),
                replaces: Some((*replaces).to_string()).filter(|r| !r.is_empty()),
                skips: fixture.skips.iter().map(|s| (*s).to_string()).collect(),
                properties: fixture.properties(),
                related_images: fixture.related_images(),
                csv_json: Some(CSV_OBJECT.to_string()),
                objects: Fixture::objects(),
                ..Bundle::default()
            };
            channel.bundles.insert(bundle.name.clone(), bundle);
        }
    }
    model
}

/// The fixture as loaded documents, including side-car objects and
/// documents of other schemas.
pub fn scenario_config() -> DeclarativeConfig {
    let package_doc = |name: &str, default_channel: &str, svg: &str| declcfg::Package {
        schema: SCHEMA_PACKAGE.to_string(),
        name: name.to_string(),
        default_channel: default_channel.to_string(),
        icon: Some(declcfg::Icon {
            data: svg.as_bytes().to_vec(),
            media_type: SVG.to_string(),
        }),
        description: format!("{name} operator"),
        channels: Vec::new(),
    };

    let bundles = BUNDLES
        .iter()
        .map(|fixture| declcfg::Bundle {
            schema: SCHEMA_BUNDLE.to_string(),
            name: fixture.name(),
            package: fixture.package.to_string(),
            image: fixture.image(),
            version: String::new(),
            properties: fixture.properties(),
            related_images: fixture.related_images(),
            csv_json: Some(CSV_OBJECT.to_string()),
            objects: Fixture::objects(),
        })
        .collect();

    let others = [
        r#"{"schema": "custom.1"}"#,
        r#"{"schema": "custom.2"}"#,
        r#"{"schema": "custom.3", "package": "anakin", "myField": "foobar"}"#,
        r#"{"schema": "custom.3", "package": "boba-fett", "myField": "foobar"}"#,
    ]
    .iter()
    .map(|blob| Meta::from_blob(blob).unwrap())
    .collect();

    DeclarativeConfig {
        packages: vec![
            package_doc("anakin", "dark", SMALL_CIRCLE),
            package_doc("boba-fett", "mando", BIG_CIRCLE),
        ],
        bundles,
        others,
    }
}
