//! Conversion between catalog documents and the validated graph.

use super::{Bundle, DeclarativeConfig, Icon, Package, SCHEMA_BUNDLE, SCHEMA_PACKAGE};
use crate::model::{self, CsvMetadata, GroupVersionKind, Model, RequiredPackage, ValidationError};
use crate::property::{self, Properties, Property, PropertyError, Scheme};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur while converting between documents and the graph.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("duplicate package \"{0}\"")]
    DuplicatePackage(String),

    #[error("parse properties for bundle \"{bundle}\": {source}")]
    Properties {
        bundle: String,
        #[source]
        source: PropertyError,
    },

    #[error("bundle \"{bundle}\": properties[{index}]: multiple properties of type \"{typ}\" not allowed")]
    MultipleNotAllowed {
        bundle: String,
        index: usize,
        typ: String,
    },

    #[error("bundle \"{bundle}\": required property \"{typ}\" not found")]
    MissingProperty { bundle: String, typ: &'static str },

    #[error("package name must be set for bundle \"{0}\"")]
    MissingPackageName(String),

    #[error("bundle \"{bundle}\" declares package \"{declared}\" but its identity names \"{package}\"")]
    PackageMismatch {
        bundle: String,
        declared: String,
        package: String,
    },

    #[error("bundle \"{bundle}\" declares version \"{declared}\" but its identity names \"{version}\"")]
    VersionMismatch {
        bundle: String,
        declared: String,
        version: String,
    },

    #[error("unknown package \"{package}\" for bundle \"{bundle}\"")]
    UnknownPackage { package: String, bundle: String },

    #[error("duplicate bundle \"{bundle}\" in package \"{package}\"")]
    DuplicateBundle { package: String, bundle: String },

    #[error("invalid channel \"{channel}\" for bundle \"{bundle}\": package \"{package}\" does not list it")]
    UnknownChannel {
        package: String,
        channel: String,
        bundle: String,
    },

    #[error("bundle \"{bundle}\" is a member of channel \"{channel}\" more than once")]
    DuplicateChannel { bundle: String, channel: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("build properties for bundle \"{bundle}\": {source}")]
    Build {
        bundle: String,
        #[source]
        source: PropertyError,
    },
}

/// Property types that may appear at most once per bundle, besides the identity.
const SINGLETONS: &[&str] = &[
    property::TYPE_SKIP_RANGE,
    property::TYPE_CSV_DESCRIPTION,
    property::TYPE_CSV_DISPLAY_NAME,
    property::TYPE_CSV_MATURITY,
    property::TYPE_CSV_MIN_KUBE_VERSION,
    property::TYPE_CSV_PROVIDER,
];

/// Property types that [`from_model`] regenerates from graph fields.
///
/// The legacy `olm.package.provided` and `olm.gvk.provided` types are not in
/// this list and pass through unchanged.
const DERIVED: &[&str] = &[
    property::TYPE_PACKAGE,
    property::TYPE_PACKAGE_REQUIRED,
    property::TYPE_CHANNEL,
    property::TYPE_GVK,
    property::TYPE_GVK_REQUIRED,
    property::TYPE_SKIPS,
    property::TYPE_SKIP_RANGE,
    property::TYPE_CSV_ANNOTATIONS,
    property::TYPE_CSV_DESCRIPTION,
    property::TYPE_CSV_DISPLAY_NAME,
    property::TYPE_CSV_INSTALL_MODE,
    property::TYPE_CSV_KEYWORD,
    property::TYPE_CSV_LINK,
    property::TYPE_CSV_MAINTAINER,
    property::TYPE_CSV_MATURITY,
    property::TYPE_CSV_MIN_KUBE_VERSION,
    property::TYPE_CSV_PROVIDER,
];

/// Build and validate the graph described by `cfg`.
///
/// A bundle is placed in every channel named by its `olm.channel`
/// properties. Channels are created on first use; a package's default
/// channel is created empty if no bundle names it, which then fails
/// validation. Documents of other schemas are ignored.
///
/// # Errors
///
/// Returns an error for malformed or contradictory bundle properties, for
/// references to unknown packages or channels, and for any graph validation
/// failure.
pub fn to_model(cfg: &DeclarativeConfig) -> Result<Model, ConvertError> {
    let mut model = Model::new();
    let mut allowed_channels: HashMap<&str, HashSet<&str>> = HashMap::new();

    for package in &cfg.packages {
        if model.packages.contains_key(&package.name) {
            return Err(ConvertError::DuplicatePackage(package.name.clone()));
        }
        if !package.channels.is_empty() {
            allowed_channels.insert(
                &package.name,
                package.channels.iter().map(String::as_str).collect(),
            );
        }
        model.insert(model::Package {
            name: package.name.clone(),
            description: package.description.clone(),
            icon: package.icon.as_ref().map(|icon| model::Icon {
                data: icon.data.clone(),
                media_type: icon.media_type.clone(),
            }),
            default_channel: package.default_channel.clone(),
            channels: BTreeMap::new(),
        });
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    for doc in &cfg.bundles {
        let props = parse_properties(doc)?;
        let template = bundle_template(doc, &props)?;
        let package_name = template.package.clone();
        let package = model
            .packages
            .get_mut(&package_name)
            .ok_or_else(|| ConvertError::UnknownPackage {
                package: package_name.clone(),
                bundle: doc.name.clone(),
            })?;
        if !seen.insert((package_name.clone(), doc.name.clone())) {
            return Err(ConvertError::DuplicateBundle {
                package: package_name,
                bundle: doc.name.clone(),
            });
        }

        if props.channels.is_empty() {
            tracing::warn!(bundle = %doc.name, package = %package_name, "bundle is not a member of any channel");
        }

        let mut memberships: HashSet<&str> = HashSet::new();
        for membership in &props.channels {
            if !memberships.insert(&membership.name) {
                return Err(ConvertError::DuplicateChannel {
                    bundle: doc.name.clone(),
                    channel: membership.name.clone(),
                });
            }
            if let Some(allowed) = allowed_channels.get(package_name.as_str()) {
                if !allowed.contains(membership.name.as_str()) {
                    return Err(ConvertError::UnknownChannel {
                        package: package_name,
                        channel: membership.name.clone(),
                        bundle: doc.name.clone(),
                    });
                }
            }

            let channel = package
                .channels
                .entry(membership.name.clone())
                .or_insert_with(|| model::Channel::new(package_name.clone(), membership.name.clone()));
            let mut bundle = template.clone();
            bundle.channel = membership.name.clone();
            bundle.replaces = Some(membership.replaces.clone()).filter(|r| !r.is_empty());
            channel.bundles.insert(bundle.name.clone(), bundle);
        }
    }

    for package in model.packages.values_mut() {
        if !package.default_channel.is_empty() && !package.channels.contains_key(&package.default_channel) {
            let channel = model::Channel::new(package.name.clone(), package.default_channel.clone());
            package.channels.insert(channel.name.clone(), channel);
        }
    }

    model.validate()?;
    tracing::debug!(
        packages = model.packages.len(),
        bundles = cfg.bundles.len(),
        "built catalog model"
    );
    Ok(model)
}

fn parse_properties(doc: &Bundle) -> Result<Properties, ConvertError> {
    property::parse(&doc.properties).map_err(|source| ConvertError::Properties {
        bundle: doc.name.clone(),
        source,
    })
}

/// Reject a second occurrence of the identity type or any singleton type.
fn check_singletons(doc: &Bundle, identity: &str) -> Result<(), ConvertError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for (index, prop) in doc.properties.iter().enumerate() {
        let typ = prop.typ.as_str();
        if (typ == identity || SINGLETONS.contains(&typ)) && !seen.insert(typ) {
            return Err(ConvertError::MultipleNotAllowed {
                bundle: doc.name.clone(),
                index,
                typ: typ.to_string(),
            });
        }
    }
    Ok(())
}

/// Decode everything about a bundle except its channel placement.
fn bundle_template(doc: &Bundle, props: &Properties) -> Result<model::Bundle, ConvertError> {
    let (identity_type, identity) = if let Some(p) = props.packages.first() {
        (property::TYPE_PACKAGE, p.clone())
    } else if let Some(p) = props.packages_provided.first() {
        (
            property::TYPE_PACKAGE_PROVIDED,
            property::Package {
                package_name: p.package_name.clone(),
                version: p.version.clone(),
            },
        )
    } else {
        return Err(ConvertError::MissingProperty {
            bundle: doc.name.clone(),
            typ: property::TYPE_PACKAGE,
        });
    };
    check_singletons(doc, identity_type)?;

    if identity.package_name.is_empty() {
        return Err(ConvertError::MissingPackageName(doc.name.clone()));
    }
    if !doc.package.is_empty() && doc.package != identity.package_name {
        return Err(ConvertError::PackageMismatch {
            bundle: doc.name.clone(),
            declared: doc.package.clone(),
            package: identity.package_name,
        });
    }
    if !doc.version.is_empty() && doc.version != identity.version {
        return Err(ConvertError::VersionMismatch {
            bundle: doc.name.clone(),
            declared: doc.version.clone(),
            version: identity.version,
        });
    }

    let mut provided_apis: Vec<GroupVersionKind> = Vec::new();
    let provided = props
        .gvks
        .iter()
        .map(|g| (&g.group, &g.version, &g.kind, &g.plural))
        .chain(
            props
                .gvks_provided
                .iter()
                .map(|g| (&g.group, &g.version, &g.kind, &g.plural)),
        );
    for (group, version, kind, plural) in provided {
        let gvk = GroupVersionKind {
            group: group.clone(),
            version: version.clone(),
            kind: kind.clone(),
            plural: plural.clone(),
        };
        if !provided_apis.iter().any(|api| api.same_api(&gvk)) {
            provided_apis.push(gvk);
        }
    }

    Ok(model::Bundle {
        package: identity.package_name,
        channel: String::new(),
        name: doc.name.clone(),
        version: identity.version,
        image: doc.image.clone(),
        replaces: None,
        skips: props.skips.iter().map(|s| s.0.clone()).collect(),
        skip_range: props.skip_ranges.first().map(|r| r.0.clone()),
        properties: doc.properties.clone(),
        provided_apis,
        required_apis: props
            .gvks_required
            .iter()
            .map(|g| GroupVersionKind {
                group: g.group.clone(),
                version: g.version.clone(),
                kind: g.kind.clone(),
                plural: g.plural.clone(),
            })
            .collect(),
        required_packages: props
            .packages_required
            .iter()
            .map(|p| RequiredPackage {
                package_name: p.package_name.clone(),
                version_range: p.version_range.clone(),
            })
            .collect(),
        related_images: doc.related_images.clone(),
        csv: csv_metadata(props),
        csv_json: doc.csv_json.clone(),
        objects: doc.objects.clone(),
    })
}

fn csv_metadata(props: &Properties) -> Option<CsvMetadata> {
    let present = !props.csv_annotations.is_empty()
        || !props.csv_descriptions.is_empty()
        || !props.csv_display_names.is_empty()
        || !props.csv_install_modes.is_empty()
        || !props.csv_keywords.is_empty()
        || !props.csv_links.is_empty()
        || !props.csv_maintainers.is_empty()
        || !props.csv_maturities.is_empty()
        || !props.csv_min_kube_versions.is_empty()
        || !props.csv_providers.is_empty();
    if !present {
        return None;
    }

    Some(CsvMetadata {
        annotations: props
            .csv_annotations
            .iter()
            .flat_map(|a| a.0.clone())
            .collect(),
        description: props
            .csv_descriptions
            .first()
            .map(|d| d.0.clone())
            .unwrap_or_default(),
        display_name: props
            .csv_display_names
            .first()
            .map(|d| d.0.clone())
            .unwrap_or_default(),
        install_modes: props.csv_install_modes.clone(),
        keywords: props.csv_keywords.iter().map(|k| k.0.clone()).collect(),
        links: props.csv_links.clone(),
        maintainers: props.csv_maintainers.clone(),
        maturity: props
            .csv_maturities
            .first()
            .map(|m| m.0.clone())
            .unwrap_or_default(),
        min_kube_version: props
            .csv_min_kube_versions
            .first()
            .map(|m| m.0.clone())
            .unwrap_or_default(),
        provider: props.csv_providers.first().cloned(),
    })
}

/// Render the graph back into documents.
///
/// Packages and bundles come out sorted by name. A bundle that sits in
/// several channels becomes one document carrying one `olm.channel` per
/// channel. Properties are regenerated from graph fields in a fixed order,
/// followed by the bundle's remaining properties, then channel memberships.
///
/// # Errors
///
/// Returns [`ConvertError::Build`] if `scheme` cannot encode a standard shape.
pub fn from_model(model: &Model, scheme: &Scheme) -> Result<DeclarativeConfig, ConvertError> {
    let mut cfg = DeclarativeConfig::default();
    let mut bundles: BTreeMap<(String, String), Bundle> = BTreeMap::new();

    for package in model.packages.values() {
        cfg.packages.push(Package {
            schema: SCHEMA_PACKAGE.to_string(),
            name: package.name.clone(),
            default_channel: package.default_channel.clone(),
            icon: package.icon.as_ref().map(|icon| Icon {
                data: icon.data.clone(),
                media_type: icon.media_type.clone(),
            }),
            description: package.description.clone(),
            channels: Vec::new(),
        });

        for channel in package.channels.values() {
            for bundle in channel.bundles.values() {
                let build_error = |source| ConvertError::Build {
                    bundle: bundle.name.clone(),
                    source,
                };
                let key = (package.name.clone(), bundle.name.clone());
                if !bundles.contains_key(&key) {
                    let doc = Bundle {
                        schema: SCHEMA_BUNDLE.to_string(),
                        name: bundle.name.clone(),
                        package: package.name.clone(),
                        image: bundle.image.clone(),
                        version: String::new(),
                        properties: global_properties(bundle, scheme).map_err(build_error)?,
                        related_images: bundle.related_images.clone(),
                        csv_json: bundle.csv_json.clone(),
                        objects: bundle.objects.clone(),
                    };
                    bundles.insert(key.clone(), doc);
                }
                let membership = scheme
                    .build_channel(&channel.name, bundle.replaces.as_deref().unwrap_or_default())
                    .map_err(build_error)?;
                if let Some(doc) = bundles.get_mut(&key) {
                    doc.properties.push(membership);
                }
            }
        }
    }

    cfg.bundles = bundles
        .into_values()
        .map(|mut doc| {
            doc.properties = property::deduplicate(&doc.properties);
            doc
        })
        .collect();
    Ok(cfg)
}

/// Properties shared by every channel placement of a bundle.
///
/// The identity and provided APIs are only regenerated under their current
/// types when the bundle did not declare them solely through the legacy
/// aliases, which pass through unchanged.
fn global_properties(bundle: &model::Bundle, scheme: &Scheme) -> Result<Vec<Property>, PropertyError> {
    let declares = |typ: &str| bundle.properties.iter().any(|p| p.typ == typ);
    let mut props = Vec::new();
    if declares(property::TYPE_PACKAGE) || !declares(property::TYPE_PACKAGE_PROVIDED) {
        props.push(scheme.build_package(&bundle.package, &bundle.version)?);
    }
    for required in &bundle.required_packages {
        props.push(scheme.build_package_required(&required.package_name, &required.version_range)?);
    }
    for api in &bundle.provided_apis {
        if declares_api(bundle, property::TYPE_GVK_PROVIDED, api) && !declares_api(bundle, property::TYPE_GVK, api) {
            continue;
        }
        props.push(scheme.build_gvk(&api.group, &api.version, &api.kind, &api.plural)?);
    }
    for api in &bundle.required_apis {
        props.push(scheme.build_gvk_required(&api.group, &api.version, &api.kind, &api.plural)?);
    }
    for skip in &bundle.skips {
        props.push(scheme.build_skips(skip)?);
    }
    if let Some(range) = &bundle.skip_range {
        props.push(scheme.build_skip_range(range)?);
    }
    if let Some(csv) = &bundle.csv {
        props.extend(csv_properties(csv, scheme)?);
    }
    props.extend(
        bundle
            .properties
            .iter()
            .filter(|p| !DERIVED.contains(&p.typ.as_str()))
            .cloned(),
    );
    Ok(props)
}

/// Returns true if one of the bundle's `typ` properties names `api`.
fn declares_api(bundle: &model::Bundle, typ: &str, api: &GroupVersionKind) -> bool {
    bundle
        .properties
        .iter()
        .filter(|p| p.typ == typ)
        .filter_map(|p| p.decode::<property::Gvk>().ok())
        .any(|g| g.group == api.group && g.version == api.version && g.kind == api.kind)
}

fn csv_properties(csv: &CsvMetadata, scheme: &Scheme) -> Result<Vec<Property>, PropertyError> {
    let mut props = Vec::new();
    if !csv.annotations.is_empty() {
        props.push(scheme.build(&property::CsvAnnotations(csv.annotations.clone()))?);
    }
    if !csv.description.is_empty() {
        props.push(scheme.build(&property::CsvDescription(csv.description.clone()))?);
    }
    if !csv.display_name.is_empty() {
        props.push(scheme.build(&property::CsvDisplayName(csv.display_name.clone()))?);
    }
    for mode in &csv.install_modes {
        props.push(scheme.build(mode)?);
    }
    for keyword in &csv.keywords {
        props.push(scheme.build(&property::CsvKeyword(keyword.clone()))?);
    }
    for link in &csv.links {
        props.push(scheme.build(link)?);
    }
    for maintainer in &csv.maintainers {
        props.push(scheme.build(maintainer)?);
    }
    if !csv.maturity.is_empty() {
        props.push(scheme.build(&property::CsvMaturity(csv.maturity.clone()))?);
    }
    if !csv.min_kube_version.is_empty() {
        props.push(scheme.build(&property::CsvMinKubeVersion(csv.min_kube_version.clone()))?);
    }
    if let Some(provider) = &csv.provider {
        props.push(scheme.build(provider)?);
    }
    Ok(props)
}
