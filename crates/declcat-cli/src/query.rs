//! Implementation of the `declcat query` command.

use anyhow::{Context, Result};
use clap::Subcommand;
use declcat::{CatalogQuery, Querier};
use serde_json::Value;
use std::io::Write;

use crate::catalog::{self, CatalogSource};

#[derive(Debug, Subcommand)]
pub enum QueryCommand {
    /// List package names
    Packages,

    /// List every bundle in every channel
    Bundles,

    /// Show a package and the heads of its channels
    Package {
        name: String,
    },

    /// Show one bundle of a channel
    Bundle {
        package: String,
        channel: String,
        bundle: String,
    },

    /// Show the head bundle of a channel
    Head {
        package: String,
        channel: String,
    },

    /// Show what upgrades from a bundle
    Replaces {
        /// Name of the bundle being replaced
        name: String,

        /// Return the replacing bundle in this package (requires --channel)
        #[arg(long, requires = "channel")]
        package: Option<String>,

        /// Return the replacing bundle in this channel (requires --package)
        #[arg(long, requires = "package")]
        channel: Option<String>,
    },

    /// Show what provides an API
    Provides {
        group: String,
        version: String,
        kind: String,

        /// Only the newest provider in each channel
        #[arg(long, conflicts_with = "bundle")]
        latest: bool,

        /// The single preferred providing bundle
        #[arg(long)]
        bundle: bool,
    },
}

/// Options for querying a catalog.
#[derive(Debug)]
pub struct QueryOptions {
    pub source: CatalogSource,
    pub query: QueryCommand,
}

/// Build the catalog, answer one query, and print the answer as JSON.
pub fn run_query<W: Write>(options: &QueryOptions, out: &mut W) -> Result<()> {
    let (_, model) = catalog::load_model(&options.source)?;
    let mut querier = Querier::new(model);
    if let Some(objects) = &options.source.objects {
        querier = querier
            .with_bundle_objects(objects)
            .with_context(|| format!("Failed to load bundle objects from {}", objects.display()))?;
    }

    let answer = answer(&querier, &options.query)?;
    serde_json::to_writer_pretty(&mut *out, &answer).context("Failed to encode result")?;
    writeln!(out)?;
    Ok(())
}

/// Run one query against `querier`.
pub fn answer(querier: &dyn CatalogQuery, query: &QueryCommand) -> Result<Value> {
    let value = match query {
        QueryCommand::Packages => serde_json::to_value(querier.list_packages()?)?,
        QueryCommand::Bundles => serde_json::to_value(querier.list_bundles()?)?,
        QueryCommand::Package { name } => serde_json::to_value(querier.get_package(name)?)?,
        QueryCommand::Bundle {
            package,
            channel,
            bundle,
        } => serde_json::to_value(querier.get_bundle(package, channel, bundle)?)?,
        QueryCommand::Head { package, channel } => {
            serde_json::to_value(querier.get_bundle_for_channel(package, channel)?)?
        }
        QueryCommand::Replaces {
            name,
            package: Some(package),
            channel: Some(channel),
        } => serde_json::to_value(querier.get_bundle_that_replaces(name, package, channel)?)?,
        QueryCommand::Replaces { name, .. } => {
            serde_json::to_value(querier.get_channel_entries_that_replace(name)?)?
        }
        QueryCommand::Provides {
            group,
            version,
            kind,
            latest,
            bundle,
        } => {
            if *bundle {
                serde_json::to_value(querier.get_bundle_that_provides(group, version, kind)?)?
            } else if *latest {
                serde_json::to_value(
                    querier.get_latest_channel_entries_that_provide(group, version, kind)?,
                )?
            } else {
                serde_json::to_value(querier.get_channel_entries_that_provide(group, version, kind)?)?
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use declcat::{declcfg, to_model, SourceFormat};
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const CATALOG: &str = r#"{"schema": "olm.package", "name": "etcd", "defaultChannel": "stable"}
{"schema": "olm.bundle", "name": "etcd.v0.9.0", "package": "etcd", "image": "etcd:v0.9.0", "properties": [
    {"type": "olm.package", "value": {"packageName": "etcd", "version": "0.9.0"}},
    {"type": "olm.gvk", "value": {"group": "etcd.database.coreos.com", "kind": "EtcdCluster", "version": "v1beta2"}},
    {"type": "olm.channel", "value": {"name": "stable"}}
]}
{"schema": "olm.bundle", "name": "etcd.v0.9.2", "package": "etcd", "image": "etcd:v0.9.2", "properties": [
    {"type": "olm.package", "value": {"packageName": "etcd", "version": "0.9.2"}},
    {"type": "olm.gvk", "value": {"group": "etcd.database.coreos.com", "kind": "EtcdCluster", "version": "v1beta2"}},
    {"type": "olm.channel", "value": {"name": "stable", "replaces": "etcd.v0.9.0"}}
]}
"#;

    fn querier(dir: &Path) -> Querier {
        fs::write(dir.join("etcd.json"), CATALOG).unwrap();
        let cfg = declcfg::load_dir(dir).unwrap();
        Querier::new(to_model(&cfg).unwrap())
    }

    fn provides(latest: bool, bundle: bool) -> QueryCommand {
        QueryCommand::Provides {
            group: "etcd.database.coreos.com".to_string(),
            version: "v1beta2".to_string(),
            kind: "EtcdCluster".to_string(),
            latest,
            bundle,
        }
    }

    #[test]
    fn test_answer_packages() {
        let dir = TempDir::new().unwrap();
        let querier = querier(dir.path());
        assert_eq!(answer(&querier, &QueryCommand::Packages).unwrap(), json!(["etcd"]));
    }

    #[test]
    fn test_answer_head_and_package() {
        let dir = TempDir::new().unwrap();
        let querier = querier(dir.path());

        let head = answer(
            &querier,
            &QueryCommand::Head {
                package: "etcd".to_string(),
                channel: "stable".to_string(),
            },
        )
        .unwrap();
        assert_eq!(head["csvName"], "etcd.v0.9.2");
        assert_eq!(head["replaces"], "etcd.v0.9.0");
        assert_eq!(head["bundlePath"], "etcd:v0.9.2");

        let package = answer(
            &querier,
            &QueryCommand::Package {
                name: "etcd".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            package,
            json!({
                "packageName": "etcd",
                "channels": [{"name": "stable", "currentCsvName": "etcd.v0.9.2"}],
                "defaultChannelName": "stable",
            })
        );
    }

    #[test]
    fn test_answer_replaces_both_forms() {
        let dir = TempDir::new().unwrap();
        let querier = querier(dir.path());

        let entries = answer(
            &querier,
            &QueryCommand::Replaces {
                name: "etcd.v0.9.0".to_string(),
                package: None,
                channel: None,
            },
        )
        .unwrap();
        assert_eq!(
            entries,
            json!([{
                "packageName": "etcd",
                "channelName": "stable",
                "bundleName": "etcd.v0.9.2",
                "replaces": "etcd.v0.9.0",
            }])
        );

        let bundle = answer(
            &querier,
            &QueryCommand::Replaces {
                name: "etcd.v0.9.0".to_string(),
                package: Some("etcd".to_string()),
                channel: Some("stable".to_string()),
            },
        )
        .unwrap();
        assert_eq!(bundle["csvName"], "etcd.v0.9.2");
    }

    #[test]
    fn test_answer_provides_modes() {
        let dir = TempDir::new().unwrap();
        let querier = querier(dir.path());

        let all = answer(&querier, &provides(false, false)).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);

        let latest = answer(&querier, &provides(true, false)).unwrap();
        assert_eq!(latest.as_array().unwrap().len(), 1);
        assert_eq!(latest[0]["bundleName"], "etcd.v0.9.2");

        let bundle = answer(&querier, &provides(false, true)).unwrap();
        assert_eq!(bundle["csvName"], "etcd.v0.9.2");
    }

    #[test]
    fn test_answer_not_found() {
        let dir = TempDir::new().unwrap();
        let querier = querier(dir.path());
        let err = answer(
            &querier,
            &QueryCommand::Package {
                name: "missing".to_string(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_run_query_prints_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("etcd.json"), CATALOG).unwrap();
        let options = QueryOptions {
            source: CatalogSource {
                path: dir.path().to_path_buf(),
                format: SourceFormat::Dir,
                objects: None,
            },
            query: QueryCommand::Packages,
        };

        let mut out = Vec::new();
        run_query(&options, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[\n  \"etcd\"\n]\n");
    }

    #[test]
    fn test_run_query_attaches_objects() {
        let dir = TempDir::new().unwrap();
        let catalog = dir.path().join("catalog");
        fs::create_dir_all(&catalog).unwrap();
        fs::write(catalog.join("etcd.json"), CATALOG).unwrap();
        let objects = dir.path().join("bundles/etcd/etcd.v0.9.2");
        fs::create_dir_all(&objects).unwrap();
        fs::write(objects.join("csv.json"), r#"{"kind": "ClusterServiceVersion"}"#).unwrap();

        let options = QueryOptions {
            source: CatalogSource {
                path: catalog,
                format: SourceFormat::Dir,
                objects: Some(dir.path().join("bundles")),
            },
            query: QueryCommand::Head {
                package: "etcd".to_string(),
                channel: "stable".to_string(),
            },
        };

        let mut out = Vec::new();
        run_query(&options, &mut out).unwrap();
        let head: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(head["csvJson"], r#"{"kind": "ClusterServiceVersion"}"#);
        assert_eq!(head["objects"].as_array().unwrap().len(), 1);
    }
}
