//! Implementation of the `declcat validate` command.

use anyhow::Result;

use crate::catalog::{self, CatalogSource};

/// Options for validating a catalog.
#[derive(Debug)]
pub struct ValidateOptions {
    pub source: CatalogSource,
}

/// Counts describing a valid catalog.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidateSummary {
    pub packages: usize,
    pub channels: usize,
    /// Distinct bundles, counted once even when in several channels.
    pub bundles: usize,
    pub other_documents: usize,
}

impl ValidateSummary {
    pub fn print(&self) {
        println!(
            "Catalog is valid: {} package(s), {} channel(s), {} bundle(s), {} other document(s)",
            self.packages, self.channels, self.bundles, self.other_documents
        );
    }
}

/// Load the catalog, build its graph, and validate it.
pub fn validate_catalog(options: &ValidateOptions) -> Result<ValidateSummary> {
    let (cfg, model) = catalog::load_model(&options.source)?;
    let mut names: Vec<(&str, &str)> = model
        .bundles()
        .map(|b| (b.package.as_str(), b.name.as_str()))
        .collect();
    names.sort_unstable();
    names.dedup();

    let summary = ValidateSummary {
        packages: model.packages.len(),
        channels: model.packages.values().map(|p| p.channels.len()).sum(),
        bundles: names.len(),
        other_documents: cfg.others.len(),
    };
    tracing::debug!(?summary, "catalog validated");
    Ok(summary)
}
