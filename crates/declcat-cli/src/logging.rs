//! Log output for the CLI.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// Install a stderr subscriber.
///
/// The filter comes from the `--log-level` flag, then the config file, then
/// `RUST_LOG`, then `info`.
pub fn init(flag: Option<&str>, config: Option<&str>) -> Result<()> {
    let filter = filter(flag, config, std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
}

fn directive<'a>(flag: Option<&'a str>, config: Option<&'a str>, env: Option<&'a str>) -> &'a str {
    flag.or(config)
        .or(env.filter(|e| !e.trim().is_empty()))
        .unwrap_or(DEFAULT_LEVEL)
}

fn filter(flag: Option<&str>, config: Option<&str>, env: Option<&str>) -> Result<EnvFilter> {
    let directive = directive(flag, config, env);
    EnvFilter::try_new(directive).with_context(|| format!("Invalid log level `{directive}`"))
}
