//! declcat CLI - Command-line interface for declarative package catalogs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod catalog;
mod logging;
mod query;
mod render;
mod validate;

#[derive(Parser)]
#[command(name = "declcat")]
#[command(version)]
#[command(about = "Validate, render, and query declarative package catalogs", long_about = None)]
struct Cli {
    /// Path to a declcat.toml (defaults to ./declcat.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error, or off
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a catalog and check that it forms a valid upgrade graph
    Validate {
        /// Catalog directory, document file, or tar archive
        path: Option<PathBuf>,
    },

    /// Rebuild a catalog from its graph and write it out in canonical form
    Render {
        /// Catalog directory, document file, or tar archive
        path: Option<PathBuf>,

        /// Output directory or archive (prints documents to stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Output layout (inferred from the output name if omitted)
        #[arg(long, value_enum, requires = "output")]
        format: Option<render::OutputFormat>,
    },

    /// Query a catalog and print the result as JSON
    Query {
        /// Catalog directory, document file, or tar archive
        #[arg(long)]
        source: Option<PathBuf>,

        /// Unpacked bundle tree laid out as <package>/<bundle>/<file>
        #[arg(long)]
        objects: Option<PathBuf>,

        #[command(subcommand)]
        query: query::QueryCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = catalog::load_config(cli.config.as_deref())?;
    logging::init(
        cli.log_level.as_deref(),
        config.as_ref().map(|c| c.log.level.as_str()),
    )?;

    match cli.command {
        Commands::Validate { path } => {
            let source = catalog::resolve(path, None, config.as_ref())?;
            let summary = validate::validate_catalog(&validate::ValidateOptions { source })?;
            summary.print();
        }

        Commands::Render {
            path,
            output,
            format,
        } => {
            let source = catalog::resolve(path, None, config.as_ref())?;
            let options = render::RenderOptions {
                source,
                output,
                format,
            };
            render::render_catalog(&options, &mut std::io::stdout().lock())?;
        }

        Commands::Query {
            source,
            objects,
            query,
        } => {
            let source = catalog::resolve(source, objects, config.as_ref())?;
            let options = query::QueryOptions { source, query };
            query::run_query(&options, &mut std::io::stdout().lock())?;
        }
    }

    Ok(())
}
