mod alias;
mod artifact;
mod batch;
mod config;
mod consolidate;
mod dimension;
mod error;
mod pool;
mod record;
mod reference;
mod run;
mod stream;
mod summarize;
mod table;

use std::path::PathBuf;

use clap::Parser;
use eyre::eyre;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::alias::NameAliases;
use crate::config::RunConfig;
use crate::dimension::Dimension;
use crate::error::ConfigError;
use crate::reference::{Crs, GeoJsonProvider};
use crate::stream::RecordStream;

/// Counts geolocated track points per county, country and activity.
///
/// Reads GeoJSON point features, one per line, in batches. Each batch is
/// summarized into its own count tables in the output directory, which are
/// then merged into one `combined_*` table per dimension. Re-running skips
/// every table that already exists.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// JSONL files with one GeoJSON feature per line, `.gz` files are
    /// decompressed. Reads stdin when none are given.
    inputs: Vec<PathBuf>,

    /// Number of features per batch
    #[clap(long, env = "TRACK_COUNTS_BATCH_SIZE", default_value_t = 500_000)]
    batch_size: usize,

    /// Directory the count tables are written to
    #[clap(long, env = "TRACK_COUNTS_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Number of parallel workers, 0 or 1 processes batches one after the other
    #[clap(long, env = "TRACK_COUNTS_WORKERS", default_value_t = 8)]
    workers: usize,

    /// Coordinate reference system of the features and reference datasets
    #[clap(long, env = "TRACK_COUNTS_CRS", default_value = "EPSG:4269")]
    crs: String,

    /// Recompute batch tables even if they already exist
    #[clap(long)]
    recompute: bool,

    /// Only merge existing batch tables
    #[clap(long)]
    skip_batch_phase: bool,

    /// Dimensions to count
    #[clap(
        long,
        use_value_delimiter = true,
        default_value = "region,country,activity"
    )]
    dimensions: Vec<Dimension>,

    /// Directory holding the reference datasets
    #[clap(long, env = "TRACK_COUNTS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// County boundaries as GeoJSON, instead of the one in the data directory
    #[clap(long)]
    counties: Option<PathBuf>,

    /// Country boundaries as GeoJSON, instead of the one in the data directory
    #[clap(long)]
    countries: Option<PathBuf>,

    /// JSON list of `{"pattern": ..., "alias": ...}` used to rename tracks
    #[clap(long)]
    aliases: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<RunConfig, ConfigError> {
        let aliases = self
            .aliases
            .as_deref()
            .map(NameAliases::load)
            .transpose()?;
        let config = RunConfig {
            crs: self.crs.parse::<Crs>()?,
            dimensions: config::dimension_specs(&self.dimensions)?,
            reference_paths: config::reference_paths(
                &self.data_dir,
                self.counties,
                self.countries,
            ),
            inputs: self.inputs,
            batch_size: self.batch_size,
            output_dir: self.output_dir,
            workers: self.workers,
            skip_existing: !self.recompute,
            skip_batch_phase: self.skip_batch_phase,
            aliases,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config()?;
    if let Some(aliases) = &config.aliases {
        info!("using {} name aliases", aliases.len());
    }

    let provider = GeoJsonProvider::new(config.reference_paths.clone());
    let stream = if config.inputs.is_empty() {
        RecordStream::stdin()
    } else {
        RecordStream::files(config.inputs.clone())
    };

    let report = run::run(&config, &provider, stream)?;
    print!("{}", report);

    if report.is_success() {
        Ok(())
    } else {
        Err(eyre!(
            "run incomplete, re-run to retry the failed parts"
        ))
    }
}
