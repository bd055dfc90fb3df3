use std::fmt;
use std::io;

use tracing::{error, info, warn};

use crate::artifact::Publication;
use crate::batch::Batcher;
use crate::config::RunConfig;
use crate::consolidate::{consolidate, Consolidation};
use crate::dimension::Dimension;
use crate::error::PipelineError;
use crate::pool::{BatchPhaseReport, WorkerPool};
use crate::reference::GeometryProvider;
use crate::summarize::{summarize, SummaryContext};

#[derive(Debug, Default)]
pub struct RunReport {
    /// `None` when the batch phase was skipped
    pub batch_phase: Option<BatchPhaseReport>,
    pub read_error: Option<io::Error>,
    /// `None` when consolidation did not run because the batch phase is
    /// incomplete
    pub consolidations: Option<Vec<(Dimension, Result<Consolidation, PipelineError>)>>,
}

impl RunReport {
    pub fn batch_phase_complete(&self) -> bool {
        self.read_error.is_none()
            && self
                .batch_phase
                .as_ref()
                .map_or(true, BatchPhaseReport::is_complete)
    }

    pub fn is_success(&self) -> bool {
        self.batch_phase_complete()
            && self
                .consolidations
                .as_ref()
                .map_or(false, |c| c.iter().all(|(_, result)| result.is_ok()))
    }
}

/// Batch phase followed by consolidation.
///
/// Consolidation only runs once every batch has succeeded, since a canonical
/// table is never recomputed while it exists.
pub fn run<I, L>(
    config: &RunConfig,
    provider: &dyn GeometryProvider,
    lines: I,
) -> Result<RunReport, PipelineError>
where
    I: Iterator<Item = io::Result<L>>,
    L: AsRef<[u8]> + Send,
{
    let mut report = RunReport::default();

    if config.skip_batch_phase {
        info!("skipping the batch phase");
    } else {
        let pool = WorkerPool::new(config.workers)?;
        info!(
            "summarizing batches of {} records with {} workers into {}",
            config.batch_size,
            pool.workers(),
            config.output_dir.display()
        );
        let ctx = SummaryContext {
            output_dir: &config.output_dir,
            dimensions: &config.dimensions,
            provider,
            crs: &config.crs,
            skip_existing: config.skip_existing,
            aliases: config.aliases.as_ref(),
        };

        let mut read_error = None;
        let lines = lines.map_while(|line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                read_error = Some(e);
                None
            }
        });
        let batches = Batcher::new(lines, config.batch_size)?;
        let batch_phase = pool.run(batches, |batch| summarize(batch, &ctx));

        if let Some(e) = &read_error {
            error!("reading input failed, the input was not read completely: {}", e);
        }
        report.batch_phase = Some(batch_phase);
        report.read_error = read_error;
    }

    if !report.batch_phase_complete() {
        warn!("batch phase incomplete, not consolidating");
        return Ok(report);
    }

    let consolidations = config
        .dimensions
        .iter()
        .map(|spec| {
            let result = consolidate(&config.output_dir, spec);
            if let Err(e) = &result {
                error!("consolidating {} failed: {}", spec.dimension, e);
            }
            (spec.dimension, result)
        })
        .collect();
    report.consolidations = Some(consolidations);
    Ok(report)
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.batch_phase {
            None => writeln!(f, "batch phase: skipped")?,
            Some(phase) => {
                let (mut decoded, mut decode_failures, mut computed, mut skipped) = (0, 0, 0, 0);
                for (_, outcome) in phase.succeeded() {
                    decoded += outcome.decoded;
                    decode_failures += outcome.decode_failures;
                    computed += outcome.computed.len();
                    skipped += outcome.skipped.len();
                }
                writeln!(
                    f,
                    "batch phase: {} attempted, {} succeeded, {} failed",
                    phase.attempted(),
                    phase.succeeded().count(),
                    phase.failed().count()
                )?;
                writeln!(
                    f,
                    "  records decoded: {}, decode failures: {}",
                    decoded, decode_failures
                )?;
                writeln!(
                    f,
                    "  batch tables computed: {}, already present: {}",
                    computed, skipped
                )?;
                for (id, e) in phase.failed() {
                    writeln!(f, "  failed {}: {}", id, e)?;
                }
            }
        }
        if let Some(e) = &self.read_error {
            writeln!(f, "input read error: {}", e)?;
        }
        match &self.consolidations {
            None => writeln!(f, "consolidation: not run, batch phase incomplete")?,
            Some(consolidations) => {
                writeln!(f, "consolidation:")?;
                for (dimension, result) in consolidations {
                    match result {
                        Ok(c) => writeln!(
                            f,
                            "  {}: {} {} ({} records)",
                            dimension,
                            c.path.display(),
                            match c.publication {
                                Publication::Written => "written",
                                Publication::AlreadyPresent => "already present",
                            },
                            c.total
                        )?,
                        Err(e) => writeln!(f, "  {}: failed: {}", dimension, e)?,
                    }
                }
            }
        }
        Ok(())
    }
}
