pub mod aggregator;
pub mod report;

use std::path::{Path, PathBuf};

use crate::annotation::row::AnnotationReader;
use crate::error::{AnnotError, Result};
use crate::store::AnnotationStore;

pub use aggregator::{CounterMap, Histogram, StatCounter, Statistics, StatsAggregator};

/// Where the statistics files go: `<output_dir>/<category>-<base_name>.csv`.
#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub output_dir: PathBuf,
    pub base_name: String,
}

impl StatsOptions {
    pub fn new(output_dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_name: base_name.into(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSummary {
    pub sequences: u64,
    pub hits: u64,
    pub hsps: u64,
    pub files: Vec<PathBuf>,
}

/// Read one consolidated annotation file, already grouped by sequence id,
/// and write its statistics files.
pub fn compute_statistics<A: AnnotationStore + ?Sized>(
    input: impl AsRef<Path>,
    store: &A,
    options: &StatsOptions,
) -> Result<StatsSummary> {
    let input = input.as_ref();
    let mut aggregator = StatsAggregator::for_source(input);
    for item in AnnotationReader::open(input)? {
        let (record, row) = item?;
        aggregator.push(record, &row)?;
    }
    let stats = aggregator.finish();

    std::fs::create_dir_all(&options.output_dir)
        .map_err(|e| AnnotError::io(&options.output_dir, e))?;
    let files = report::write_reports(&stats, store, &options.output_dir, &options.base_name)?;

    log::info!(
        "Statistics of {}: {} sequences, {} hits, {} HSPs, {} files written to {}",
        input.display(),
        stats.sequences,
        stats.hits,
        stats.hsps,
        files.len(),
        options.output_dir.display()
    );
    Ok(StatsSummary {
        sequences: stats.sequences,
        hits: stats.hits,
        hsps: stats.hsps,
        files,
    })
}
