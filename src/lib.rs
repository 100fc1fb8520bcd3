// src/lib.rs
pub mod annotation;
pub mod error;
pub mod fasta;
pub mod ids;
pub mod multivalue;
pub mod stats;
pub mod store;
pub mod taxonomy;
pub mod types;

pub use annotation::{
    combine_annotations, merge_annotations, AnnotationReader, AnnotationRow, AnnotationWriter,
    CombineOperation, CombineSummary, MergeOptions, MergeSummary, RowType,
};
pub use error::{AnnotError, Result};
pub use stats::{compute_statistics, StatsOptions, StatsSummary};
pub use store::{AnnotationStore, MemoryStore};
pub use taxonomy::{NcbiTaxonomyClient, OfflineTaxonomy, TaxonomyResolver, TaxonomyService};
pub use types::{Aligner, DatasetFamily, TaxonomyRecord, NOT_AVAILABLE};
