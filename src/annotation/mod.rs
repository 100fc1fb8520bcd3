pub mod combine;
pub mod merger;
pub mod nt;
pub mod row;

pub use combine::{combine_annotations, CombineOperation, CombineSummary};
pub use merger::{merge_annotations, MergeOptions, MergeSummary};
pub use row::{
    AnnotationReader, AnnotationRow, AnnotationWriter, FunctionalAnnotation, RowCore, RowType,
};
