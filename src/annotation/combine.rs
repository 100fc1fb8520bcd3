// src/annotation/combine.rs

use ahash::AHashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::row::{AnnotationReader, AnnotationRow, AnnotationWriter, RowType};
use crate::error::Result;

/// How two annotation files are combined, by sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOperation {
    /// `1AND2`: sequences annotated in both files.
    Intersection,
    /// `1OR2`: sequences annotated in either file.
    Union,
    /// `1LESS2`: sequences only in the first file.
    FirstOnly,
    /// `2LESS1`: sequences only in the second file.
    SecondOnly,
}

impl FromStr for CombineOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "1AND2" => Ok(CombineOperation::Intersection),
            "1OR2" => Ok(CombineOperation::Union),
            "1LESS2" => Ok(CombineOperation::FirstOnly),
            "2LESS1" => Ok(CombineOperation::SecondOnly),
            other => Err(format!("unknown combine operation `{other}`")),
        }
    }
}

impl fmt::Display for CombineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CombineOperation::Intersection => "1AND2",
            CombineOperation::Union => "1OR2",
            CombineOperation::FirstOnly => "1LESS2",
            CombineOperation::SecondOnly => "2LESS1",
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CombineSummary {
    pub sequences: u64,
    pub rows_written: u64,
}

/// Rows of one file grouped by sequence id, in first-seen order.
struct SequenceGroups {
    groups: Vec<(String, Vec<AnnotationRow>)>,
    index: AHashMap<String, usize>,
}

impl SequenceGroups {
    fn load(path: &Path) -> Result<Self> {
        let mut groups: Vec<(String, Vec<AnnotationRow>)> = Vec::new();
        let mut index = AHashMap::new();
        for item in AnnotationReader::open(path)? {
            let (_, row) = item?;
            let seq_id = row.seq_id().to_string();
            let slot = *index.entry(seq_id.clone()).or_insert_with(|| {
                groups.push((seq_id, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(row);
        }
        Ok(Self { groups, index })
    }

    fn contains(&self, seq_id: &str) -> bool {
        self.index.contains_key(seq_id)
    }

    fn get(&self, seq_id: &str) -> Option<&[AnnotationRow]> {
        self.index.get(seq_id).map(|&i| self.groups[i].1.as_slice())
    }
}

/// Combine two consolidated annotation files of any type into one MERGER file.
pub fn combine_annotations(
    first: impl AsRef<Path>,
    second: impl AsRef<Path>,
    operation: CombineOperation,
    output: impl AsRef<Path>,
) -> Result<CombineSummary> {
    let first = SequenceGroups::load(first.as_ref())?;
    let second = SequenceGroups::load(second.as_ref())?;
    let mut writer = AnnotationWriter::create(output.as_ref(), RowType::Merger)?;
    let mut summary = CombineSummary::default();

    let result = write_combined(&first, &second, operation, &mut writer, &mut summary);
    let rows = writer.finish();
    result?;
    summary.rows_written = rows?;

    log::info!(
        "Combined with {}: {} sequences, {} rows written to {}",
        operation,
        summary.sequences,
        summary.rows_written,
        output.as_ref().display()
    );
    Ok(summary)
}

fn write_group(writer: &mut AnnotationWriter, rows: &[AnnotationRow]) -> Result<()> {
    for row in rows {
        writer.write(&row.clone().into_merger())?;
    }
    Ok(())
}

fn write_combined(
    first: &SequenceGroups,
    second: &SequenceGroups,
    operation: CombineOperation,
    writer: &mut AnnotationWriter,
    summary: &mut CombineSummary,
) -> Result<()> {
    if matches!(
        operation,
        CombineOperation::Intersection | CombineOperation::Union | CombineOperation::FirstOnly
    ) {
        for (seq_id, rows) in &first.groups {
            let other = second.get(seq_id);
            let keep = match operation {
                CombineOperation::Intersection => other.is_some(),
                CombineOperation::FirstOnly => other.is_none(),
                _ => true,
            };
            if !keep {
                continue;
            }
            summary.sequences += 1;
            write_group(writer, rows)?;
            if operation != CombineOperation::FirstOnly {
                if let Some(other_rows) = other {
                    write_group(writer, other_rows)?;
                }
            }
        }
    }

    if matches!(operation, CombineOperation::Union | CombineOperation::SecondOnly) {
        for (seq_id, rows) in &second.groups {
            if first.contains(seq_id) {
                continue;
            }
            summary.sequences += 1;
            write_group(writer, rows)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::row::tests::row_core;
    use crate::annotation::row::FunctionalAnnotation;
    use crate::types::{CrossReference, OntologyKind};

    fn write_file(path: &Path, row_type: RowType, rows: &[AnnotationRow]) {
        let mut w = AnnotationWriter::create(path, row_type).unwrap();
        for r in rows {
            w.write(r).unwrap();
        }
        w.finish().unwrap();
    }

    fn plaza(seq: &str, hit: u32) -> AnnotationRow {
        let mut functional = FunctionalAnnotation::new();
        functional.add("GO", OntologyKind::Go, &[CrossReference::new("GO:0008150", "bp")]);
        AnnotationRow::Plaza {
            core: row_core(seq, hit, 1, 1e-10, "Zea mays"),
            gene_id: format!("G{hit}"),
            description: "gene".to_string(),
            functional,
        }
    }

    fn nr(seq: &str, hit: u32) -> AnnotationRow {
        AnnotationRow::Nr {
            core: row_core(seq, hit, 1, 1e-20, "Zea mays"),
            accession: format!("XP_{hit}"),
            description: "protein".to_string(),
        }
    }

    fn seq_ids(path: &Path) -> Vec<String> {
        AnnotationReader::open(path)
            .unwrap()
            .map(|r| r.unwrap().1.seq_id().to_string())
            .collect()
    }

    fn setup() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        write_file(&a, RowType::Plaza, &[plaza("s1", 1), plaza("s2", 1), plaza("s2", 2)]);
        write_file(&b, RowType::Nr, &[nr("s2", 1), nr("s3", 1)]);
        (dir, a, b)
    }

    #[test]
    fn test_operations() {
        let (dir, a, b) = setup();
        let out = dir.path().join("out.csv");

        let s = combine_annotations(&a, &b, CombineOperation::Intersection, &out).unwrap();
        assert_eq!(s, CombineSummary { sequences: 1, rows_written: 3 });
        assert_eq!(seq_ids(&out), vec!["s2", "s2", "s2"]);

        combine_annotations(&a, &b, CombineOperation::Union, &out).unwrap();
        assert_eq!(seq_ids(&out), vec!["s1", "s2", "s2", "s2", "s3"]);

        combine_annotations(&a, &b, CombineOperation::FirstOnly, &out).unwrap();
        assert_eq!(seq_ids(&out), vec!["s1"]);

        combine_annotations(&a, &b, CombineOperation::SecondOnly, &out).unwrap();
        assert_eq!(seq_ids(&out), vec!["s3"]);
    }

    #[test]
    fn test_rows_become_merger() {
        let (dir, a, b) = setup();
        let out = dir.path().join("out.csv");
        combine_annotations(&a, &b, CombineOperation::Union, &out).unwrap();
        let rows: Vec<AnnotationRow> = AnnotationReader::open(&out)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        let datasets: Vec<&str> = rows
            .iter()
            .map(|r| match r {
                AnnotationRow::Merger { dataset, .. } => dataset.as_str(),
                _ => panic!("not a MERGER row"),
            })
            .collect();
        assert_eq!(datasets, vec!["PLAZA", "PLAZA", "PLAZA", "NR", "NR"]);
    }

    #[test]
    fn test_merger_input_with_refseq_input() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("merged.csv");
        let b = dir.path().join("refseq.csv");
        write_file(&a, RowType::Merger, &[plaza("s1", 1).into_merger()]);
        let refseq = AnnotationRow::RefSeq {
            core: row_core("s2", 1, 1, 1e-30, "Zea mays"),
            gene_id: "541234".to_string(),
            description: "kinase".to_string(),
            protein_accession: "NP_555.1".to_string(),
            functional: FunctionalAnnotation::new(),
        };
        write_file(&b, RowType::RefSeq, &[refseq]);

        let out = dir.path().join("out.csv");
        combine_annotations(&a, &b, CombineOperation::Union, &out).unwrap();

        let rows: Vec<AnnotationRow> = AnnotationReader::open(&out)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        let datasets: Vec<&str> = rows
            .iter()
            .map(|r| match r {
                AnnotationRow::Merger { dataset, .. } => dataset.as_str(),
                _ => panic!("not a MERGER row"),
            })
            .collect();
        assert_eq!(datasets, vec!["PLAZA", "REFSEQ"]);

        let text = std::fs::read_to_string(&out).unwrap();
        for line in text.lines() {
            assert_eq!(line.split(';').count(), 38);
        }
        assert!(!text.contains("NP_555.1"));
    }

    #[test]
    fn test_operation_names() {
        assert_eq!("1and2".parse::<CombineOperation>().unwrap(), CombineOperation::Intersection);
        assert_eq!(CombineOperation::SecondOnly.to_string(), "2LESS1");
        assert!("3OR4".parse::<CombineOperation>().is_err());
    }
}
