// src/annotation/row.rs

use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{AnnotError, Result};
use crate::fasta::{open_input, OutputFile};
use crate::multivalue::MultiValue;
use crate::types::{
    AlignmentUnit, CrossReference, OntologyKind, SequenceIdentifierTriple, TaxonomyRecord,
    NOT_AVAILABLE,
};

/// The `type` tag that opens every record and fixes its column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowType {
    Plaza,
    RefSeq,
    Nt,
    Nr,
    Merger,
}

const ALIGNMENT_COLUMNS: [&str; 15] = [
    "seq_id",
    "nt_seq_id",
    "aa_seq_id",
    "iteration_num",
    "hit_num",
    "hit_id",
    "hit_def",
    "hit_accession",
    "hsp_num",
    "hsp_evalue",
    "hsp_identity",
    "hsp_positive",
    "hsp_gaps",
    "hsp_align_len",
    "hsp_qseq",
];

const TAXONOMY_COLUMNS: [&str; 6] =
    ["species", "family", "phylum", "kingdom", "superkingdom", "tax_id"];

const PLAZA_COLUMNS: [&str; 37] = [
    "type",
    "seq_id", "nt_seq_id", "aa_seq_id", "iteration_num", "hit_num", "hit_id", "hit_def",
    "hit_accession", "hsp_num", "hsp_evalue", "hsp_identity", "hsp_positive", "hsp_gaps",
    "hsp_align_len", "hsp_qseq",
    "species", "family", "phylum", "kingdom", "superkingdom", "tax_id",
    "gene_id", "description",
    "go_id", "go_desc", "interpro_id", "interpro_desc", "mapman_id", "mapman_desc",
    "ec_id", "ec_desc", "kegg_id", "kegg_desc", "metacyc_id", "metacyc_desc",
    "databases",
];

const REFSEQ_COLUMNS: [&str; 36] = [
    "type",
    "seq_id", "nt_seq_id", "aa_seq_id", "iteration_num", "hit_num", "hit_id", "hit_def",
    "hit_accession", "hsp_num", "hsp_evalue", "hsp_identity", "hsp_positive", "hsp_gaps",
    "hsp_align_len", "hsp_qseq",
    "species", "family", "phylum", "kingdom", "superkingdom", "tax_id",
    "gene_id", "description", "protein_accession",
    "go_id", "go_desc", "interpro_id", "interpro_desc",
    "ec_id", "ec_desc", "kegg_id", "kegg_desc", "metacyc_id", "metacyc_desc",
    "databases",
];

const NUCLEOTIDE_COLUMNS: [&str; 24] = [
    "type",
    "seq_id", "nt_seq_id", "aa_seq_id", "iteration_num", "hit_num", "hit_id", "hit_def",
    "hit_accession", "hsp_num", "hsp_evalue", "hsp_identity", "hsp_positive", "hsp_gaps",
    "hsp_align_len", "hsp_qseq",
    "species", "family", "phylum", "kingdom", "superkingdom", "tax_id",
    "accession", "description",
];

const MERGER_COLUMNS: [&str; 38] = [
    "type",
    "seq_id", "nt_seq_id", "aa_seq_id", "iteration_num", "hit_num", "hit_id", "hit_def",
    "hit_accession", "hsp_num", "hsp_evalue", "hsp_identity", "hsp_positive", "hsp_gaps",
    "hsp_align_len", "hsp_qseq",
    "species", "family", "phylum", "kingdom", "superkingdom", "tax_id",
    "dataset", "gene_id", "description",
    "go_id", "go_desc", "interpro_id", "interpro_desc", "mapman_id", "mapman_desc",
    "ec_id", "ec_desc", "kegg_id", "kegg_desc", "metacyc_id", "metacyc_desc",
    "databases",
];

/// Ontologies a REFSEQ row carries; it has no MapMan pair.
const REFSEQ_KINDS: [OntologyKind; 5] = [
    OntologyKind::Go,
    OntologyKind::InterPro,
    OntologyKind::Ec,
    OntologyKind::Kegg,
    OntologyKind::MetaCyc,
];

impl RowType {
    pub fn tag(self) -> &'static str {
        match self {
            RowType::Plaza => "PLAZA",
            RowType::RefSeq => "REFSEQ",
            RowType::Nt => "NT",
            RowType::Nr => "NR",
            RowType::Merger => "MERGER",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "PLAZA" => Some(RowType::Plaza),
            "REFSEQ" => Some(RowType::RefSeq),
            "NT" => Some(RowType::Nt),
            "NR" => Some(RowType::Nr),
            "MERGER" => Some(RowType::Merger),
            _ => None,
        }
    }

    /// Header of a file of this type, `type` column first.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            RowType::Plaza => &PLAZA_COLUMNS,
            RowType::RefSeq => &REFSEQ_COLUMNS,
            RowType::Nt | RowType::Nr => &NUCLEOTIDE_COLUMNS,
            RowType::Merger => &MERGER_COLUMNS,
        }
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identifiers, alignment and taxonomy shared by every layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCore {
    pub ids: SequenceIdentifierTriple,
    pub alignment: AlignmentUnit,
    pub taxonomy: TaxonomyRecord,
}

/// Multi-valued functional fields plus the list of sources that filled them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionalAnnotation {
    ids: [MultiValue; 6],
    descriptions: [MultiValue; 6],
    databases: MultiValue,
}

impl FunctionalAnnotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a lookup that matched. Only ever called on success.
    pub fn record_source(&mut self, source: &str) {
        self.databases.push(source);
    }

    /// Record one successful lookup and append its entries.
    /// Returns false, leaving everything untouched, when `entries` is empty.
    /// Blank ids and descriptions are written as `N/A` so both lists stay aligned.
    pub fn add(&mut self, source: &str, kind: OntologyKind, entries: &[CrossReference]) -> bool {
        if entries.is_empty() {
            return false;
        }
        self.record_source(source);
        for entry in entries {
            self.ids[kind.index()].push(or_not_available(&entry.id));
            self.descriptions[kind.index()].push(or_not_available(&entry.description));
        }
        true
    }

    pub fn ids(&self, kind: OntologyKind) -> &MultiValue {
        &self.ids[kind.index()]
    }

    pub fn descriptions(&self, kind: OntologyKind) -> &MultiValue {
        &self.descriptions[kind.index()]
    }

    pub fn databases(&self) -> &MultiValue {
        &self.databases
    }

    pub fn is_annotated(&self) -> bool {
        !self.databases.is_empty()
    }

    fn push_fields(&self, kinds: &[OntologyKind], out: &mut Vec<String>) {
        for &kind in kinds {
            out.push(self.ids(kind).to_string());
            out.push(self.descriptions(kind).to_string());
        }
    }

    fn from_fields(kinds: &[OntologyKind], fields: &[&str], databases: &str) -> Self {
        let mut functional = FunctionalAnnotation::new();
        for (i, &kind) in kinds.iter().enumerate() {
            functional.ids[kind.index()] = MultiValue::from_joined(fields[2 * i]);
            functional.descriptions[kind.index()] = MultiValue::from_joined(fields[2 * i + 1]);
        }
        functional.databases = MultiValue::from_joined(databases);
        functional
    }
}

fn or_not_available(value: &str) -> &str {
    if value.trim().is_empty() {
        NOT_AVAILABLE
    } else {
        value
    }
}

/// One merged output record, one variant per `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationRow {
    Plaza {
        core: RowCore,
        gene_id: String,
        description: String,
        functional: FunctionalAnnotation,
    },
    RefSeq {
        core: RowCore,
        gene_id: String,
        description: String,
        protein_accession: String,
        functional: FunctionalAnnotation,
    },
    Nt {
        core: RowCore,
        accession: String,
        description: String,
    },
    Nr {
        core: RowCore,
        accession: String,
        description: String,
    },
    Merger {
        core: RowCore,
        dataset: String,
        gene_id: String,
        description: String,
        functional: FunctionalAnnotation,
    },
}

impl AnnotationRow {
    pub fn row_type(&self) -> RowType {
        match self {
            AnnotationRow::Plaza { .. } => RowType::Plaza,
            AnnotationRow::RefSeq { .. } => RowType::RefSeq,
            AnnotationRow::Nt { .. } => RowType::Nt,
            AnnotationRow::Nr { .. } => RowType::Nr,
            AnnotationRow::Merger { .. } => RowType::Merger,
        }
    }

    pub fn core(&self) -> &RowCore {
        match self {
            AnnotationRow::Plaza { core, .. }
            | AnnotationRow::RefSeq { core, .. }
            | AnnotationRow::Nt { core, .. }
            | AnnotationRow::Nr { core, .. }
            | AnnotationRow::Merger { core, .. } => core,
        }
    }

    pub fn functional(&self) -> Option<&FunctionalAnnotation> {
        match self {
            AnnotationRow::Plaza { functional, .. }
            | AnnotationRow::RefSeq { functional, .. }
            | AnnotationRow::Merger { functional, .. } => Some(functional),
            AnnotationRow::Nt { .. } | AnnotationRow::Nr { .. } => None,
        }
    }

    pub fn seq_id(&self) -> &str {
        &self.core().ids.transcript_id
    }

    /// Same content in the MERGER layout, tagged with the dataset it came from.
    pub fn into_merger(self) -> AnnotationRow {
        match self {
            AnnotationRow::Plaza { core, gene_id, description, functional } => {
                AnnotationRow::Merger {
                    core,
                    dataset: RowType::Plaza.tag().to_string(),
                    gene_id,
                    description,
                    functional,
                }
            }
            AnnotationRow::RefSeq { core, gene_id, description, functional, .. } => {
                AnnotationRow::Merger {
                    core,
                    dataset: RowType::RefSeq.tag().to_string(),
                    gene_id,
                    description,
                    functional,
                }
            }
            AnnotationRow::Nt { core, accession, description } => AnnotationRow::Merger {
                core,
                dataset: RowType::Nt.tag().to_string(),
                gene_id: accession,
                description,
                functional: FunctionalAnnotation::new(),
            },
            AnnotationRow::Nr { core, accession, description } => AnnotationRow::Merger {
                core,
                dataset: RowType::Nr.tag().to_string(),
                gene_id: accession,
                description,
                functional: FunctionalAnnotation::new(),
            },
            merger @ AnnotationRow::Merger { .. } => merger,
        }
    }

    /// Fields in column order, `type` tag first.
    pub fn to_fields(&self) -> Vec<String> {
        let row_type = self.row_type();
        let mut out = Vec::with_capacity(row_type.columns().len());
        out.push(row_type.tag().to_string());
        push_core(self.core(), &mut out);

        match self {
            AnnotationRow::Plaza { gene_id, description, functional, .. } => {
                out.push(gene_id.clone());
                out.push(description.clone());
                functional.push_fields(&OntologyKind::ALL, &mut out);
                out.push(functional.databases().to_string());
            }
            AnnotationRow::RefSeq { gene_id, description, protein_accession, functional, .. } => {
                out.push(gene_id.clone());
                out.push(description.clone());
                out.push(protein_accession.clone());
                functional.push_fields(&REFSEQ_KINDS, &mut out);
                out.push(functional.databases().to_string());
            }
            AnnotationRow::Nt { accession, description, .. }
            | AnnotationRow::Nr { accession, description, .. } => {
                out.push(accession.clone());
                out.push(description.clone());
            }
            AnnotationRow::Merger { dataset, gene_id, description, functional, .. } => {
                out.push(dataset.clone());
                out.push(gene_id.clone());
                out.push(description.clone());
                functional.push_fields(&OntologyKind::ALL, &mut out);
                out.push(functional.databases().to_string());
            }
        }
        out
    }

    /// Parse one record. The message of the error names what was wrong,
    /// the caller adds file and record number.
    pub fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        let tag = fields.first().copied().unwrap_or_default();
        let row_type = RowType::from_tag(tag).ok_or_else(|| format!("unknown row type `{tag}`"))?;
        let expected = row_type.columns().len();
        if fields.len() != expected {
            return Err(format!(
                "{} record has {} fields, expected {}",
                row_type,
                fields.len(),
                expected
            ));
        }

        let core_end = 1 + ALIGNMENT_COLUMNS.len() + TAXONOMY_COLUMNS.len();
        let core = parse_core(&fields[1..core_end])?;
        let rest = &fields[core_end..];
        let text = |i: usize| rest[i].to_string();

        Ok(match row_type {
            RowType::Plaza => AnnotationRow::Plaza {
                core,
                gene_id: text(0),
                description: text(1),
                functional: FunctionalAnnotation::from_fields(
                    &OntologyKind::ALL,
                    &rest[2..14],
                    rest[14],
                ),
            },
            RowType::RefSeq => AnnotationRow::RefSeq {
                core,
                gene_id: text(0),
                description: text(1),
                protein_accession: text(2),
                functional: FunctionalAnnotation::from_fields(
                    &REFSEQ_KINDS,
                    &rest[3..13],
                    rest[13],
                ),
            },
            RowType::Nt => AnnotationRow::Nt {
                core,
                accession: text(0),
                description: text(1),
            },
            RowType::Nr => AnnotationRow::Nr {
                core,
                accession: text(0),
                description: text(1),
            },
            RowType::Merger => AnnotationRow::Merger {
                core,
                dataset: text(0),
                gene_id: text(1),
                description: text(2),
                functional: FunctionalAnnotation::from_fields(
                    &OntologyKind::ALL,
                    &rest[3..15],
                    rest[15],
                ),
            },
        })
    }
}

fn push_core(core: &RowCore, out: &mut Vec<String>) {
    let a = &core.alignment;
    let t = &core.taxonomy;
    out.extend([
        core.ids.transcript_id.clone(),
        core.ids.nucleotide_id.clone(),
        core.ids.protein_id.clone(),
        a.iteration_num.to_string(),
        a.hit_num.to_string(),
        a.hit_id.clone(),
        a.hit_definition.clone(),
        a.hit_accession.clone(),
        a.hsp_num.to_string(),
        format!("{:e}", a.hsp_evalue),
        a.hsp_identity.to_string(),
        a.hsp_positive.to_string(),
        a.hsp_gaps.to_string(),
        a.hsp_align_len.to_string(),
        a.hsp_query_seq.clone(),
        t.species_name.clone(),
        t.family.clone(),
        t.phylum.clone(),
        t.kingdom.clone(),
        t.superkingdom.clone(),
        t.tax_id.clone(),
    ]);
}

fn parse_core(f: &[&str]) -> std::result::Result<RowCore, String> {
    fn num<T: std::str::FromStr>(value: &str, column: &str) -> std::result::Result<T, String> {
        value
            .trim()
            .parse()
            .map_err(|_| format!("invalid {column} `{value}`"))
    }

    let evalue: f64 = num(f[9], "hsp_evalue")?;
    if evalue.is_nan() || evalue < 0.0 {
        return Err(format!("invalid hsp_evalue `{}`", f[9]));
    }

    Ok(RowCore {
        ids: SequenceIdentifierTriple {
            transcript_id: f[0].to_string(),
            nucleotide_id: f[1].to_string(),
            protein_id: f[2].to_string(),
        },
        alignment: AlignmentUnit {
            iteration_num: num(f[3], "iteration_num")?,
            hit_num: num(f[4], "hit_num")?,
            hit_id: f[5].to_string(),
            hit_definition: f[6].to_string(),
            hit_accession: f[7].to_string(),
            hsp_num: num(f[8], "hsp_num")?,
            hsp_evalue: evalue,
            hsp_identity: num(f[10], "hsp_identity")?,
            hsp_positive: num(f[11], "hsp_positive")?,
            hsp_gaps: num(f[12], "hsp_gaps")?,
            hsp_align_len: num(f[13], "hsp_align_len")?,
            hsp_query_seq: f[14].to_string(),
        },
        taxonomy: TaxonomyRecord {
            species_name: f[15].to_string(),
            family: f[16].to_string(),
            phylum: f[17].to_string(),
            kingdom: f[18].to_string(),
            superkingdom: f[19].to_string(),
            tax_id: f[20].to_string(),
        },
    })
}

/// Semicolon-separated writer used for every delimited output of the crate.
pub(crate) fn delimited_writer(path: &Path) -> Result<csv::Writer<OutputFile>> {
    let out = OutputFile::create(path)?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b';')
        .quote_style(csv::QuoteStyle::NonNumeric)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out))
}

/// Flush and close a writer made by `delimited_writer`.
pub(crate) fn finish_writer(writer: csv::Writer<OutputFile>, path: &Path) -> Result<()> {
    let out = writer
        .into_inner()
        .map_err(|e| AnnotError::io(path, e.into_error()))?;
    out.finish().map_err(|e| AnnotError::io(path, e))
}

/// Writes AnnotationRows of one layout behind a header row.
pub struct AnnotationWriter {
    writer: csv::Writer<OutputFile>,
    path: PathBuf,
    row_type: RowType,
    rows_written: u64,
}

impl AnnotationWriter {
    pub fn create(path: impl AsRef<Path>, row_type: RowType) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = delimited_writer(&path)?;
        writer
            .write_record(row_type.columns())
            .map_err(|e| AnnotError::csv(&path, e))?;
        Ok(Self {
            writer,
            path,
            row_type,
            rows_written: 0,
        })
    }

    pub fn write(&mut self, row: &AnnotationRow) -> Result<()> {
        debug_assert!(
            row.row_type() == self.row_type
                || matches!(
                    (row.row_type(), self.row_type),
                    (RowType::Nt | RowType::Nr, RowType::Nt | RowType::Nr)
                )
        );
        self.writer
            .write_record(row.to_fields())
            .map_err(|e| AnnotError::csv(&self.path, e))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(self) -> Result<u64> {
        finish_writer(self.writer, &self.path)?;
        Ok(self.rows_written)
    }
}

/// Streams AnnotationRows back from a consolidated annotation file.
pub struct AnnotationReader {
    reader: csv::Reader<Box<dyn BufRead>>,
    record: csv::StringRecord,
    path: PathBuf,
    records_read: u64,
}

impl AnnotationReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_reader(open_input(path)?, path))
    }

    /// `path` is only used to name the source in errors.
    pub fn from_reader(input: Box<dyn BufRead>, path: impl AsRef<Path>) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        Self {
            reader,
            record: csv::StringRecord::new(),
            path: path.as_ref().to_path_buf(),
            records_read: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next row with its 1-based record number.
    pub fn next_row(&mut self) -> Result<Option<(u64, AnnotationRow)>> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| AnnotError::csv(&self.path, e))?;
        if !more {
            return Ok(None);
        }
        self.records_read += 1;
        let fields: Vec<&str> = self.record.iter().collect();
        let row = AnnotationRow::from_fields(&fields)
            .map_err(|message| AnnotError::format(&self.path, self.records_read, message))?;
        Ok(Some((self.records_read, row)))
    }
}

impl Iterator for AnnotationReader {
    type Item = Result<(u64, AnnotationRow)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
