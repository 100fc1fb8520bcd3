// src/annotation/merger.rs

use std::path::{Path, PathBuf};

use super::nt::{nucleotide_row, Route};
use super::row::{AnnotationRow, AnnotationWriter, FunctionalAnnotation, RowCore, RowType};
use crate::error::{AnnotError, Result};
use crate::fasta::{FastaReader, FastaRecord, OutputFile};
use crate::ids::{
    raw_sequence_id, resolve_gene_id, resolve_protein_accession, resolve_sequence_ids, IdMap,
};
use crate::store::AnnotationStore;
use crate::taxonomy::{TaxonomyResolver, TaxonomyService};
use crate::types::{
    Aligner, AlignmentUnit, CrossReference, DatasetFamily, OntologyKind, SequenceIdentifierTriple,
    TaxonomyRecord, XrefDb, NOT_AVAILABLE,
};

/// Everything one merge run needs besides the store and the taxonomy resolver.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Dataset identifier the alignments were loaded under.
    pub dataset: String,
    pub family: DatasetFamily,
    pub aligner: Aligner,
    /// Query sequences (FASTA, optionally gzipped).
    pub sequences: PathBuf,
    /// Consolidated annotation file; for NT/NR the Viridiplantae stream.
    pub output: PathBuf,
    /// Verbatim FASTA records of the sequences without annotation.
    pub non_annotated: PathBuf,
    /// NT/NR stream for every non-plant hit. Defaults next to `output`.
    pub contamination: Option<PathBuf>,
    pub transcript_map: Option<IdMap>,
    pub peptide_map: Option<IdMap>,
}

impl MergeOptions {
    pub fn new(
        dataset: &str,
        family: DatasetFamily,
        aligner: Aligner,
        sequences: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        non_annotated: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dataset: dataset.to_string(),
            family,
            aligner,
            sequences: sequences.into(),
            output: output.into(),
            non_annotated: non_annotated.into(),
            contamination: None,
            transcript_map: None,
            peptide_map: None,
        }
    }

    pub fn contamination_path(&self) -> PathBuf {
        match &self.contamination {
            Some(p) => p.clone(),
            None => {
                let name = self
                    .output
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "annotation.csv".to_string());
                self.output.with_file_name(format!("contamination-{name}"))
            }
        }
    }
}

/// Counters of one merge run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeSummary {
    pub sequences: u64,
    pub annotated: u64,
    pub non_annotated: u64,
    /// Rows in the main annotation file.
    pub rows_written: u64,
    /// NT/NR only: rows routed to the contamination stream.
    pub contamination_rows: u64,
    /// NT/NR only: sequences with rows in both streams.
    pub in_both_streams: Vec<String>,
}

/// Walks the query sequences, merges each one's hits with the store and writes
/// the consolidated annotation and the non-annotated FASTA.
///
/// On error the outputs are flushed best-effort and must be treated as invalid.
pub fn merge_annotations<A: AnnotationStore, S: TaxonomyService>(
    options: &MergeOptions,
    store: &mut A,
    taxonomy: &mut TaxonomyResolver<S>,
) -> Result<MergeSummary> {
    let mut reader = FastaReader::open(&options.sequences)?;
    let row_type = match options.family {
        DatasetFamily::Plaza => RowType::Plaza,
        DatasetFamily::RefSeq => RowType::RefSeq,
        DatasetFamily::Nt => RowType::Nt,
        DatasetFamily::Nr => RowType::Nr,
    };

    let mut outputs = MergeOutputs {
        annotation: AnnotationWriter::create(&options.output, row_type)?,
        contamination: None,
        non_annotated: OutputFile::create(&options.non_annotated)?,
        non_annotated_path: options.non_annotated.clone(),
    };
    if matches!(options.family, DatasetFamily::Nt | DatasetFamily::Nr) {
        outputs.contamination = Some(AnnotationWriter::create(
            options.contamination_path(),
            row_type,
        )?);
    }

    let mut merger = HitMerger {
        store,
        taxonomy,
        options,
    };
    let result = merger.run(&mut reader, &mut outputs);

    match result {
        Ok(mut summary) => {
            summary.rows_written = outputs.annotation.rows_written();
            summary.contamination_rows = outputs
                .contamination
                .as_ref()
                .map(|w| w.rows_written())
                .unwrap_or(0);
            outputs.finish()?;
            log::info!(
                "{} sequences: {} annotated, {} non-annotated, {} rows written to {}",
                summary.sequences,
                summary.annotated,
                summary.non_annotated,
                summary.rows_written,
                options.output.display()
            );
            Ok(summary)
        }
        Err(e) => {
            let _ = outputs.finish();
            Err(e)
        }
    }
}

struct MergeOutputs {
    annotation: AnnotationWriter,
    contamination: Option<AnnotationWriter>,
    non_annotated: OutputFile,
    non_annotated_path: PathBuf,
}

impl MergeOutputs {
    fn write_non_annotated(&mut self, record: &FastaRecord) -> Result<()> {
        record
            .write_to(&mut self.non_annotated)
            .map_err(|e| AnnotError::io(&self.non_annotated_path, e))
    }

    fn finish(self) -> Result<()> {
        self.annotation.finish()?;
        if let Some(w) = self.contamination {
            w.finish()?;
        }
        self.non_annotated
            .finish()
            .map_err(|e| AnnotError::io(&self.non_annotated_path, e))
    }
}

struct HitMerger<'a, A: AnnotationStore, S: TaxonomyService> {
    store: &'a mut A,
    taxonomy: &'a mut TaxonomyResolver<S>,
    options: &'a MergeOptions,
}

impl<'a, A: AnnotationStore, S: TaxonomyService> HitMerger<'a, A, S> {
    fn run(
        &mut self,
        reader: &mut FastaReader,
        outputs: &mut MergeOutputs,
    ) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        while let Some(record) = reader.next_record()? {
            summary.sequences += 1;
            let annotated = self.merge_sequence(reader.path(), &record, outputs, &mut summary)?;
            if annotated {
                summary.annotated += 1;
            } else {
                outputs.write_non_annotated(&record)?;
                summary.non_annotated += 1;
            }
        }
        Ok(summary)
    }

    /// All hits of one sequence. Returns whether any row was written.
    fn merge_sequence(
        &mut self,
        path: &Path,
        record: &FastaRecord,
        outputs: &mut MergeOutputs,
        summary: &mut MergeSummary,
    ) -> Result<bool> {
        let header = record.header_text();
        let as_format =
            |e: crate::ids::ParseError| AnnotError::format(path, record.record_num, e.to_string());
        let ids = resolve_sequence_ids(
            header,
            self.options.transcript_map.as_ref(),
            self.options.peptide_map.as_ref(),
        )
        .map_err(as_format)?;
        let raw_id = raw_sequence_id(header).map_err(as_format)?;

        let units = self.store.lookup_alignments(&self.options.dataset, raw_id)?;
        let mut is_seq_annotated = false;
        let mut routes = (false, false);

        for unit in &units {
            let row = match self.options.family {
                DatasetFamily::Plaza => self.plaza_hit(&ids, unit)?,
                DatasetFamily::RefSeq => self.refseq_hit(&ids, unit, path, record.record_num)?,
                DatasetFamily::Nt | DatasetFamily::Nr => {
                    let (row, route) = nucleotide_row(
                        self.options.family,
                        self.options.aligner,
                        &ids,
                        unit,
                        &mut *self.store,
                        &mut *self.taxonomy,
                    )
                    .map_err(|e| match e {
                        AnnotError::Parse(p) => AnnotError::format(
                            path,
                            record.record_num,
                            format!("sequence {} hit {}: {}", ids.transcript_id, unit.hit_num, p),
                        ),
                        other => other,
                    })?;
                    match route {
                        Route::Plant => {
                            routes.0 = true;
                            outputs.annotation.write(&row)?;
                        }
                        Route::Contamination => {
                            routes.1 = true;
                            if let Some(w) = outputs.contamination.as_mut() {
                                w.write(&row)?;
                            }
                        }
                    }
                    is_seq_annotated = true;
                    continue;
                }
            };

            if let Some(row) = row {
                is_seq_annotated = true;
                outputs.annotation.write(&row)?;
            }
        }

        if routes.0 && routes.1 {
            log::warn!(
                "Sequence {} has hits in both the plant and the contamination output",
                ids.transcript_id
            );
            summary.in_both_streams.push(ids.transcript_id.clone());
        }
        Ok(is_seq_annotated)
    }

    /// Resolve taxonomy from the first entry that names a species, unless
    /// `taxonomy` is already resolved.
    fn backfill_taxonomy(
        &mut self,
        taxonomy: &mut TaxonomyRecord,
        entries: &[CrossReference],
    ) -> Result<()> {
        if taxonomy.is_resolved() {
            return Ok(());
        }
        if let Some(species) = entries.iter().find_map(|e| e.species.as_deref()) {
            *taxonomy = self.taxonomy.resolve(species, &mut *self.store)?;
        }
        Ok(())
    }

    /// EC, KEGG, MetaCyc (and optionally InterPro) reached through the GO ids.
    fn derive_from_go(
        &mut self,
        go_ids: &[String],
        targets: &[XrefDb],
        functional: &mut FunctionalAnnotation,
    ) -> Result<()> {
        if go_ids.is_empty() {
            return Ok(());
        }
        for &target in targets {
            let entries = self.store.lookup_cross_references(go_ids, target)?;
            let kind = match target {
                XrefDb::InterPro => OntologyKind::InterPro,
                XrefDb::Ec => OntologyKind::Ec,
                XrefDb::Kegg => OntologyKind::Kegg,
                XrefDb::MetaCyc => OntologyKind::MetaCyc,
            };
            functional.add(target.name(), kind, &entries);
        }
        Ok(())
    }

    /// GO -> InterPro -> MapMan by gene id, then EC/KEGG/MetaCyc from the
    /// accumulated GO ids.
    fn plaza_hit(
        &mut self,
        ids: &SequenceIdentifierTriple,
        unit: &AlignmentUnit,
    ) -> Result<Option<AnnotationRow>> {
        let options = self.options;
        let dataset = options.dataset.as_str();
        let gene_id =
            resolve_gene_id(DatasetFamily::Plaza, &unit.hit_accession, &unit.hit_definition);
        let mut functional = FunctionalAnnotation::new();
        let mut taxonomy = TaxonomyRecord::empty();

        let go = self.store.lookup_go(dataset, &gene_id)?;
        if functional.add("GO", OntologyKind::Go, &go) {
            self.backfill_taxonomy(&mut taxonomy, &go)?;
        }
        let interpro = self.store.lookup_interpro(dataset, &gene_id)?;
        if functional.add("InterPro", OntologyKind::InterPro, &interpro) {
            self.backfill_taxonomy(&mut taxonomy, &interpro)?;
        }
        let mapman = self.store.lookup_mapman(dataset, &gene_id)?;
        if functional.add("MapMan", OntologyKind::MapMan, &mapman) {
            self.backfill_taxonomy(&mut taxonomy, &mapman)?;
        }

        let mut go_ids: Vec<String> = Vec::new();
        for entry in &go {
            if !go_ids.contains(&entry.id) {
                go_ids.push(entry.id.clone());
            }
        }
        for entry in &interpro {
            for go_id in self.store.lookup_interpro2go(&entry.id)? {
                if !go_ids.contains(&go_id) {
                    go_ids.push(go_id);
                }
            }
        }
        self.derive_from_go(
            &go_ids,
            &[XrefDb::Ec, XrefDb::Kegg, XrefDb::MetaCyc],
            &mut functional,
        )?;

        if !functional.is_annotated() {
            return Ok(None);
        }
        let description = self
            .store
            .lookup_gene_description(dataset, &gene_id)?
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Ok(Some(AnnotationRow::Plaza {
            core: RowCore {
                ids: ids.clone(),
                alignment: unit.clone(),
                taxonomy,
            },
            gene_id,
            description,
            functional,
        }))
    }

    /// gene2refseq -> gene2go, then InterPro/EC/KEGG/MetaCyc from the GO ids.
    fn refseq_hit(
        &mut self,
        ids: &SequenceIdentifierTriple,
        unit: &AlignmentUnit,
        path: &Path,
        record_num: u64,
    ) -> Result<Option<AnnotationRow>> {
        let parsed =
            resolve_protein_accession(self.options.aligner, &unit.hit_id, &unit.hit_definition)
                .map_err(|e| {
                    AnnotError::format(
                        path,
                        record_num,
                        format!("sequence {} hit {}: {}", ids.transcript_id, unit.hit_num, e),
                    )
                })?;

        let mut taxonomy = self.taxonomy.resolve(&parsed.species, &mut *self.store)?;
        let mut functional = FunctionalAnnotation::new();
        let mut gene_id = NOT_AVAILABLE.to_string();

        if let Some(gene) = self.store.lookup_gene2refseq(&parsed.accession)? {
            functional.record_source("gene2refseq");
            if !taxonomy.is_resolved() {
                if let Some(species) = gene.species.as_deref() {
                    taxonomy = self.taxonomy.resolve(species, &mut *self.store)?;
                }
            }
            gene_id = gene.gene_id;

            let go = self.store.lookup_gene2go(&gene_id)?;
            functional.add("gene2go", OntologyKind::Go, &go);

            let mut go_ids: Vec<String> = Vec::new();
            for entry in &go {
                if !go_ids.contains(&entry.id) {
                    go_ids.push(entry.id.clone());
                }
            }
            self.derive_from_go(
                &go_ids,
                &[XrefDb::InterPro, XrefDb::Ec, XrefDb::Kegg, XrefDb::MetaCyc],
                &mut functional,
            )?;
        }

        if !functional.is_annotated() {
            return Ok(None);
        }
        Ok(Some(AnnotationRow::RefSeq {
            core: RowCore {
                ids: ids.clone(),
                alignment: unit.clone(),
                taxonomy,
            },
            gene_id,
            description: parsed.description,
            protein_accession: parsed.accession,
            functional,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::annotation::row::AnnotationReader;
    use crate::store::MemoryStore;
    use crate::taxonomy::OfflineTaxonomy;

    pub(crate) fn unit(
        hit: u32,
        hsp: u32,
        evalue: f64,
        hit_id: &str,
        def: &str,
        acc: &str,
    ) -> AlignmentUnit {
        AlignmentUnit {
            iteration_num: 1,
            hit_num: hit,
            hit_id: hit_id.to_string(),
            hit_definition: def.to_string(),
            hit_accession: acc.to_string(),
            hsp_num: hsp,
            hsp_evalue: evalue,
            hsp_identity: 80,
            hsp_positive: 90,
            hsp_gaps: 1,
            hsp_align_len: 120,
            hsp_query_seq: "MASS".to_string(),
        }
    }

    fn read_rows(path: &Path) -> Vec<AnnotationRow> {
        AnnotationReader::open(path)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect()
    }

    #[test]
    fn test_plaza_merge() {
        let dir = tempfile::tempdir().unwrap();
        let seqs = dir.path().join("seqs.fasta");
        std::fs::write(&seqs, ">s1 first\nACGT\n>s2 second\nGGCC\nTTAA\n>s3\nAAAA\n").unwrap();

        let mut store = MemoryStore::new();
        // s1: one annotated hit with two HSPs and one hit nobody knows
        store.add_alignment("plaza", "s1", unit(1, 1, 1e-40, "h1", "AT1G01010", "AT1G01010"));
        store.add_alignment("plaza", "s1", unit(1, 2, 1e-20, "h1", "AT1G01010", "AT1G01010"));
        store.add_alignment("plaza", "s1", unit(2, 1, 1e-5, "h2", "UNKNOWN", "UNKNOWN"));
        // s2: a hit whose gene has no cross-reference
        store.add_alignment("plaza", "s2", unit(1, 1, 1e-9, "h3", "AT9G99999", "AT9G99999"));

        let mut go = CrossReference::new("GO:0008150", "biological_process");
        go.species = Some("Arabidopsis thaliana".to_string());
        store.add_go("plaza", "AT1G01010", go);
        store.add_interpro("plaza", "AT1G01010", CrossReference::new("IPR003441", "NAC domain"));
        store.add_interpro2go("IPR003441", "GO:0003677");
        store.add_go_xref("GO:0003677", XrefDb::Kegg, CrossReference::new("K0001", "kegg entry"));
        store.add_gene_description("plaza", "AT1G01010", "NAC domain containing protein 1");
        let mut ath = TaxonomyRecord::unresolved("Arabidopsis thaliana");
        ath.kingdom = "Viridiplantae".to_string();
        ath.family = "Brassicaceae".to_string();
        store.add_species(ath);

        let opts = MergeOptions::new(
            "plaza",
            DatasetFamily::Plaza,
            Aligner::BlastPlus,
            &seqs,
            dir.path().join("annot.csv"),
            dir.path().join("nonann.fasta"),
        );
        let mut resolver = TaxonomyResolver::new(OfflineTaxonomy);
        let summary = merge_annotations(&opts, &mut store, &mut resolver).unwrap();

        assert_eq!(summary.sequences, 3);
        assert_eq!(summary.annotated, 1);
        assert_eq!(summary.non_annotated, 2);
        assert_eq!(summary.rows_written, 2);

        let rows = read_rows(&opts.output);
        assert_eq!(rows.len(), 2);
        for row in &rows {
            let functional = row.functional().unwrap();
            assert_eq!(functional.databases().as_str(), "GO*InterPro*KEGG");
            assert_eq!(functional.ids(OntologyKind::Kegg).as_str(), "K0001");
            // interpro2go terms only feed the derived lookups
            assert_eq!(functional.ids(OntologyKind::Go).as_str(), "GO:0008150");
            assert!(!functional.ids(OntologyKind::Go).values().any(|id| id == "GO:0003677"));
            assert_eq!(row.core().taxonomy.family, "Brassicaceae");
        }
        match &rows[0] {
            AnnotationRow::Plaza { description, gene_id, .. } => {
                assert_eq!(gene_id, "AT1G01010");
                assert_eq!(description, "NAC domain containing protein 1");
            }
            other => panic!("unexpected row {:?}", other),
        }

        let non = std::fs::read_to_string(&opts.non_annotated).unwrap();
        assert_eq!(non, ">s2 second\nGGCC\nTTAA\n>s3\nAAAA\n");
    }

    #[test]
    fn test_refseq_merge() {
        let dir = tempfile::tempdir().unwrap();
        let seqs = dir.path().join("seqs.fasta");
        std::fs::write(&seqs, ">q1\nMKV\n>q2\nMKK\n").unwrap();

        let mut store = MemoryStore::new();
        store.add_alignment(
            "refseq",
            "q1",
            unit(1, 1, 1e-30, "ref|NP_001.1|", "kinase [Zea mays]", "NP_001"),
        );
        store.add_alignment(
            "refseq",
            "q2",
            unit(1, 1, 1e-30, "ref|NP_999.1|", "orphan [Zea mays]", "NP_999"),
        );
        store.add_gene2refseq(
            "NP_001.1",
            crate::types::RefSeqGene {
                gene_id: "541234".to_string(),
                tax_id: "4577".to_string(),
                species: Some("Zea mays".to_string()),
            },
        );
        store.add_gene2go("541234", CrossReference::new("GO:0004672", "protein kinase activity"));
        store.add_go_xref("GO:0004672", XrefDb::Ec, CrossReference::new("2.7.11.1", "kinase"));

        let opts = MergeOptions::new(
            "refseq",
            DatasetFamily::RefSeq,
            Aligner::BlastPlus,
            &seqs,
            dir.path().join("annot.csv"),
            dir.path().join("nonann.fasta"),
        );
        let mut resolver = TaxonomyResolver::new(OfflineTaxonomy);
        let summary = merge_annotations(&opts, &mut store, &mut resolver).unwrap();
        assert_eq!(summary.annotated, 1);
        assert_eq!(summary.non_annotated, 1);

        let rows = read_rows(&opts.output);
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            AnnotationRow::RefSeq { gene_id, protein_accession, functional, core, .. } => {
                assert_eq!(gene_id, "541234");
                assert_eq!(protein_accession, "NP_001.1");
                assert_eq!(functional.databases().as_str(), "gene2refseq*gene2go*EC");
                assert_eq!(core.taxonomy.species_name, "Zea mays");
            }
            other => panic!("unexpected row {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&opts.non_annotated).unwrap(), ">q2\nMKK\n");
    }

    #[test]
    fn test_refseq_gene_species_replaces_unknown_hit_species() {
        let dir = tempfile::tempdir().unwrap();
        let seqs = dir.path().join("seqs.fasta");
        std::fs::write(&seqs, ">q1\nMKV\n").unwrap();

        let mut store = MemoryStore::new();
        store.add_alignment(
            "refseq",
            "q1",
            unit(1, 1, 1e-30, "ref|NP_002.1|", "kinase [uncultured plant]", "NP_002"),
        );
        store.add_gene2refseq(
            "NP_002.1",
            crate::types::RefSeqGene {
                gene_id: "541999".to_string(),
                tax_id: "4577".to_string(),
                species: Some("Zea mays".to_string()),
            },
        );
        let mut maize = TaxonomyRecord::unresolved("Zea mays");
        maize.kingdom = "Viridiplantae".to_string();
        maize.family = "Poaceae".to_string();
        store.add_species(maize);

        let opts = MergeOptions::new(
            "refseq",
            DatasetFamily::RefSeq,
            Aligner::BlastPlus,
            &seqs,
            dir.path().join("annot.csv"),
            dir.path().join("nonann.fasta"),
        );
        let mut resolver = TaxonomyResolver::new(OfflineTaxonomy);
        merge_annotations(&opts, &mut store, &mut resolver).unwrap();

        let rows = read_rows(&opts.output);
        assert_eq!(rows.len(), 1);
        let taxonomy = &rows[0].core().taxonomy;
        assert_eq!(taxonomy.species_name, "Zea mays");
        assert_eq!(taxonomy.family, "Poaceae");
        assert_eq!(taxonomy.kingdom, "Viridiplantae");
    }

    #[test]
    fn test_refseq_bad_definition_names_file_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let seqs = dir.path().join("seqs.fasta");
        std::fs::write(&seqs, ">q1\nMKV\n>q2\nMKK\n").unwrap();
        let mut store = MemoryStore::new();
        store.add_alignment(
            "refseq",
            "q2",
            unit(1, 1, 1e-30, "ref|NP_1.1|", "no brackets", "NP_1"),
        );

        let opts = MergeOptions::new(
            "refseq",
            DatasetFamily::RefSeq,
            Aligner::BlastPlus,
            &seqs,
            dir.path().join("annot.csv"),
            dir.path().join("nonann.fasta"),
        );
        let mut resolver = TaxonomyResolver::new(OfflineTaxonomy);
        match merge_annotations(&opts, &mut store, &mut resolver) {
            Err(AnnotError::Format { file, record, .. }) => {
                assert_eq!(file, seqs);
                assert_eq!(record, 2);
            }
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_fasta_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let seqs = dir.path().join("seqs.fasta");
        std::fs::write(&seqs, "q1\nMKV\n").unwrap();
        let mut store = MemoryStore::new();
        let opts = MergeOptions::new(
            "plaza",
            DatasetFamily::Plaza,
            Aligner::BlastPlus,
            &seqs,
            dir.path().join("annot.csv"),
            dir.path().join("nonann.fasta"),
        );
        let mut resolver = TaxonomyResolver::new(OfflineTaxonomy);
        let err = merge_annotations(&opts, &mut store, &mut resolver).unwrap_err();
        assert!(err.to_string().contains("seqs.fasta"));
    }

    #[test]
    fn test_contamination_default_path() {
        let opts = MergeOptions::new(
            "nt",
            DatasetFamily::Nt,
            Aligner::BlastPlus,
            "s.fa",
            "/tmp/out/nt.csv",
            "n.fa",
        );
        assert_eq!(opts.contamination_path(), PathBuf::from("/tmp/out/contamination-nt.csv"));
    }
}
