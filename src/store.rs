//src/store.rs

use ahash::AHashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::{AnnotError, Result};
use crate::fasta::open_input;
use crate::types::{
    AlignmentUnit, CrossReference, OntologyKind, OntologyTerm, RefSeqGene, TaxonomyRecord, XrefDb,
};

/// Lookups the merger and the statistics need from the annotation database.
///
/// A miss is `Ok(None)` or an empty list, never an error. Errors are reserved
/// for a back-end that could not answer at all.
pub trait AnnotationStore {
    /// Every hit/HSP of one query sequence, in emission order.
    fn lookup_alignments(&self, dataset: &str, sequence_id: &str) -> Result<Vec<AlignmentUnit>>;

    fn lookup_gene_description(&self, dataset: &str, gene_id: &str) -> Result<Option<String>>;

    fn lookup_go(&self, dataset: &str, gene_id: &str) -> Result<Vec<CrossReference>>;

    fn lookup_interpro(&self, dataset: &str, gene_id: &str) -> Result<Vec<CrossReference>>;

    fn lookup_mapman(&self, dataset: &str, gene_id: &str) -> Result<Vec<CrossReference>>;

    /// Entries of `target` reachable from any of the GO ids, without duplicates.
    fn lookup_cross_references(
        &self,
        go_ids: &[String],
        target: XrefDb,
    ) -> Result<Vec<CrossReference>>;

    fn lookup_gene2go(&self, gene_id: &str) -> Result<Vec<CrossReference>>;

    fn lookup_gene2refseq(&self, protein_accession: &str) -> Result<Option<RefSeqGene>>;

    fn lookup_interpro2go(&self, interpro_id: &str) -> Result<Vec<String>>;

    fn lookup_species_taxonomy(&self, species_name: &str) -> Result<Option<TaxonomyRecord>>;

    /// Write-through for taxonomy resolved elsewhere. Overwriting is harmless.
    fn upsert_species_taxonomy(&mut self, record: &TaxonomyRecord) -> Result<()>;

    fn lookup_ontology_term(&self, go_id: &str) -> Result<Option<OntologyTerm>>;

    /// Description of an id in one of the statistics categories.
    fn lookup_term_description(&self, kind: OntologyKind, id: &str) -> Result<Option<String>> {
        match kind {
            OntologyKind::Go => Ok(self.lookup_ontology_term(id)?.map(|t| t.name)),
            _ => Ok(None),
        }
    }
}

type GeneKey = (String, String);

/// An in-memory store, filled in code or from a directory of tab-separated tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    alignments: AHashMap<GeneKey, Vec<AlignmentUnit>>,
    gene_descriptions: AHashMap<GeneKey, String>,
    go: AHashMap<GeneKey, Vec<CrossReference>>,
    interpro: AHashMap<GeneKey, Vec<CrossReference>>,
    mapman: AHashMap<GeneKey, Vec<CrossReference>>,
    go_xrefs: AHashMap<(String, XrefDb), Vec<CrossReference>>,
    gene2go: AHashMap<String, Vec<CrossReference>>,
    gene2refseq: AHashMap<String, RefSeqGene>,
    interpro2go: AHashMap<String, Vec<String>>,
    species: AHashMap<String, TaxonomyRecord>,
    ontology: AHashMap<String, OntologyTerm>,
    term_descriptions: AHashMap<(OntologyKind, String), String>,
    /// Set when loaded from a directory; upserts are appended here.
    species_file: Option<PathBuf>,
}

fn key(a: &str, b: &str) -> GeneKey {
    (a.to_string(), b.to_string())
}

fn optional(field: &str) -> Option<String> {
    let f = field.trim();
    if f.is_empty() || f == crate::types::NOT_AVAILABLE {
        None
    } else {
        Some(f.to_string())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_alignment(&mut self, dataset: &str, sequence_id: &str, unit: AlignmentUnit) {
        self.alignments.entry(key(dataset, sequence_id)).or_default().push(unit);
    }

    pub fn add_gene_description(&mut self, dataset: &str, gene_id: &str, description: &str) {
        self.gene_descriptions.insert(key(dataset, gene_id), description.to_string());
    }

    pub fn add_go(&mut self, dataset: &str, gene_id: &str, xref: CrossReference) {
        self.go.entry(key(dataset, gene_id)).or_default().push(xref);
    }

    pub fn add_interpro(&mut self, dataset: &str, gene_id: &str, xref: CrossReference) {
        self.interpro.entry(key(dataset, gene_id)).or_default().push(xref);
    }

    pub fn add_mapman(&mut self, dataset: &str, gene_id: &str, xref: CrossReference) {
        self.mapman.entry(key(dataset, gene_id)).or_default().push(xref);
    }

    pub fn add_go_xref(&mut self, go_id: &str, target: XrefDb, xref: CrossReference) {
        self.go_xrefs.entry((go_id.to_string(), target)).or_default().push(xref);
    }

    pub fn add_gene2go(&mut self, gene_id: &str, xref: CrossReference) {
        self.gene2go.entry(gene_id.to_string()).or_default().push(xref);
    }

    pub fn add_gene2refseq(&mut self, protein_accession: &str, gene: RefSeqGene) {
        self.gene2refseq.insert(protein_accession.to_string(), gene);
    }

    pub fn add_interpro2go(&mut self, interpro_id: &str, go_id: &str) {
        self.interpro2go
            .entry(interpro_id.to_string())
            .or_default()
            .push(go_id.to_string());
    }

    pub fn add_species(&mut self, record: TaxonomyRecord) {
        self.species.insert(record.species_name.clone(), record);
    }

    pub fn add_ontology_term(&mut self, go_id: &str, name: &str, namespace: &str) {
        self.ontology.insert(
            go_id.to_string(),
            OntologyTerm {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
        );
    }

    pub fn add_term_description(&mut self, kind: OntologyKind, id: &str, description: &str) {
        self.term_descriptions
            .insert((kind, id.to_string()), description.to_string());
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    /// Load every table present in `dir`. Missing tables are simply empty.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut store = MemoryStore::new();

        for_each_row(&dir.join("alignments.tsv"), 14, |path, n, f| {
            let unit = parse_alignment_fields(&f[2..], path, n)?;
            store.add_alignment(f[0], f[1], unit);
            Ok(())
        })?;
        for_each_row(&dir.join("gene_descriptions.tsv"), 3, |_, _, f| {
            store.add_gene_description(f[0], f[1], f[2]);
            Ok(())
        })?;
        for (table, slot) in [("go.tsv", 0), ("interpro.tsv", 1), ("mapman.tsv", 2)] {
            for_each_row(&dir.join(table), 4, |_, _, f| {
                let xref = CrossReference {
                    id: f[2].to_string(),
                    description: f[3].to_string(),
                    species: f.get(4).and_then(|s| optional(s)),
                };
                match slot {
                    0 => store.add_go(f[0], f[1], xref),
                    1 => store.add_interpro(f[0], f[1], xref),
                    _ => store.add_mapman(f[0], f[1], xref),
                }
                Ok(())
            })?;
        }
        for_each_row(&dir.join("go_xrefs.tsv"), 4, |path, n, f| {
            let target = XrefDb::from_name(f[1]).ok_or_else(|| {
                AnnotError::format(path, n, format!("unknown cross-reference database `{}`", f[1]))
            })?;
            store.add_go_xref(f[0], target, CrossReference::new(f[2], f[3]));
            Ok(())
        })?;
        for_each_row(&dir.join("gene2go.tsv"), 3, |_, _, f| {
            store.add_gene2go(f[0], CrossReference::new(f[1], f[2]));
            Ok(())
        })?;
        for_each_row(&dir.join("gene2refseq.tsv"), 3, |_, _, f| {
            store.add_gene2refseq(
                f[0],
                RefSeqGene {
                    gene_id: f[1].to_string(),
                    tax_id: f[2].to_string(),
                    species: f.get(3).and_then(|s| optional(s)),
                },
            );
            Ok(())
        })?;
        for_each_row(&dir.join("interpro2go.tsv"), 2, |_, _, f| {
            store.add_interpro2go(f[0], f[1]);
            Ok(())
        })?;
        for_each_row(&dir.join("species.tsv"), 6, |_, _, f| {
            store.add_species(TaxonomyRecord {
                species_name: f[0].to_string(),
                family: f[1].to_string(),
                phylum: f[2].to_string(),
                kingdom: f[3].to_string(),
                superkingdom: f[4].to_string(),
                tax_id: f[5].to_string(),
            });
            Ok(())
        })?;
        for_each_row(&dir.join("ontology.tsv"), 3, |_, _, f| {
            store.add_ontology_term(f[0], f[1], f[2]);
            Ok(())
        })?;
        for_each_row(&dir.join("term_descriptions.tsv"), 3, |path, n, f| {
            let kind = OntologyKind::from_slug(f[0]).ok_or_else(|| {
                AnnotError::format(path, n, format!("unknown category `{}`", f[0]))
            })?;
            store.add_term_description(kind, f[1], f[2]);
            Ok(())
        })?;

        store.species_file = Some(dir.join("species.tsv"));
        log::info!(
            "Loaded annotation store from {}: {} alignment groups, {} species",
            dir.display(),
            store.alignments.len(),
            store.species.len()
        );
        Ok(store)
    }
}

/// Calls `f` with the tab-separated fields of every data line of `path`.
/// Lines with fewer than `min_fields` fields are format errors.
fn for_each_row<F>(path: &Path, min_fields: usize, mut f: F) -> Result<()>
where
    F: FnMut(&Path, u64, &[&str]) -> Result<()>,
{
    if !path.exists() {
        return Ok(());
    }
    let reader = open_input(path)?;
    for (idx, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| AnnotError::io(path, e))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let record = idx as u64 + 1;
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() < min_fields {
            return Err(AnnotError::format(
                path,
                record,
                format!("expected at least {min_fields} fields, found {}", fields.len()),
            ));
        }
        f(path, record, &fields)?;
    }
    Ok(())
}

fn parse_alignment_fields(f: &[&str], path: &Path, record: u64) -> Result<AlignmentUnit> {
    fn num<T: std::str::FromStr>(s: &str, name: &str, path: &Path, record: u64) -> Result<T> {
        s.parse()
            .map_err(|_| AnnotError::format(path, record, format!("invalid {name} `{s}`")))
    }
    let hsp_evalue: f64 = num(f[6], "hsp_evalue", path, record)?;
    if hsp_evalue.is_nan() || hsp_evalue < 0.0 {
        return Err(AnnotError::format(path, record, format!("invalid hsp_evalue `{}`", f[6])));
    }
    Ok(AlignmentUnit {
        iteration_num: num(f[0], "iteration_num", path, record)?,
        hit_num: num(f[1], "hit_num", path, record)?,
        hit_id: f[2].to_string(),
        hit_definition: f[3].to_string(),
        hit_accession: f[4].to_string(),
        hsp_num: num(f[5], "hsp_num", path, record)?,
        hsp_evalue,
        hsp_identity: num(f[7], "hsp_identity", path, record)?,
        hsp_positive: num(f[8], "hsp_positive", path, record)?,
        hsp_gaps: num(f[9], "hsp_gaps", path, record)?,
        hsp_align_len: num(f[10], "hsp_align_len", path, record)?,
        hsp_query_seq: f[11].to_string(),
    })
}

fn lookup_gene(
    table: &AHashMap<GeneKey, Vec<CrossReference>>,
    dataset: &str,
    gene_id: &str,
) -> Vec<CrossReference> {
    table.get(&key(dataset, gene_id)).cloned().unwrap_or_default()
}

impl AnnotationStore for MemoryStore {
    fn lookup_alignments(&self, dataset: &str, sequence_id: &str) -> Result<Vec<AlignmentUnit>> {
        Ok(self
            .alignments
            .get(&key(dataset, sequence_id))
            .cloned()
            .unwrap_or_default())
    }

    fn lookup_gene_description(&self, dataset: &str, gene_id: &str) -> Result<Option<String>> {
        Ok(self.gene_descriptions.get(&key(dataset, gene_id)).cloned())
    }

    fn lookup_go(&self, dataset: &str, gene_id: &str) -> Result<Vec<CrossReference>> {
        Ok(lookup_gene(&self.go, dataset, gene_id))
    }

    fn lookup_interpro(&self, dataset: &str, gene_id: &str) -> Result<Vec<CrossReference>> {
        Ok(lookup_gene(&self.interpro, dataset, gene_id))
    }

    fn lookup_mapman(&self, dataset: &str, gene_id: &str) -> Result<Vec<CrossReference>> {
        Ok(lookup_gene(&self.mapman, dataset, gene_id))
    }

    fn lookup_cross_references(
        &self,
        go_ids: &[String],
        target: XrefDb,
    ) -> Result<Vec<CrossReference>> {
        let mut seen = ahash::AHashSet::new();
        let mut out = Vec::new();
        for go_id in go_ids {
            if let Some(entries) = self.go_xrefs.get(&(go_id.clone(), target)) {
                for entry in entries {
                    if seen.insert(entry.id.clone()) {
                        out.push(entry.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    fn lookup_gene2go(&self, gene_id: &str) -> Result<Vec<CrossReference>> {
        Ok(self.gene2go.get(gene_id).cloned().unwrap_or_default())
    }

    fn lookup_gene2refseq(&self, protein_accession: &str) -> Result<Option<RefSeqGene>> {
        Ok(self.gene2refseq.get(protein_accession).cloned())
    }

    fn lookup_interpro2go(&self, interpro_id: &str) -> Result<Vec<String>> {
        Ok(self.interpro2go.get(interpro_id).cloned().unwrap_or_default())
    }

    fn lookup_species_taxonomy(&self, species_name: &str) -> Result<Option<TaxonomyRecord>> {
        Ok(self.species.get(species_name).cloned())
    }

    fn upsert_species_taxonomy(&mut self, record: &TaxonomyRecord) -> Result<()> {
        if let Some(path) = &self.species_file {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AnnotError::io(path, e))?;
            writeln!(
                file,
                "{}\t{}\t{}\t{}\t{}\t{}",
                record.species_name,
                record.family,
                record.phylum,
                record.kingdom,
                record.superkingdom,
                record.tax_id
            )
            .map_err(|e| AnnotError::io(path, e))?;
        }
        self.species.insert(record.species_name.clone(), record.clone());
        Ok(())
    }

    fn lookup_ontology_term(&self, go_id: &str) -> Result<Option<OntologyTerm>> {
        Ok(self.ontology.get(go_id).cloned())
    }

    fn lookup_term_description(&self, kind: OntologyKind, id: &str) -> Result<Option<String>> {
        if let Some(desc) = self.term_descriptions.get(&(kind, id.to_string())) {
            return Ok(Some(desc.clone()));
        }
        match kind {
            OntologyKind::Go => Ok(self.ontology.get(id).map(|t| t.name.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_references_are_unique() {
        let mut store = MemoryStore::new();
        store.add_go_xref("GO:1", XrefDb::Ec, CrossReference::new("EC:1.1.1.1", "dehydrogenase"));
        store.add_go_xref("GO:2", XrefDb::Ec, CrossReference::new("EC:1.1.1.1", "dehydrogenase"));
        store.add_go_xref("GO:2", XrefDb::Kegg, CrossReference::new("R00001", "reaction"));

        let ids = vec!["GO:1".to_string(), "GO:2".to_string()];
        let ec = store.lookup_cross_references(&ids, XrefDb::Ec).unwrap();
        assert_eq!(ec.len(), 1);
        assert!(store.lookup_cross_references(&ids, XrefDb::MetaCyc).unwrap().is_empty());
    }

    #[test]
    fn test_load_dir_rejects_bad_evalue() {
        for evalue in ["NaN", "-1e-5"] {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(
                dir.path().join("alignments.tsv"),
                format!(
                    "plaza\tseq1\t1\t1\tid1\tAT1G01010\t123\t1\t{evalue}\t90\t95\t0\t100\tMKV\n"
                ),
            )
            .unwrap();
            match MemoryStore::load_dir(dir.path()) {
                Err(AnnotError::Format { record, message, .. }) => {
                    assert_eq!(record, 1);
                    assert!(message.contains("hsp_evalue"));
                }
                other => panic!("expected format error for {evalue}, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_load_dir_and_upsert() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("alignments.tsv"),
            concat!(
                "# dataset\tseq\t...\n",
                "plaza\tseq1\t1\t1\tid1\tAT1G01010\t123\t1\t1e-30\t90\t95\t0\t100\tMKV\n",
            ),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("go.tsv"),
            "plaza\tAT1G01010\tGO:0008150\tbiological_process\tArabidopsis thaliana\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("ontology.tsv"),
            "GO:0008150\tbiological_process\tP\n",
        )
        .unwrap();

        let mut store = MemoryStore::load_dir(dir.path()).unwrap();
        let hits = store.lookup_alignments("plaza", "seq1").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hsp_evalue, 1e-30);

        let go = store.lookup_go("plaza", "AT1G01010").unwrap();
        assert_eq!(go[0].species.as_deref(), Some("Arabidopsis thaliana"));
        assert_eq!(
            store.lookup_term_description(OntologyKind::Go, "GO:0008150").unwrap().as_deref(),
            Some("biological_process")
        );

        let mut rec = TaxonomyRecord::unresolved("Zea mays");
        rec.kingdom = "Viridiplantae".to_string();
        store.upsert_species_taxonomy(&rec).unwrap();

        let reloaded = MemoryStore::load_dir(dir.path()).unwrap();
        assert_eq!(
            reloaded.lookup_species_taxonomy("Zea mays").unwrap().unwrap().kingdom,
            "Viridiplantae"
        );
    }

    #[test]
    fn test_short_row_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ontology.tsv"), "GO:1\tonly-two\n").unwrap();
        match MemoryStore::load_dir(dir.path()) {
            Err(AnnotError::Format { record, .. }) => assert_eq!(record, 1),
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }
}
