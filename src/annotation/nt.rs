// src/annotation/nt.rs

use super::row::{AnnotationRow, RowCore};
use crate::error::Result;
use crate::ids::{parse_nt_definition, resolve_protein_accession};
use crate::store::AnnotationStore;
use crate::taxonomy::{TaxonomyResolver, TaxonomyService};
use crate::types::{Aligner, AlignmentUnit, DatasetFamily, SequenceIdentifierTriple, TaxonomyRecord};

/// Kingdom whose hits count as the expected organism group.
pub const PLANT_KINGDOM: &str = "Viridiplantae";

/// Where an NT/NR row is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Plant,
    Contamination,
}

pub fn route_for(taxonomy: &TaxonomyRecord) -> Route {
    if taxonomy.kingdom == PLANT_KINGDOM {
        Route::Plant
    } else {
        Route::Contamination
    }
}

/// Build the row for one NT/NR hit. No cross-reference probing happens here:
/// every hit is annotated and only its taxonomy decides the route.
pub fn nucleotide_row<A: AnnotationStore, S: TaxonomyService>(
    family: DatasetFamily,
    aligner: Aligner,
    ids: &SequenceIdentifierTriple,
    unit: &AlignmentUnit,
    store: &mut A,
    taxonomy: &mut TaxonomyResolver<S>,
) -> Result<(AnnotationRow, Route)> {
    let parsed = match family {
        DatasetFamily::Nt => parse_nt_definition(aligner, &unit.hit_id, &unit.hit_definition)?,
        _ => resolve_protein_accession(aligner, &unit.hit_id, &unit.hit_definition)?,
    };
    let tax = taxonomy.resolve(&parsed.species, store)?;
    let route = route_for(&tax);

    let core = RowCore {
        ids: ids.clone(),
        alignment: unit.clone(),
        taxonomy: tax,
    };
    let row = match family {
        DatasetFamily::Nt => AnnotationRow::Nt {
            core,
            accession: parsed.accession,
            description: parsed.description,
        },
        _ => AnnotationRow::Nr {
            core,
            accession: parsed.accession,
            description: parsed.description,
        },
    };
    Ok((row, route))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::merger::tests::unit;
    use crate::annotation::merger::{merge_annotations, MergeOptions};
    use crate::annotation::row::AnnotationReader;
    use crate::store::MemoryStore;
    use crate::taxonomy::OfflineTaxonomy;

    fn plant(name: &str) -> TaxonomyRecord {
        let mut rec = TaxonomyRecord::unresolved(name);
        rec.kingdom = PLANT_KINGDOM.to_string();
        rec
    }

    #[test]
    fn test_route_by_kingdom() {
        assert_eq!(route_for(&plant("Zea mays")), Route::Plant);
        assert_eq!(route_for(&TaxonomyRecord::virus("Maize streak virus")), Route::Contamination);
        assert_eq!(route_for(&TaxonomyRecord::unresolved("Homo sapiens")), Route::Contamination);
    }

    #[test]
    fn test_nr_streams() {
        let dir = tempfile::tempdir().unwrap();
        let seqs = dir.path().join("seqs.fasta");
        std::fs::write(&seqs, ">c1\nACGT\n>c2\nGGGG\n>c3\nTTTT\n").unwrap();

        let mut store = MemoryStore::new();
        store.add_species(plant("Zea mays"));
        store.add_species(TaxonomyRecord::unresolved("Homo sapiens"));
        // c1 hits both a plant and a human protein
        store.add_alignment(
            "nr",
            "c1",
            unit(1, 1, 1e-50, "ref|XP_1.1|", "kinase [Zea mays]", "XP_1"),
        );
        store.add_alignment(
            "nr",
            "c1",
            unit(2, 1, 1e-10, "ref|NP_2.1|", "kinase [Homo sapiens]", "NP_2"),
        );
        // c2 only hits a virus
        store.add_alignment(
            "nr",
            "c2",
            unit(1, 1, 1e-12, "ref|YP_3.1|", "coat protein [Maize streak virus]", "YP_3"),
        );

        let mut opts = MergeOptions::new(
            "nr",
            DatasetFamily::Nr,
            Aligner::BlastPlus,
            &seqs,
            dir.path().join("nr.csv"),
            dir.path().join("nonann.fasta"),
        );
        opts.contamination = Some(dir.path().join("contam.csv"));
        let mut resolver = TaxonomyResolver::new(OfflineTaxonomy);
        let summary = merge_annotations(&opts, &mut store, &mut resolver).unwrap();

        assert_eq!(summary.annotated, 2);
        assert_eq!(summary.non_annotated, 1);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(summary.contamination_rows, 2);
        assert_eq!(summary.in_both_streams, vec!["c1".to_string()]);

        let contam: Vec<AnnotationRow> = AnnotationReader::open(dir.path().join("contam.csv"))
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(contam.len(), 2);
        assert_eq!(contam[1].core().taxonomy.kingdom, "Virus");
        assert!(contam.iter().all(|r| r.functional().is_none()));

        assert_eq!(std::fs::read_to_string(&opts.non_annotated).unwrap(), ">c3\nTTTT\n");
    }
}
