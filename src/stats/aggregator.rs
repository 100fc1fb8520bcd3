// src/stats/aggregator.rs

use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::annotation::row::AnnotationRow;
use crate::error::{AnnotError, Result};
use crate::types::OntologyKind;

/// Per-key counters:
///   - `all`: every HSP row carrying the key
///   - `first_hsp`: only rows with `hsp_num == 1`
///   - `min_evalue`: once per sequence whose best row carried the key
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatCounter {
    pub all: u64,
    pub first_hsp: u64,
    pub min_evalue: u64,
}

impl StatCounter {
    pub fn add(&mut self, other: &StatCounter) {
        self.all += other.all;
        self.first_hsp += other.first_hsp;
        self.min_evalue += other.min_evalue;
    }
}

pub type CounterMap = AHashMap<String, StatCounter>;

/// Key -> number of occurrences, ordered by key.
pub type Histogram = BTreeMap<usize, u64>;

/// Everything counted over one consolidated annotation stream.
#[derive(Default, Debug, Clone)]
pub struct Statistics {
    pub species: CounterMap,
    pub family: CounterMap,
    pub phylum: CounterMap,
    /// Indexed by `OntologyKind::index`.
    pub ontologies: [CounterMap; 6],
    /// HSPs in a hit -> number of hits.
    pub hsp_per_hit: Histogram,
    /// Distinct ids in a sequence -> number of sequences, per ontology.
    pub ids_per_seq: [Histogram; 6],
    /// First description seen next to each id, per ontology.
    pub row_descriptions: [AHashMap<String, String>; 6],
    pub sequences: u64,
    pub hits: u64,
    pub hsps: u64,
}

impl Statistics {
    pub fn ontology(&self, kind: OntologyKind) -> &CounterMap {
        &self.ontologies[kind.index()]
    }

    pub fn ids_per_seq(&self, kind: OntologyKind) -> &Histogram {
        &self.ids_per_seq[kind.index()]
    }
}

/// Category values of the row with the lowest e-value seen so far.
#[derive(Debug, Clone)]
struct MinEvalueSnapshot {
    species: String,
    family: String,
    phylum: String,
    ids: [Vec<String>; 6],
}

#[derive(Debug)]
struct SequenceGroup {
    seq_id: String,
    hit_num: u32,
    hsps_in_hit: usize,
    min_evalue: f64,
    snapshot: Option<MinEvalueSnapshot>,
    distinct: [AHashSet<String>; 6],
}

impl SequenceGroup {
    fn open(seq_id: &str, hit_num: u32) -> Self {
        Self {
            seq_id: seq_id.to_string(),
            hit_num,
            hsps_in_hit: 0,
            min_evalue: f64::INFINITY,
            snapshot: None,
            distinct: Default::default(),
        }
    }
}

/// Distinct ids of each ontology in one row, first-seen order.
fn row_ids(row: &AnnotationRow) -> [Vec<String>; 6] {
    let mut out: [Vec<String>; 6] = Default::default();
    if let Some(functional) = row.functional() {
        for kind in OntologyKind::ALL {
            let ids = &mut out[kind.index()];
            for id in functional.ids(kind).values() {
                if !ids.iter().any(|seen| seen == id) {
                    ids.push(id.to_string());
                }
            }
        }
    }
    out
}

fn bump(map: &mut CounterMap, key: &str, first_hsp: bool) {
    let counter = map.entry(key.to_string()).or_default();
    counter.all += 1;
    if first_hsp {
        counter.first_hsp += 1;
    }
}

/// Single-pass grouped aggregation over rows arriving grouped by sequence id,
/// hits as consecutive runs of equal `hit_num`.
///
/// A sequence id that shows up again after its group closed is rejected.
/// Every closed sequence id is kept until the run ends, so memory grows with
/// the number of distinct sequences in the file, not with the number of rows.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: Statistics,
    current: Option<SequenceGroup>,
    closed: AHashSet<String>,
    source: PathBuf,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `source` names the input in `Ungrouped` errors.
    pub fn for_source(source: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Feed one HSP row. `record` is its 1-based position in the input.
    pub fn push(&mut self, record: u64, row: &AnnotationRow) -> Result<()> {
        let core = row.core();
        let seq_id = core.ids.transcript_id.as_str();
        let hit_num = core.alignment.hit_num;

        // 1) sequence group boundary
        let same_seq = self.current.as_ref().map(|g| g.seq_id == seq_id).unwrap_or(false);
        if !same_seq {
            self.close_sequence();
            if self.closed.contains(seq_id) {
                return Err(AnnotError::Ungrouped {
                    file: self.source.clone(),
                    record,
                    seq_id: seq_id.to_string(),
                });
            }
            self.current = Some(SequenceGroup::open(seq_id, hit_num));
        }

        let stats = &mut self.stats;
        let Some(group) = self.current.as_mut() else {
            return Ok(());
        };

        // 2) hit group boundary inside the sequence
        if group.hit_num != hit_num {
            if group.hsps_in_hit > 0 {
                *stats.hsp_per_hit.entry(group.hsps_in_hit).or_insert(0) += 1;
                stats.hits += 1;
            }
            group.hit_num = hit_num;
            group.hsps_in_hit = 0;
        }
        group.hsps_in_hit += 1;
        stats.hsps += 1;

        // 3) per-HSP counters
        let first_hsp = core.alignment.hsp_num == 1;
        let tax = &core.taxonomy;
        bump(&mut stats.species, &tax.species_name, first_hsp);
        bump(&mut stats.family, &tax.family, first_hsp);
        bump(&mut stats.phylum, &tax.phylum, first_hsp);

        let ids = row_ids(row);
        for kind in OntologyKind::ALL {
            let k = kind.index();
            for id in &ids[k] {
                bump(&mut stats.ontologies[k], id, first_hsp);
                group.distinct[k].insert(id.clone());
            }
        }
        if let Some(functional) = row.functional() {
            for kind in OntologyKind::ALL {
                let known = &mut stats.row_descriptions[kind.index()];
                let descriptions = functional.descriptions(kind).values();
                let pairs = functional.ids(kind).values().zip(descriptions);
                for (id, desc) in pairs {
                    if !known.contains_key(id) {
                        known.insert(id.to_string(), desc.to_string());
                    }
                }
            }
        }

        // strict: ties keep the earliest row
        if core.alignment.hsp_evalue < group.min_evalue {
            group.min_evalue = core.alignment.hsp_evalue;
            group.snapshot = Some(MinEvalueSnapshot {
                species: tax.species_name.clone(),
                family: tax.family.clone(),
                phylum: tax.phylum.clone(),
                ids,
            });
        }
        Ok(())
    }

    fn close_sequence(&mut self) {
        let Some(group) = self.current.take() else {
            return;
        };
        let stats = &mut self.stats;

        if group.hsps_in_hit > 0 {
            *stats.hsp_per_hit.entry(group.hsps_in_hit).or_insert(0) += 1;
            stats.hits += 1;
        }

        if let Some(snapshot) = &group.snapshot {
            stats.species.entry(snapshot.species.clone()).or_default().min_evalue += 1;
            stats.family.entry(snapshot.family.clone()).or_default().min_evalue += 1;
            stats.phylum.entry(snapshot.phylum.clone()).or_default().min_evalue += 1;
            for kind in OntologyKind::ALL {
                let k = kind.index();
                for id in &snapshot.ids[k] {
                    stats.ontologies[k].entry(id.clone()).or_default().min_evalue += 1;
                }
            }
        }

        for kind in OntologyKind::ALL {
            let k = kind.index();
            *stats.ids_per_seq[k].entry(group.distinct[k].len()).or_insert(0) += 1;
        }
        stats.sequences += 1;
        self.closed.insert(group.seq_id);
    }

    /// Close the last open group and hand back the counts.
    pub fn finish(mut self) -> Statistics {
        self.close_sequence();
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::row::tests::row_core;
    use crate::annotation::row::FunctionalAnnotation;
    use crate::types::CrossReference;

    fn row(
        seq: &str,
        hit: u32,
        hsp: u32,
        evalue: f64,
        species: &str,
        go: &[&str],
    ) -> AnnotationRow {
        let mut functional = FunctionalAnnotation::new();
        let entries: Vec<CrossReference> =
            go.iter().map(|id| CrossReference::new(id, "term")).collect();
        functional.add("GO", OntologyKind::Go, &entries);
        AnnotationRow::Plaza {
            core: row_core(seq, hit, hsp, evalue, species),
            gene_id: "G".to_string(),
            description: "d".to_string(),
            functional,
        }
    }

    fn run(rows: &[AnnotationRow]) -> Result<Statistics> {
        let mut agg = StatsAggregator::new();
        for (i, r) in rows.iter().enumerate() {
            agg.push(i as u64 + 1, r)?;
        }
        Ok(agg.finish())
    }

    #[test]
    fn test_min_evalue_picks_best_hit() {
        let stats = run(&[
            row("S", 1, 1, 1e-10, "A", &["GO:0008150"]),
            row("S", 2, 1, 1e-50, "B", &["GO:0003674"]),
        ])
        .unwrap();
        let go = stats.ontology(OntologyKind::Go);
        assert_eq!(go["GO:0003674"], StatCounter { all: 1, first_hsp: 1, min_evalue: 1 });
        assert_eq!(go["GO:0008150"], StatCounter { all: 1, first_hsp: 1, min_evalue: 0 });
        assert_eq!(stats.species["B"].min_evalue, 1);
        assert_eq!(stats.species["A"].min_evalue, 0);
    }

    #[test]
    fn test_min_evalue_tie_keeps_first_row() {
        let stats = run(&[
            row("S", 1, 1, 1e-30, "A", &["GO:1"]),
            row("S", 2, 1, 1e-30, "B", &["GO:2"]),
        ])
        .unwrap();
        assert_eq!(stats.species["A"].min_evalue, 1);
        assert_eq!(stats.species["B"].min_evalue, 0);
    }

    #[test]
    fn test_min_evalue_counts_once_per_sequence() {
        // the same id on two rows sharing the minimum is counted once
        let stats = run(&[
            row("S", 1, 1, 1e-30, "A", &["GO:1", "GO:1"]),
            row("S", 1, 2, 1e-30, "A", &["GO:1"]),
        ])
        .unwrap();
        let go = stats.ontology(OntologyKind::Go);
        assert_eq!(go["GO:1"], StatCounter { all: 2, first_hsp: 1, min_evalue: 1 });
    }

    #[test]
    fn test_histograms() {
        let stats = run(&[
            row("S1", 1, 1, 1e-5, "A", &["GO:1"]),
            row("S1", 1, 2, 1e-6, "A", &["GO:2"]),
            row("S1", 2, 1, 1e-7, "A", &[]),
            row("S2", 1, 1, 1e-5, "A", &[]),
        ])
        .unwrap();
        assert_eq!(stats.hsp_per_hit.get(&2), Some(&1));
        assert_eq!(stats.hsp_per_hit.get(&1), Some(&2));
        // histogram total == number of (sequence, hit) groups
        assert_eq!(stats.hsp_per_hit.values().sum::<u64>(), 3);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.hsps, 4);
        assert_eq!(stats.sequences, 2);

        let go_hist = stats.ids_per_seq(OntologyKind::Go);
        assert_eq!(go_hist.get(&2), Some(&1));
        assert_eq!(go_hist.get(&0), Some(&1));
    }

    #[test]
    fn test_not_available_is_counted() {
        let stats = run(&[row("S", 1, 1, 1e-5, "N/A", &[])]).unwrap();
        assert_eq!(stats.species["N/A"].all, 1);
        assert_eq!(stats.family["N/A"].all, 1);
    }

    #[test]
    fn test_reopened_sequence_is_rejected() {
        let err = run(&[
            row("S1", 1, 1, 1e-5, "A", &[]),
            row("S2", 1, 1, 1e-5, "A", &[]),
            row("S1", 2, 1, 1e-5, "A", &[]),
        ])
        .unwrap_err();
        match err {
            AnnotError::Ungrouped { record, seq_id, .. } => {
                assert_eq!(record, 3);
                assert_eq!(seq_id, "S1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
