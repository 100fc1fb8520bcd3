// src/stats/report.rs

use std::path::{Path, PathBuf};

use super::aggregator::{CounterMap, Histogram, StatCounter, Statistics};
use crate::annotation::row::{delimited_writer, finish_writer};
use crate::error::{AnnotError, Result};
use crate::store::AnnotationStore;
use crate::types::{OntologyKind, NOT_AVAILABLE};

const COUNT_COLUMNS: [&str; 3] = ["all_count", "first_hsp_count", "min_evalue_count"];

/// `<dir>/<category>-<base_name>.csv`
pub fn report_path(dir: &Path, category: &str, base_name: &str) -> PathBuf {
    dir.join(format!("{category}-{base_name}.csv"))
}

/// Counter entries ordered by `all` descending, then id ascending.
pub fn sorted_counters(counters: &CounterMap) -> Vec<(&str, StatCounter)> {
    let mut rows: Vec<(&str, StatCounter)> =
        counters.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    rows.sort_by(|a, b| b.1.all.cmp(&a.1.all).then_with(|| a.0.cmp(b.0)));
    rows
}

fn count_fields(counter: &StatCounter) -> [String; 3] {
    [
        counter.all.to_string(),
        counter.first_hsp.to_string(),
        counter.min_evalue.to_string(),
    ]
}

/// `id;all_count;first_hsp_count;min_evalue_count`
pub fn write_counter_file(path: &Path, counters: &CounterMap) -> Result<()> {
    let mut writer = delimited_writer(path)?;
    let csv_err = |e| AnnotError::csv(path, e);

    let mut header = vec!["id"];
    header.extend(COUNT_COLUMNS);
    writer.write_record(&header).map_err(csv_err)?;

    for (id, counter) in sorted_counters(counters) {
        let [all, first, min] = count_fields(&counter);
        writer.write_record([id, all.as_str(), first.as_str(), min.as_str()]).map_err(csv_err)?;
    }
    finish_writer(writer, path)
}

/// `id;description;all_count;first_hsp_count;min_evalue_count`
pub fn write_described_counter_file<F>(
    path: &Path,
    counters: &CounterMap,
    mut describe: F,
) -> Result<()>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut writer = delimited_writer(path)?;
    let csv_err = |e| AnnotError::csv(path, e);

    let mut header = vec!["id", "description"];
    header.extend(COUNT_COLUMNS);
    writer.write_record(&header).map_err(csv_err)?;

    for (id, counter) in sorted_counters(counters) {
        let description = describe(id)?;
        let [all, first, min] = count_fields(&counter);
        writer
            .write_record([id, description.as_str(), all.as_str(), first.as_str(), min.as_str()])
            .map_err(csv_err)?;
    }
    finish_writer(writer, path)
}

/// Two-column histogram, keys ascending.
pub fn write_histogram_file(path: &Path, header: [&str; 2], histogram: &Histogram) -> Result<()> {
    let mut writer = delimited_writer(path)?;
    let csv_err = |e| AnnotError::csv(path, e);

    writer.write_record(header).map_err(csv_err)?;
    for (key, count) in histogram {
        writer
            .write_record([key.to_string(), count.to_string()])
            .map_err(csv_err)?;
    }
    finish_writer(writer, path)
}

/// Sum GO counters by the namespace of each term.
pub fn namespace_rollup<A: AnnotationStore + ?Sized>(
    go: &CounterMap,
    store: &A,
) -> Result<CounterMap> {
    let mut out = CounterMap::new();
    for (go_id, counter) in go {
        let namespace = match store.lookup_ontology_term(go_id)? {
            Some(term) => term.namespace,
            None => NOT_AVAILABLE.to_string(),
        };
        out.entry(namespace).or_default().add(counter);
    }
    Ok(out)
}

/// Write every statistics file into `dir` and return their paths in write order.
pub fn write_reports<A: AnnotationStore + ?Sized>(
    stats: &Statistics,
    store: &A,
    dir: &Path,
    base_name: &str,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for (category, counters) in [
        ("species", &stats.species),
        ("family", &stats.family),
        ("phylum", &stats.phylum),
    ] {
        let path = report_path(dir, category, base_name);
        write_counter_file(&path, counters)?;
        files.push(path);
    }

    for kind in OntologyKind::ALL {
        let path = report_path(dir, kind.slug(), base_name);
        let seen = &stats.row_descriptions[kind.index()];
        write_described_counter_file(&path, stats.ontology(kind), |id| {
            if let Some(desc) = store.lookup_term_description(kind, id)? {
                return Ok(desc);
            }
            Ok(seen.get(id).cloned().unwrap_or_else(|| NOT_AVAILABLE.to_string()))
        })?;
        files.push(path);
    }

    let namespaces = namespace_rollup(stats.ontology(OntologyKind::Go), store)?;
    let path = report_path(dir, "namespace", base_name);
    write_counter_file(&path, &namespaces)?;
    files.push(path);

    let path = report_path(dir, "hit-per-hsp", base_name);
    write_histogram_file(&path, ["hsp_count", "hit_count"], &stats.hsp_per_hit)?;
    files.push(path);

    for kind in OntologyKind::ALL {
        let path = report_path(dir, &format!("{}-per-seq", kind.slug()), base_name);
        write_histogram_file(&path, ["id_count", "seq_count"], stats.ids_per_seq(kind))?;
        files.push(path);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn counter(all: u64, first_hsp: u64, min_evalue: u64) -> StatCounter {
        StatCounter { all, first_hsp, min_evalue }
    }

    #[test]
    fn test_counter_order() {
        let mut map = CounterMap::new();
        map.insert("b".to_string(), counter(2, 1, 0));
        map.insert("a".to_string(), counter(2, 0, 0));
        map.insert("c".to_string(), counter(5, 1, 1));
        let ids: Vec<&str> = sorted_counters(&map).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_counter_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("species-x.csv");
        let mut map = CounterMap::new();
        map.insert("Zea mays".to_string(), counter(3, 2, 1));
        write_counter_file(&path, &map).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "\"id\";\"all_count\";\"first_hsp_count\";\"min_evalue_count\"\n\"Zea mays\";3;2;1\n"
        );
    }

    #[test]
    fn test_namespace_rollup() {
        let mut store = MemoryStore::new();
        store.add_ontology_term("GO:1", "a", "biological_process");
        store.add_ontology_term("GO:2", "b", "biological_process");
        let mut go = CounterMap::new();
        go.insert("GO:1".to_string(), counter(2, 1, 1));
        go.insert("GO:2".to_string(), counter(1, 1, 0));
        go.insert("GO:3".to_string(), counter(4, 0, 0));

        let ns = namespace_rollup(&go, &store).unwrap();
        assert_eq!(ns["biological_process"], counter(3, 2, 1));
        assert_eq!(ns["N/A"], counter(4, 0, 0));
    }

    #[test]
    fn test_histogram_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hit-per-hsp-x.csv");
        let mut hist = Histogram::new();
        hist.insert(3, 1);
        hist.insert(1, 4);
        write_histogram_file(&path, ["hsp_count", "hit_count"], &hist).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "\"hsp_count\";\"hit_count\"\n1;4\n3;1\n"
        );
    }
}
