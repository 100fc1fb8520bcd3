//src/types.rs

use std::fmt;
use std::str::FromStr;

/// Sentinel written wherever a value could not be resolved.
pub const NOT_AVAILABLE: &str = "N/A";

/// The three identifiers a query sequence is known by.
/// Computed once from the FASTA header and the optional id-relationship maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceIdentifierTriple {
    pub transcript_id: String,
    pub nucleotide_id: String,
    pub protein_id: String,
}

/// A structured representation of one BLAST hit/HSP combination.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentUnit {
    pub iteration_num: u32,
    pub hit_num: u32,
    pub hit_id: String,
    pub hit_definition: String,
    pub hit_accession: String,
    pub hsp_num: u32,
    pub hsp_evalue: f64,
    pub hsp_identity: u32,
    pub hsp_positive: u32,
    pub hsp_gaps: u32,
    pub hsp_align_len: u32,
    pub hsp_query_seq: String,
}

/// Taxonomy of one species name, `N/A` where unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyRecord {
    pub species_name: String,
    pub family: String,
    pub phylum: String,
    pub kingdom: String,
    pub superkingdom: String,
    pub tax_id: String,
}

impl TaxonomyRecord {
    /// Record for a species name nobody could resolve.
    pub fn unresolved(species_name: &str) -> Self {
        Self {
            species_name: species_name.to_string(),
            family: NOT_AVAILABLE.to_string(),
            phylum: NOT_AVAILABLE.to_string(),
            kingdom: NOT_AVAILABLE.to_string(),
            superkingdom: NOT_AVAILABLE.to_string(),
            tax_id: NOT_AVAILABLE.to_string(),
        }
    }

    /// Synthetic taxonomy used for every species name mentioning a virus.
    pub fn virus(species_name: &str) -> Self {
        Self {
            species_name: species_name.to_string(),
            family: "Virus".to_string(),
            phylum: "Virus".to_string(),
            kingdom: "Virus".to_string(),
            superkingdom: "Virus".to_string(),
            tax_id: NOT_AVAILABLE.to_string(),
        }
    }

    /// Placeholder for rows whose taxonomy was never looked up.
    pub fn empty() -> Self {
        Self::unresolved(NOT_AVAILABLE)
    }

    /// True once any rank above species is known.
    pub fn is_resolved(&self) -> bool {
        [&self.family, &self.phylum, &self.kingdom, &self.superkingdom]
            .iter()
            .any(|rank| rank.as_str() != NOT_AVAILABLE)
    }
}

/// One id/description pair returned by a cross-reference lookup.
/// `species` links the entry back to the organism it was annotated in, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossReference {
    pub id: String,
    pub description: String,
    pub species: Option<String>,
}

impl CrossReference {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            species: None,
        }
    }
}

/// The gene a RefSeq protein accession belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSeqGene {
    pub gene_id: String,
    pub tax_id: String,
    pub species: Option<String>,
}

/// Name and namespace of a Gene Ontology term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyTerm {
    pub name: String,
    pub namespace: String,
}

/// Source database family of the alignment target. Decides layout and merge rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetFamily {
    Plaza,
    RefSeq,
    Nt,
    Nr,
}

impl DatasetFamily {
    pub fn tag(self) -> &'static str {
        match self {
            DatasetFamily::Plaza => "PLAZA",
            DatasetFamily::RefSeq => "REFSEQ",
            DatasetFamily::Nt => "NT",
            DatasetFamily::Nr => "NR",
        }
    }
}

impl fmt::Display for DatasetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DatasetFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAZA" => Ok(DatasetFamily::Plaza),
            "REFSEQ" => Ok(DatasetFamily::RefSeq),
            "NT" => Ok(DatasetFamily::Nt),
            "NR" => Ok(DatasetFamily::Nr),
            other => Err(format!("unknown dataset family `{other}`")),
        }
    }
}

/// Which alignment tool produced the hit text. The two write protein hits differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aligner {
    BlastPlus,
    Diamond,
}

impl FromStr for Aligner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blastplus" | "blast+" | "blast" => Ok(Aligner::BlastPlus),
            "diamond" => Ok(Aligner::Diamond),
            other => Err(format!("unknown aligner `{other}`")),
        }
    }
}

/// Databases reachable from a list of GO ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XrefDb {
    InterPro,
    Ec,
    Kegg,
    MetaCyc,
}

impl XrefDb {
    pub fn name(self) -> &'static str {
        match self {
            XrefDb::InterPro => "InterPro",
            XrefDb::Ec => "EC",
            XrefDb::Kegg => "KEGG",
            XrefDb::MetaCyc => "MetaCyc",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "interpro" => Some(XrefDb::InterPro),
            "ec" => Some(XrefDb::Ec),
            "kegg" => Some(XrefDb::Kegg),
            "metacyc" => Some(XrefDb::MetaCyc),
            _ => None,
        }
    }
}

/// The six functional categories counted by the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OntologyKind {
    Go,
    InterPro,
    MapMan,
    Ec,
    Kegg,
    MetaCyc,
}

impl OntologyKind {
    pub const ALL: [OntologyKind; 6] = [
        OntologyKind::Go,
        OntologyKind::InterPro,
        OntologyKind::MapMan,
        OntologyKind::Ec,
        OntologyKind::Kegg,
        OntologyKind::MetaCyc,
    ];

    /// Lower-case name used in statistics file names and store tables.
    pub fn slug(self) -> &'static str {
        match self {
            OntologyKind::Go => "go",
            OntologyKind::InterPro => "interpro",
            OntologyKind::MapMan => "mapman",
            OntologyKind::Ec => "ec",
            OntologyKind::Kegg => "kegg",
            OntologyKind::MetaCyc => "metacyc",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        OntologyKind::ALL
            .into_iter()
            .find(|kind| kind.slug().eq_ignore_ascii_case(slug))
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_tags_round_trip() {
        for family in [
            DatasetFamily::Plaza,
            DatasetFamily::RefSeq,
            DatasetFamily::Nt,
            DatasetFamily::Nr,
        ] {
            assert_eq!(family.tag().parse::<DatasetFamily>().unwrap(), family);
        }
        assert!("genbank".parse::<DatasetFamily>().is_err());
    }

    #[test]
    fn test_virus_record() {
        let rec = TaxonomyRecord::virus("Tobacco mosaic virus");
        assert_eq!(rec.kingdom, "Virus");
        assert_eq!(rec.superkingdom, "Virus");
        assert_eq!(rec.species_name, "Tobacco mosaic virus");
        assert!(rec.is_resolved());
        assert!(!TaxonomyRecord::unresolved("Zea mays").is_resolved());
    }

    #[test]
    fn test_ontology_slugs() {
        assert_eq!(OntologyKind::from_slug("KEGG"), Some(OntologyKind::Kegg));
        assert_eq!(OntologyKind::MetaCyc.index(), 5);
    }
}
