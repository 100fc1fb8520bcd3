//src/ids.rs

use ahash::AHashMap;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

use crate::error::{AnnotError, Result};
use crate::fasta::open_input;
use crate::types::{Aligner, DatasetFamily, SequenceIdentifierTriple, NOT_AVAILABLE};

/// old id -> new id, or transcript id -> predicted peptide id.
pub type IdMap = AHashMap<String, String>;

/// A hit field that does not follow the grammar of its aligner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no `[species]` suffix in `{0}`")]
    MissingSpecies(String),
    #[error("no accession in `{0}`")]
    MissingAccession(String),
    #[error("empty FASTA header")]
    EmptyHeader,
}

/// Accession, description and species pulled out of one protein hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinAccession {
    pub accession: String,
    pub description: String,
    pub species: String,
}

/// Parses a two column id-relationship file:
/// ```text
/// <from_id> <to_id>
/// ```
/// Columns may be separated by tabs or spaces; `#` lines are comments.
pub fn parse_id_map<P: AsRef<Path>>(filepath: P) -> Result<IdMap> {
    let path = filepath.as_ref();
    let reader = open_input(path)?;
    let mut map = IdMap::new();

    for (idx, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| AnnotError::io(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(from), Some(to)) => {
                map.insert(from.to_string(), to.to_string());
            }
            _ => {
                return Err(AnnotError::format(
                    path,
                    idx as u64 + 1,
                    "expected two identifier columns",
                ))
            }
        }
    }
    log::info!("Loaded {} id relationships from {}", map.len(), path.display());
    Ok(map)
}

/// Sequence id as the aligner saw it: header text up to the first whitespace.
pub fn raw_sequence_id(header_text: &str) -> std::result::Result<&str, ParseError> {
    let text = header_text.strip_prefix('>').unwrap_or(header_text);
    text.split_whitespace().next().ok_or(ParseError::EmptyHeader)
}

/// Derive the identifier triple of a query sequence from its FASTA header.
pub fn resolve_sequence_ids(
    header_text: &str,
    transcript_map: Option<&IdMap>,
    peptide_map: Option<&IdMap>,
) -> std::result::Result<SequenceIdentifierTriple, ParseError> {
    let raw_id = raw_sequence_id(header_text)?;

    let transcript_id = transcript_map
        .and_then(|m| m.get(raw_id))
        .map(String::as_str)
        .unwrap_or(raw_id)
        .to_string();

    let (nucleotide_id, protein_id) = match peptide_map.and_then(|m| m.get(&transcript_id)) {
        Some(peptide) => (transcript_id.clone(), peptide.clone()),
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
    };

    Ok(SequenceIdentifierTriple {
        transcript_id,
        nucleotide_id,
        protein_id,
    })
}

/// Gene id of a hit. A purely numeric accession is a surrogate key, so the id
/// lives in the definition instead. PLAZA keeps the whole field, REFSEQ the
/// part after the first `|`.
pub fn resolve_gene_id(family: DatasetFamily, hit_accession: &str, hit_def: &str) -> String {
    let accession = hit_accession.trim();
    let numeric = !accession.is_empty() && accession.bytes().all(|b| b.is_ascii_digit());
    let field = if numeric { hit_def } else { accession };

    match family {
        DatasetFamily::Plaza => field.trim().to_string(),
        DatasetFamily::RefSeq => match field.split_once('|') {
            Some((_, rest)) => rest.trim().to_string(),
            None => field.trim().to_string(),
        },
        DatasetFamily::Nt | DatasetFamily::Nr => accession.to_string(),
    }
}

/// NR titles may hold several merged definitions; keep the first.
fn first_title(hit_def: &str) -> &str {
    let cut = [hit_def.find(" >"), hit_def.find('\u{1}')]
        .into_iter()
        .flatten()
        .min();
    match cut {
        Some(pos) => &hit_def[..pos],
        None => hit_def,
    }
}

/// Splits `description [species]` into its two parts.
pub fn split_species_suffix(text: &str) -> std::result::Result<(String, String), ParseError> {
    let open = text
        .find('[')
        .ok_or_else(|| ParseError::MissingSpecies(text.to_string()))?;
    let close = text[open..]
        .find(']')
        .map(|p| open + p)
        .ok_or_else(|| ParseError::MissingSpecies(text.to_string()))?;
    let species = text[open + 1..close].trim();
    if species.is_empty() {
        return Err(ParseError::MissingSpecies(text.to_string()));
    }
    Ok((text[..open].trim().to_string(), species.to_string()))
}

/// Last non-empty `|` token of a BLAST+ hit id (`ref|XP_1.1|` -> `XP_1.1`).
fn pipe_accession(hit_id: &str) -> Option<&str> {
    hit_id
        .split('|')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()
}

/// Protein hit fields for the two aligner grammars.
///
/// BLAST+: accession in the pipe-delimited `hit_id`, `description [species]` in `hit_def`.
/// DIAMOND: `accession description [species]` all in `hit_def`.
pub fn resolve_protein_accession(
    aligner: Aligner,
    hit_id: &str,
    hit_def: &str,
) -> std::result::Result<ProteinAccession, ParseError> {
    let title = first_title(hit_def);
    match aligner {
        Aligner::BlastPlus => {
            let accession = pipe_accession(hit_id)
                .ok_or_else(|| ParseError::MissingAccession(hit_id.to_string()))?;
            let (description, species) = split_species_suffix(title)?;
            Ok(ProteinAccession {
                accession: accession.to_string(),
                description,
                species,
            })
        }
        Aligner::Diamond => {
            let title = title.trim_start();
            let (accession, rest) = match title.split_once(char::is_whitespace) {
                Some((acc, rest)) => (acc, rest),
                None => (title, ""),
            };
            if accession.is_empty() {
                return Err(ParseError::MissingAccession(hit_def.to_string()));
            }
            let (description, species) = split_species_suffix(rest)?;
            Ok(ProteinAccession {
                accession: accession.to_string(),
                description,
                species,
            })
        }
    }
}

/// Nucleotide hits carry no bracketed species; genus and epithet open the title.
pub fn parse_nt_definition(
    aligner: Aligner,
    hit_id: &str,
    hit_def: &str,
) -> std::result::Result<ProteinAccession, ParseError> {
    let title = first_title(hit_def).trim();
    let (accession, description) = match aligner {
        Aligner::BlastPlus => {
            let acc = pipe_accession(hit_id)
                .ok_or_else(|| ParseError::MissingAccession(hit_id.to_string()))?;
            (acc.to_string(), title.to_string())
        }
        Aligner::Diamond => match title.split_once(char::is_whitespace) {
            Some((acc, rest)) => (acc.to_string(), rest.trim().to_string()),
            None if !title.is_empty() => (title.to_string(), String::new()),
            None => return Err(ParseError::MissingAccession(hit_def.to_string())),
        },
    };

    let words: Vec<&str> = description.split_whitespace().take(2).collect();
    let species = if words.len() == 2 {
        words.join(" ")
    } else {
        NOT_AVAILABLE.to_string()
    };

    Ok(ProteinAccession {
        accession,
        description,
        species,
    })
}
