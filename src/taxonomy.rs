//src/taxonomy.rs

use ahash::AHashMap;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AnnotError, Result};
use crate::store::AnnotationStore;
use crate::types::{TaxonomyRecord, NOT_AVAILABLE};

pub const NCBI_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Source of taxonomy for species names the store does not know yet.
pub trait TaxonomyService {
    /// `Ok(None)` when the service has no entry for the name.
    fn fetch(&self, species_name: &str) -> Result<Option<TaxonomyRecord>>;
}

impl<T: TaxonomyService + ?Sized> TaxonomyService for Box<T> {
    fn fetch(&self, species_name: &str) -> Result<Option<TaxonomyRecord>> {
        (**self).fetch(species_name)
    }
}

/// A service that never resolves anything. Used when running without network.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTaxonomy;

impl TaxonomyService for OfflineTaxonomy {
    fn fetch(&self, _species_name: &str) -> Result<Option<TaxonomyRecord>> {
        Ok(None)
    }
}

/// Resolves species names to taxonomy: memory cache, then store, then service.
///
/// One resolver lives for a whole run; everything it learns stays cached until
/// it is dropped.
pub struct TaxonomyResolver<S: TaxonomyService> {
    service: S,
    cache: AHashMap<String, TaxonomyRecord>,
    service_calls: usize,
}

impl<S: TaxonomyService> TaxonomyResolver<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            cache: AHashMap::new(),
            service_calls: 0,
        }
    }

    /// Number of times the external service was asked.
    pub fn service_calls(&self) -> usize {
        self.service_calls
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn resolve<A: AnnotationStore + ?Sized>(
        &mut self,
        species_name: &str,
        store: &mut A,
    ) -> Result<TaxonomyRecord> {
        let name = species_name.trim();
        if name.to_ascii_lowercase().contains("virus") {
            return Ok(TaxonomyRecord::virus(name));
        }
        if name.is_empty() || name == NOT_AVAILABLE {
            return Ok(TaxonomyRecord::unresolved(NOT_AVAILABLE));
        }
        if let Some(rec) = self.cache.get(name) {
            return Ok(rec.clone());
        }

        let record = match store.lookup_species_taxonomy(name)? {
            Some(rec) => rec,
            None => {
                self.service_calls += 1;
                log::debug!("Asking taxonomy service for `{}`", name);
                match self.service.fetch(name)? {
                    Some(rec) => {
                        store.upsert_species_taxonomy(&rec)?;
                        rec
                    }
                    None => {
                        log::warn!("No taxonomy found for `{}`", name);
                        TaxonomyRecord::unresolved(name)
                    }
                }
            }
        };

        self.cache.insert(name.to_string(), record.clone());
        Ok(record)
    }
}

/// Client for the NCBI E-utilities taxonomy database.
pub struct NcbiTaxonomyClient {
    base_url: String,
    email: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "TaxaSet")]
struct TaxaSetXml {
    #[serde(rename = "Taxon", default)]
    taxa: Vec<TaxonXml>,
}

#[derive(Debug, Deserialize)]
struct TaxonXml {
    #[serde(rename = "TaxId")]
    tax_id: String,
    #[serde(rename = "ScientificName")]
    scientific_name: String,
    #[serde(rename = "Rank", default)]
    rank: Option<String>,
    #[serde(rename = "LineageEx", default)]
    lineage: Option<LineageXml>,
}

#[derive(Debug, Deserialize)]
struct LineageXml {
    #[serde(rename = "Taxon", default)]
    taxa: Vec<LineageTaxonXml>,
}

#[derive(Debug, Deserialize)]
struct LineageTaxonXml {
    #[serde(rename = "ScientificName")]
    scientific_name: String,
    #[serde(rename = "Rank", default)]
    rank: Option<String>,
}

impl NcbiTaxonomyClient {
    pub fn new(base_url: &str, email: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("seqannot-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnnotError::Service {
                query: base_url.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            client,
        })
    }

    fn get(&self, query: &str, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let service_err = |message: String| AnnotError::Service {
            query: query.to_string(),
            message,
        };

        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(params)
            .query(&[("tool", "seqannot-rs")]);
        if let Some(email) = &self.email {
            request = request.query(&[("email", email.as_str())]);
        }

        let response = request.send().map_err(|e| service_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(service_err(format!("{} returned status {}", endpoint, response.status())));
        }
        response.text().map_err(|e| service_err(e.to_string()))
    }
}

impl TaxonomyService for NcbiTaxonomyClient {
    fn fetch(&self, species_name: &str) -> Result<Option<TaxonomyRecord>> {
        let body = self.get(
            species_name,
            "esearch.fcgi",
            &[("db", "taxonomy"), ("term", species_name), ("retmode", "json")],
        )?;
        let search: ESearchResponse = serde_json::from_str(&body).map_err(|e| AnnotError::Service {
            query: species_name.to_string(),
            message: format!("malformed esearch answer: {e}"),
        })?;
        let Some(tax_id) = search.esearchresult.idlist.first() else {
            return Ok(None);
        };

        let xml = self.get(
            species_name,
            "efetch.fcgi",
            &[("db", "taxonomy"), ("id", tax_id.as_str()), ("retmode", "xml")],
        )?;
        taxonomy_from_efetch(species_name, &xml).map_err(|e| AnnotError::Service {
            query: species_name.to_string(),
            message: format!("malformed efetch answer: {e}"),
        })
    }
}

/// Pull family, phylum, kingdom and superkingdom out of an efetch taxonomy document.
pub fn taxonomy_from_efetch(
    species_name: &str,
    xml: &str,
) -> std::result::Result<Option<TaxonomyRecord>, quick_xml::DeError> {
    let set: TaxaSetXml = quick_xml::de::from_str(xml)?;
    let Some(taxon) = set.taxa.into_iter().next() else {
        return Ok(None);
    };

    let mut record = TaxonomyRecord::unresolved(species_name);
    record.tax_id = taxon.tax_id.trim().to_string();

    let own = (taxon.scientific_name, taxon.rank);
    let lineage = taxon.lineage.map(|l| l.taxa).unwrap_or_default();
    let ranked = lineage
        .into_iter()
        .map(|t| (t.scientific_name, t.rank))
        .chain(std::iter::once(own));

    for (name, rank) in ranked {
        let slot = match rank.as_deref().map(str::trim) {
            Some("family") => &mut record.family,
            Some("phylum") => &mut record.phylum,
            Some("kingdom") => &mut record.kingdom,
            Some("superkingdom") | Some("domain") => &mut record.superkingdom,
            _ => continue,
        };
        *slot = name.trim().to_string();
    }
    Ok(Some(record))
}
