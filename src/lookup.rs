use std::collections::HashMap;

use crate::domain::{Lookup, ReferenceNumber, ResolvedMarker};
use crate::error::LoadError;
use crate::store::MappingStore;

#[derive(Debug, Default)]
pub struct LookupProvider {
    organism_key: i64,
    chromosomes: Vec<String>,
    assays: HashMap<String, i64>,
    markers: HashMap<String, ResolvedMarker>,
    references: HashMap<String, Option<i64>>,
    users: HashMap<String, Option<i64>>,
}

impl LookupProvider {
    pub fn load(
        store: &dyn MappingStore,
        organism_key: i64,
        excluded_chromosomes: &[String],
    ) -> Result<Self, LoadError> {
        let chromosomes = store.valid_chromosomes(organism_key, excluded_chromosomes)?;
        let assays = store.assay_types()?.into_iter().collect::<HashMap<_, _>>();
        tracing::info!(
            chromosomes = chromosomes.len(),
            assays = assays.len(),
            "loaded lookup tables"
        );
        Ok(Self {
            organism_key,
            chromosomes,
            assays,
            ..Self::default()
        })
    }

    pub fn chromosomes(&self) -> &[String] {
        &self.chromosomes
    }

    pub fn resolve_chromosome(&self, code: &str) -> bool {
        self.chromosomes.iter().any(|chromosome| chromosome == code)
    }

    pub fn resolve_assay(&self, label: &str) -> Lookup<i64> {
        self.assays.get(label).copied().into()
    }

    pub fn resolve_marker(
        &mut self,
        store: &dyn MappingStore,
        accession_id: &str,
    ) -> Result<Lookup<ResolvedMarker>, LoadError> {
        if let Some(marker) = self.markers.get(accession_id) {
            return Ok(Lookup::Found(marker.clone()));
        }
        let found = store.marker_by_accession(accession_id, self.organism_key)?;
        if let Some(marker) = &found {
            self.markers.insert(accession_id.to_string(), marker.clone());
        }
        Ok(found.into())
    }

    pub fn resolve_reference(
        &mut self,
        store: &dyn MappingStore,
        jnum: &str,
    ) -> Result<Lookup<i64>, LoadError> {
        if let Some(cached) = self.references.get(jnum) {
            return Ok((*cached).into());
        }
        let key = match jnum.parse::<ReferenceNumber>() {
            Ok(reference) => store.reference_by_jnum(&reference)?,
            Err(()) => None,
        };
        self.references.insert(jnum.to_string(), key);
        Ok(key.into())
    }

    pub fn resolve_user(
        &mut self,
        store: &dyn MappingStore,
        login: &str,
    ) -> Result<Lookup<i64>, LoadError> {
        if let Some(cached) = self.users.get(login) {
            return Ok((*cached).into());
        }
        let key = if login.trim().is_empty() {
            None
        } else {
            store.user_by_login(login.trim())?
        };
        self.users.insert(login.to_string(), key);
        Ok(key.into())
    }

    pub fn cached_markers(&self) -> usize {
        self.markers.len()
    }
}
