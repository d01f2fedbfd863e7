use serde::Serialize;

use crate::domain::ExperimentKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentRow {
    pub key: ExperimentKey,
    pub reference_key: i64,
    pub experiment_type: String,
    pub tag: i64,
    pub chromosome: String,
    pub created: String,
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessionRow {
    pub key: i64,
    pub accession_id: String,
    pub prefix: String,
    pub numeric_part: i64,
    pub logical_db_key: i64,
    pub object_key: ExperimentKey,
    pub object_type_key: i64,
    pub private: bool,
    pub preferred: bool,
    pub created_by: i64,
    pub modified_by: i64,
    pub created: String,
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociationRow {
    pub experiment_key: ExperimentKey,
    pub marker_key: i64,
    pub allele_key: Option<i64>,
    pub assay_key: i64,
    pub sequence: i64,
    pub symbol: String,
    pub description: String,
    pub matrix_data: bool,
    pub created: String,
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteRow {
    pub reference_key: i64,
    pub sequence: i64,
    pub text: String,
    pub created: String,
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterMarkerRow {
    pub reference_key: i64,
    pub marker_key: i64,
    pub sequence: i64,
    pub created: String,
    pub modified: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgePlan {
    pub reference_key: i64,
    pub master_markers: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadBatch {
    pub purge: Option<PurgePlan>,
    pub experiments: Vec<ExperimentRow>,
    pub accessions: Vec<AccessionRow>,
    pub associations: Vec<AssociationRow>,
    pub notes: Vec<NoteRow>,
    pub master_markers: Vec<MasterMarkerRow>,
    pub statements: Vec<String>,
}

impl LoadBatch {
    pub fn is_empty(&self) -> bool {
        self.purge.is_none()
            && self.experiments.is_empty()
            && self.accessions.is_empty()
            && self.associations.is_empty()
            && self.notes.is_empty()
            && self.master_markers.is_empty()
            && self.statements.is_empty()
    }

    pub fn script(&self) -> String {
        self.statements
            .iter()
            .map(|statement| format!("{statement}\n"))
            .collect()
    }
}

pub trait BcpFields {
    fn fields(&self) -> Vec<String>;
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

impl BcpFields for ExperimentRow {
    fn fields(&self) -> Vec<String> {
        vec![
            self.key.to_string(),
            self.reference_key.to_string(),
            self.experiment_type.clone(),
            self.tag.to_string(),
            self.chromosome.clone(),
            self.created.clone(),
            self.modified.clone(),
        ]
    }
}

impl BcpFields for AccessionRow {
    fn fields(&self) -> Vec<String> {
        vec![
            self.key.to_string(),
            self.accession_id.clone(),
            self.prefix.clone(),
            self.numeric_part.to_string(),
            self.logical_db_key.to_string(),
            self.object_key.to_string(),
            self.object_type_key.to_string(),
            flag(self.private),
            flag(self.preferred),
            self.created_by.to_string(),
            self.modified_by.to_string(),
            self.created.clone(),
            self.modified.clone(),
        ]
    }
}

impl BcpFields for AssociationRow {
    fn fields(&self) -> Vec<String> {
        vec![
            self.experiment_key.to_string(),
            self.marker_key.to_string(),
            self.allele_key.map(|key| key.to_string()).unwrap_or_default(),
            self.assay_key.to_string(),
            self.sequence.to_string(),
            self.symbol.clone(),
            self.description.clone(),
            flag(self.matrix_data),
            self.created.clone(),
            self.modified.clone(),
        ]
    }
}

impl BcpFields for NoteRow {
    fn fields(&self) -> Vec<String> {
        vec![
            self.reference_key.to_string(),
            self.sequence.to_string(),
            self.text.clone(),
            self.created.clone(),
            self.modified.clone(),
        ]
    }
}

impl BcpFields for MasterMarkerRow {
    fn fields(&self) -> Vec<String> {
        vec![
            self.reference_key.to_string(),
            self.marker_key.to_string(),
            self.sequence.to_string(),
            self.created.clone(),
            self.modified.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn association_fields_leave_allele_empty() {
        let row = AssociationRow {
            experiment_key: ExperimentKey(1000),
            marker_key: 12,
            allele_key: None,
            assay_key: 3,
            sequence: 1,
            symbol: "Pax6".to_string(),
            description: "desc".to_string(),
            matrix_data: false,
            created: "10/19/2026".to_string(),
            modified: "10/19/2026".to_string(),
        };
        assert_eq!(
            row.fields().join("|"),
            "1000|12||3|1|Pax6|desc|0|10/19/2026|10/19/2026"
        );
    }
}
