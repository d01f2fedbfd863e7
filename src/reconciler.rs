use std::collections::{HashMap, HashSet};

use crate::allocator::KeyAllocator;
use crate::batch::{AccessionRow, ExperimentRow, LoadBatch, MasterMarkerRow, PurgePlan};
use crate::domain::{ExperimentKey, Lookup, ModePolicy};
use crate::error::LoadError;
use crate::store::MappingStore;

#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub experiment_type: String,
    pub logical_db_key: i64,
    pub object_type_key: i64,
    pub load_date: String,
    pub master_markers: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimeOutcome {
    pub existing: usize,
    pub purged_associations: usize,
    pub purged_master_markers: usize,
}

#[derive(Debug, Default)]
struct MasterMarkers {
    next_sequence: i64,
    seen: HashSet<i64>,
}

#[derive(Debug)]
pub struct ExperimentReconciler {
    policy: ModePolicy,
    settings: ExperimentSettings,
    reference_key: Option<i64>,
    experiments: HashMap<String, ExperimentKey>,
    sequences: HashMap<ExperimentKey, i64>,
    next_tag: i64,
    master: Option<MasterMarkers>,
    created: usize,
    reused: usize,
}

impl ExperimentReconciler {
    pub fn new(policy: ModePolicy, settings: ExperimentSettings) -> Self {
        Self {
            policy,
            settings,
            reference_key: None,
            experiments: HashMap::new(),
            sequences: HashMap::new(),
            next_tag: 1,
            master: None,
            created: 0,
            reused: 0,
        }
    }

    pub fn reference_key(&self) -> Option<i64> {
        self.reference_key
    }

    pub fn is_primed(&self) -> bool {
        self.reference_key.is_some()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn reused(&self) -> usize {
        self.reused
    }

    /// Adopts the experiments the reference already owns. Runs once. In purge
    /// mode the prior detail rows are only planned for deletion here; the
    /// store drops them when the batch is loaded.
    pub fn prime(
        &mut self,
        store: &dyn MappingStore,
        reference_key: i64,
        batch: &mut LoadBatch,
    ) -> Result<PrimeOutcome, LoadError> {
        if self.reference_key.is_some() {
            return Ok(PrimeOutcome::default());
        }
        self.reference_key = Some(reference_key);

        let existing = store.experiments_for_reference(reference_key)?;
        let mut outcome = PrimeOutcome {
            existing: existing.len(),
            ..PrimeOutcome::default()
        };

        if self.policy.purge_existing {
            outcome.purged_associations = store.association_count(reference_key)?;
            batch.purge = Some(PurgePlan {
                reference_key,
                master_markers: self.settings.master_markers,
            });
        }

        for experiment in &existing {
            let next_sequence = if self.policy.purge_existing {
                1
            } else {
                store
                    .max_association_sequence(experiment.key)?
                    .map(|max| max + 1)
                    .unwrap_or(1)
            };
            self.experiments
                .insert(experiment.chromosome.clone(), experiment.key);
            self.sequences.insert(experiment.key, next_sequence);
            self.next_tag = self.next_tag.max(experiment.tag + 1);
        }
        self.reused = existing.len();

        if self.settings.master_markers {
            let mut master = MasterMarkers {
                next_sequence: 1,
                seen: HashSet::new(),
            };
            if self.policy.purge_existing {
                outcome.purged_master_markers =
                    store.master_markers_for_reference(reference_key)?.len();
            } else {
                for (marker_key, sequence) in store.master_markers_for_reference(reference_key)? {
                    master.seen.insert(marker_key);
                    master.next_sequence = master.next_sequence.max(sequence + 1);
                }
            }
            self.master = Some(master);
        }

        tracing::info!(
            reference_key,
            existing = outcome.existing,
            next_tag = self.next_tag,
            "primed experiments for reference"
        );
        Ok(outcome)
    }

    pub fn experiment_for(
        &mut self,
        chromosome: &str,
        created_by: i64,
        keys: &mut KeyAllocator,
        batch: &mut LoadBatch,
    ) -> Lookup<ExperimentKey> {
        if let Some(key) = self.experiments.get(chromosome) {
            return Lookup::Found(*key);
        }
        match self.reference_key {
            Some(reference_key) => Lookup::Found(self.create_experiment(
                reference_key,
                chromosome,
                created_by,
                keys,
                batch,
            )),
            None => Lookup::NotFound,
        }
    }

    fn create_experiment(
        &mut self,
        reference_key: i64,
        chromosome: &str,
        created_by: i64,
        keys: &mut KeyAllocator,
        batch: &mut LoadBatch,
    ) -> ExperimentKey {
        let key = keys.next_experiment_key();
        let accession_key = keys.next_accession_key();
        let suffix = keys.next_mgi_suffix();
        let date = &self.settings.load_date;

        batch.experiments.push(ExperimentRow {
            key,
            reference_key,
            experiment_type: self.settings.experiment_type.clone(),
            tag: self.next_tag,
            chromosome: chromosome.to_string(),
            created: date.clone(),
            modified: date.clone(),
        });
        batch.accessions.push(AccessionRow {
            key: accession_key,
            accession_id: format!("{}{suffix}", keys.prefix()),
            prefix: keys.prefix().to_string(),
            numeric_part: suffix,
            logical_db_key: self.settings.logical_db_key,
            object_key: key,
            object_type_key: self.settings.object_type_key,
            private: false,
            preferred: true,
            created_by,
            modified_by: created_by,
            created: date.clone(),
            modified: date.clone(),
        });

        tracing::debug!(%key, chromosome, tag = self.next_tag, "created experiment");
        self.experiments.insert(chromosome.to_string(), key);
        self.sequences.insert(key, 1);
        self.next_tag += 1;
        self.created += 1;
        key
    }

    pub fn next_sequence(&mut self, experiment: ExperimentKey) -> i64 {
        let counter = self.sequences.entry(experiment).or_insert(1);
        let sequence = *counter;
        *counter += 1;
        sequence
    }

    pub fn note_master_marker(&mut self, marker_key: i64, batch: &mut LoadBatch) -> bool {
        let (Some(master), Some(reference_key)) = (self.master.as_mut(), self.reference_key)
        else {
            return false;
        };
        if !master.seen.insert(marker_key) {
            return false;
        }
        batch.master_markers.push(MasterMarkerRow {
            reference_key,
            marker_key,
            sequence: master.next_sequence,
            created: self.settings.load_date.clone(),
            modified: self.settings.load_date.clone(),
        });
        master.next_sequence += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KeySource, ProcessingMode};
    use crate::store::SqliteStore;

    fn settings(master_markers: bool) -> ExperimentSettings {
        ExperimentSettings {
            experiment_type: "TEXT".to_string(),
            logical_db_key: 1,
            object_type_key: 4,
            load_date: "10/19/2026".to_string(),
            master_markers,
        }
    }

    fn store_with_history() -> SqliteStore {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .apply_script(
                "INSERT INTO ACC_AccessionMax VALUES ('MGI:', 100);
                 INSERT INTO MLD_Expts VALUES (1000, 7, 'TEXT', 1, '4', 'd', 'd');
                 INSERT INTO MLD_Expts VALUES (1001, 7, 'TEXT', 2, 'X', 'd', 'd');
                 INSERT INTO MLD_Expt_Marker VALUES (1000, 10, NULL, 1, 1, 'a', '', 0, 'd', 'd');
                 INSERT INTO MLD_Expt_Marker VALUES (1000, 11, NULL, 1, 2, 'b', '', 0, 'd', 'd');
                 INSERT INTO MLD_Marker VALUES (7, 10, 1, 'd', 'd');",
            )
            .unwrap();
        store
    }

    #[test]
    fn incremental_continues_sequences_and_tags() {
        let store = store_with_history();
        let mut keys = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap();
        let mut batch = LoadBatch::default();
        let mut reconciler =
            ExperimentReconciler::new(ProcessingMode::Incremental.policy(), settings(false));

        let outcome = reconciler.prime(&store, 7, &mut batch).unwrap();
        assert_eq!(outcome.existing, 2);
        assert_eq!(outcome.purged_associations, 0);
        assert_eq!(batch.purge, None);

        let chr4 = reconciler
            .experiment_for("4", 5, &mut keys, &mut batch)
            .found()
            .unwrap();
        assert_eq!(chr4, ExperimentKey(1000));
        assert_eq!(reconciler.next_sequence(chr4), 3);
        assert_eq!(reconciler.next_sequence(chr4), 4);

        let chr_x = reconciler
            .experiment_for("X", 5, &mut keys, &mut batch)
            .found()
            .unwrap();
        assert_eq!(reconciler.next_sequence(chr_x), 1);

        let chr1 = reconciler
            .experiment_for("1", 5, &mut keys, &mut batch)
            .found()
            .unwrap();
        assert_eq!(chr1, ExperimentKey(1002));
        assert_eq!(batch.experiments.len(), 1);
        assert_eq!(batch.experiments[0].tag, 3);
        assert_eq!(batch.accessions[0].accession_id, "MGI:101");
        assert_eq!(batch.accessions[0].created_by, 5);
        assert_eq!(store.count_rows("MLD_Expt_Marker").unwrap(), 2);
    }

    #[test]
    fn full_mode_plans_purge_but_keeps_experiments() {
        let store = store_with_history();
        let mut keys = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap();
        let mut batch = LoadBatch::default();
        let mut reconciler =
            ExperimentReconciler::new(ProcessingMode::Full.policy(), settings(true));

        let outcome = reconciler.prime(&store, 7, &mut batch).unwrap();
        assert_eq!(outcome.purged_associations, 2);
        assert_eq!(outcome.purged_master_markers, 1);
        assert_eq!(
            batch.purge,
            Some(PurgePlan {
                reference_key: 7,
                master_markers: true
            })
        );
        assert_eq!(store.count_rows("MLD_Expt_Marker").unwrap(), 2);
        assert_eq!(store.count_rows("MLD_Expts").unwrap(), 2);

        let chr4 = reconciler
            .experiment_for("4", 5, &mut keys, &mut batch)
            .found()
            .unwrap();
        assert_eq!(reconciler.next_sequence(chr4), 1);
        assert!(reconciler.note_master_marker(10, &mut batch));
        assert_eq!(batch.master_markers[0].sequence, 1);
    }

    #[test]
    fn preview_never_deletes() {
        let store = store_with_history();
        let mut batch = LoadBatch::default();
        let mut reconciler =
            ExperimentReconciler::new(ProcessingMode::Preview.policy(), settings(true));
        reconciler.prime(&store, 7, &mut batch).unwrap();
        assert_eq!(batch.purge, None);
        assert_eq!(store.count_rows("MLD_Marker").unwrap(), 1);

        assert!(!reconciler.note_master_marker(10, &mut batch));
        assert!(reconciler.note_master_marker(11, &mut batch));
        assert_eq!(batch.master_markers[0].sequence, 2);
    }

    #[test]
    fn unprimed_reconciler_cannot_create() {
        let store = store_with_history();
        let mut keys = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap();
        let mut batch = LoadBatch::default();
        let mut reconciler =
            ExperimentReconciler::new(ProcessingMode::Incremental.policy(), settings(false));
        assert_eq!(
            reconciler.experiment_for("4", 5, &mut keys, &mut batch),
            Lookup::NotFound
        );
        assert!(batch.experiments.is_empty());
    }

    #[test]
    fn priming_twice_is_a_no_op() {
        let store = store_with_history();
        let mut batch = LoadBatch::default();
        let mut reconciler =
            ExperimentReconciler::new(ProcessingMode::Full.policy(), settings(false));
        reconciler.prime(&store, 7, &mut batch).unwrap();
        let again = reconciler.prime(&store, 7, &mut batch).unwrap();
        assert_eq!(again, PrimeOutcome::default());
    }
}
