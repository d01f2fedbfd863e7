use serde::Serialize;

use crate::domain::{ExperimentKey, KeySource};
use crate::error::LoadError;
use crate::store::MappingStore;

pub const INITIAL_KEY: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighWater {
    pub prefix: String,
    pub last_suffix: Option<i64>,
    pub last_experiment_key: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct KeyAllocator {
    prefix: String,
    next_experiment: i64,
    next_accession: i64,
    next_suffix: i64,
    first_experiment: i64,
    first_suffix: i64,
}

impl KeyAllocator {
    pub fn seed(
        store: &dyn MappingStore,
        source: KeySource,
        prefix: &str,
    ) -> Result<Self, LoadError> {
        let max_experiment = store.max_experiment_key()?;
        let next_experiment = match source {
            KeySource::MaxPlusOne => max_experiment.map(|key| key + 1),
            KeySource::Sequence => match (store.experiment_sequence_value()?, max_experiment) {
                (Some(last), Some(max)) => Some(last.max(max) + 1),
                (Some(last), None) => Some(last + 1),
                (None, max) => max.map(|key| key + 1),
            },
        }
        .unwrap_or(INITIAL_KEY);

        let next_accession = store
            .max_accession_key()?
            .map(|key| key + 1)
            .unwrap_or(INITIAL_KEY);

        let next_suffix = store
            .accession_max(prefix)?
            .map(|max| max + 1)
            .ok_or_else(|| LoadError::MissingAccessionCounter(prefix.to_string()))?;

        tracing::debug!(
            next_experiment,
            next_accession,
            next_suffix,
            "seeded key allocator"
        );

        Ok(Self {
            prefix: prefix.to_string(),
            next_experiment,
            next_accession,
            next_suffix,
            first_experiment: next_experiment,
            first_suffix: next_suffix,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_experiment_key(&mut self) -> ExperimentKey {
        let key = self.next_experiment;
        self.next_experiment += 1;
        ExperimentKey(key)
    }

    pub fn next_accession_key(&mut self) -> i64 {
        let key = self.next_accession;
        self.next_accession += 1;
        key
    }

    pub fn next_mgi_suffix(&mut self) -> i64 {
        let suffix = self.next_suffix;
        self.next_suffix += 1;
        suffix
    }

    pub fn high_water(&self) -> HighWater {
        HighWater {
            prefix: self.prefix.clone(),
            last_suffix: (self.next_suffix > self.first_suffix).then(|| self.next_suffix - 1),
            last_experiment_key: (self.next_experiment > self.first_experiment)
                .then(|| self.next_experiment - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn empty_store_starts_at_initial_keys() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .apply_script("INSERT INTO ACC_AccessionMax VALUES ('MGI:', 41);")
            .unwrap();
        let mut keys = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap();
        assert_eq!(keys.next_experiment_key(), ExperimentKey(INITIAL_KEY));
        assert_eq!(keys.next_experiment_key(), ExperimentKey(INITIAL_KEY + 1));
        assert_eq!(keys.next_accession_key(), INITIAL_KEY);
        assert_eq!(keys.next_mgi_suffix(), 42);
        let mark = keys.high_water();
        assert_eq!(mark.last_suffix, Some(42));
        assert_eq!(mark.last_experiment_key, Some(INITIAL_KEY + 1));
    }

    #[test]
    fn sequence_source_continues_past_both_sequence_and_table() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .apply_script(
                "INSERT INTO ACC_AccessionMax VALUES ('MGI:', 1);
                 INSERT INTO key_sequences VALUES ('mld_expts_seq', 5000);
                 INSERT INTO MLD_Expts VALUES (4000, 1, 'TEXT', 1, '1', 'd', 'd');",
            )
            .unwrap();
        let mut keys = KeyAllocator::seed(&store, KeySource::Sequence, "MGI:").unwrap();
        assert_eq!(keys.next_experiment_key(), ExperimentKey(5001));

        let mut keys = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap();
        assert_eq!(keys.next_experiment_key(), ExperimentKey(4001));
    }

    #[test]
    fn unused_allocator_publishes_nothing() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .apply_script("INSERT INTO ACC_AccessionMax VALUES ('MGI:', 7);")
            .unwrap();
        let keys = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap();
        let mark = keys.high_water();
        assert_eq!(mark.last_suffix, None);
        assert_eq!(mark.last_experiment_key, None);
    }

    #[test]
    fn missing_prefix_counter_is_fatal() {
        let store = SqliteStore::in_memory().unwrap();
        let err = KeyAllocator::seed(&store, KeySource::MaxPlusOne, "MGI:").unwrap_err();
        assert_matches!(err, LoadError::MissingAccessionCounter(prefix) if prefix == "MGI:");
    }
}
