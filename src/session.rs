use serde::Serialize;

use crate::allocator::{HighWater, KeyAllocator};
use crate::batch::LoadBatch;
use crate::config::ResolvedConfig;
use crate::domain::Lookup;
use crate::error::LoadError;
use crate::lookup::LookupProvider;
use crate::note::NoteExtractor;
use crate::processor::Rejection;
use crate::reconciler::{ExperimentReconciler, ExperimentSettings, PrimeOutcome};
use crate::record::RecordLayout;
use crate::store::MappingStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub lines: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub blank: usize,
    pub note_lines: usize,
}

#[derive(Debug)]
pub struct ReconciliationSession {
    pub(crate) delimiter: char,
    pub(crate) layout: RecordLayout,
    pub(crate) load_date: String,
    pub(crate) lookups: LookupProvider,
    pub(crate) keys: KeyAllocator,
    pub(crate) reconciler: ExperimentReconciler,
    pub(crate) notes: NoteExtractor,
    pub(crate) batch: LoadBatch,
    pub(crate) rejections: Vec<Rejection>,
    pub(crate) stats: LineStats,
    pub(crate) prime: PrimeOutcome,
}

#[derive(Debug)]
pub struct SessionOutput {
    pub batch: LoadBatch,
    pub rejections: Vec<Rejection>,
    pub stats: LineStats,
    pub prime: PrimeOutcome,
    pub high_water: HighWater,
    pub reference_key: Option<i64>,
    pub experiments_created: usize,
    pub experiments_reused: usize,
    pub note_dropped: bool,
}

impl ReconciliationSession {
    pub fn open(
        store: &dyn MappingStore,
        config: &ResolvedConfig,
        load_date: impl Into<String>,
    ) -> Result<Self, LoadError> {
        let load_date = load_date.into();
        let lookups =
            LookupProvider::load(store, config.organism_key, &config.excluded_chromosomes)?;
        let keys = KeyAllocator::seed(
            store,
            config.experiment_key_source,
            &config.accession_prefix,
        )?;
        let reconciler = ExperimentReconciler::new(
            config.mode.policy(),
            ExperimentSettings {
                experiment_type: config.experiment_type.clone(),
                logical_db_key: config.logical_db_key,
                object_type_key: config.object_type_key,
                load_date: load_date.clone(),
                master_markers: config.master_markers,
            },
        );
        let layout = match config.per_run_identity() {
            Some((reference, created_by)) => RecordLayout::PerRun {
                reference: reference.to_string(),
                created_by: created_by.to_string(),
            },
            None => RecordLayout::PerLine,
        };

        Ok(Self {
            delimiter: config.delimiter,
            layout,
            load_date,
            lookups,
            keys,
            reconciler,
            notes: NoteExtractor::new(config.note_chunk_size),
            batch: LoadBatch::default(),
            rejections: Vec::new(),
            stats: LineStats::default(),
            prime: PrimeOutcome::default(),
        })
    }

    pub fn prime_per_run(&mut self, store: &dyn MappingStore) -> Result<bool, LoadError> {
        let RecordLayout::PerRun { reference, .. } = &self.layout else {
            return Ok(false);
        };
        let reference = reference.clone();
        match self.lookups.resolve_reference(store, &reference)? {
            Lookup::Found(reference_key) => {
                self.prime = self.reconciler.prime(store, reference_key, &mut self.batch)?;
                Ok(true)
            }
            Lookup::NotFound => {
                tracing::warn!(%reference, "per-run reference not found");
                Ok(false)
            }
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn stats(&self) -> LineStats {
        self.stats
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn batch(&self) -> &LoadBatch {
        &self.batch
    }

    pub fn finish(mut self) -> SessionOutput {
        let mut note_dropped = false;
        if self.notes.has_note() {
            match self.reconciler.reference_key() {
                Some(reference_key) => {
                    self.batch.notes = self.notes.finish(reference_key, &self.load_date);
                }
                None => {
                    tracing::warn!("note text captured but no valid reference to attach it to");
                    note_dropped = true;
                }
            }
        }

        SessionOutput {
            high_water: self.keys.high_water(),
            reference_key: self.reconciler.reference_key(),
            experiments_created: self.reconciler.created(),
            experiments_reused: self.reconciler.reused(),
            batch: self.batch,
            rejections: self.rejections,
            stats: self.stats,
            prime: self.prime,
            note_dropped,
        }
    }
}
