use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::error::LoadError;
use crate::input::open_input;
use crate::output::{OutputPaths, RunLog, write_batch};
use crate::processor::Rejection;
use crate::session::{ReconciliationSession, SessionOutput};
use crate::store::MappingStore;

pub const LOAD_DATE_FORMAT: &str = "%m/%d/%Y";
const LOG_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: String,
    pub input: String,
    pub lines: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub blank: usize,
    pub note_lines: usize,
    pub reference_key: Option<i64>,
    pub experiments_created: usize,
    pub experiments_reused: usize,
    pub associations: usize,
    pub notes: usize,
    pub master_markers: usize,
    pub statements: usize,
    pub purged_associations: usize,
    pub persisted: bool,
    pub rejections: Vec<Rejection>,
    pub outputs: OutputFiles,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFiles {
    pub experiments: String,
    pub accessions: String,
    pub associations: String,
    pub notes: String,
    pub master_markers: Option<String>,
    pub script: String,
    pub diagnostics: String,
    pub errors: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<S: MappingStore> {
    store: S,
    config: ResolvedConfig,
}

impl<S: MappingStore> App<S> {
    pub fn new(store: S, config: ResolvedConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn load(&mut self, sink: &dyn ProgressSink) -> Result<RunSummary, LoadError> {
        let today = Local::now().format(LOAD_DATE_FORMAT).to_string();
        self.load_with_date(&today, sink)
    }

    pub fn load_with_date(
        &mut self,
        load_date: &str,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, LoadError> {
        let paths = OutputPaths::for_input(&self.config.input, &self.config.output_dir);
        let started = now();
        let mut diag = RunLog::create(&paths.diagnostics, &started)?;
        let mut errors = RunLog::create(&paths.errors, &started)?;
        self.write_parameters(&mut diag)?;

        let result = self.run(load_date, &paths, &mut diag, &mut errors, sink);
        if let Err(err) = &result {
            tracing::error!(error = %err, "load failed");
            if let Err(log_err) = errors.line(&err.to_string()) {
                tracing::warn!(error = %log_err, "could not record failure in error log");
            }
        }

        let ended = now();
        let closed = diag.finish(&ended).and(errors.finish(&ended));
        settle(result, closed)
    }

    fn run(
        &mut self,
        load_date: &str,
        paths: &OutputPaths,
        diag: &mut RunLog,
        errors: &mut RunLog,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, LoadError> {
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: "phase=Resolve; loading lookups".to_string(),
            elapsed: None,
        });
        let mut session = ReconciliationSession::open(&self.store, &self.config, load_date)?;
        if session.prime_per_run(&self.store)? {
            diag.line("Reference resolved before reading input")?;
        }

        sink.event(ProgressEvent {
            message: format!("phase=Process; reading {}", self.config.input),
            elapsed: None,
        });
        let reader = open_input(&self.config.input)?;
        session.process_reader(&self.store, reader, errors.writer())?;
        let output = session.finish();
        if output.note_dropped {
            errors.line("Note text found but no valid reference to attach it to")?;
        }

        sink.event(ProgressEvent {
            message: "phase=Write; writing row files".to_string(),
            elapsed: None,
        });
        write_batch(paths, &output.batch, self.config.master_markers)?;
        for statement in &output.batch.statements {
            diag.line(statement)?;
        }

        let persisted = self.config.mode.policy().persist;
        if persisted {
            self.persist(paths, &output, diag, sink)?;
        } else {
            diag.line("Preview mode: nothing loaded")?;
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} accepted, {} rejected",
                output.stats.accepted, output.stats.rejected
            ),
            elapsed: Some(start.elapsed()),
        });
        tracing::info!(
            mode = %self.config.mode,
            accepted = output.stats.accepted,
            rejected = output.stats.rejected,
            persisted,
            "load complete"
        );
        Ok(self.summarize(paths, output, persisted))
    }

    fn persist(
        &mut self,
        paths: &OutputPaths,
        output: &SessionOutput,
        diag: &mut RunLog,
        sink: &dyn ProgressSink,
    ) -> Result<(), LoadError> {
        sink.event(ProgressEvent {
            message: "phase=Load; bulk loading rows".to_string(),
            elapsed: None,
        });
        if output.batch.is_empty() {
            tracing::warn!("no rows generated; nothing to load");
            diag.line("No rows generated")?;
            return Ok(());
        }
        for (table, file) in paths.load_plan(self.config.master_markers) {
            diag.line(&format!("load {table} from {file}"))?;
        }
        self.store.bulk_load(&output.batch)?;
        self.store.apply_script(&output.batch.script())?;
        self.store.publish_high_water(&output.high_water)?;
        Ok(())
    }

    fn write_parameters(&self, diag: &mut RunLog) -> Result<(), LoadError> {
        let config = &self.config;
        diag.line(&format!("Database: {}", config.database))?;
        diag.line(&format!("Input File: {}", config.input))?;
        diag.line(&format!("Mode: {}", config.mode))?;
        diag.line(&format!("Experiment Type: {}", config.experiment_type))?;
        diag.line(&format!("Accession Prefix: {}", config.accession_prefix))?;
        if let Some((reference, created_by)) = config.per_run_identity() {
            diag.line(&format!("Reference: {reference}"))?;
            diag.line(&format!("Created By: {created_by}"))?;
        }
        Ok(())
    }

    fn summarize(&self, paths: &OutputPaths, output: SessionOutput, persisted: bool) -> RunSummary {
        let batch = &output.batch;
        RunSummary {
            mode: self.config.mode.to_string(),
            input: self.config.input.to_string(),
            lines: output.stats.lines,
            accepted: output.stats.accepted,
            rejected: output.stats.rejected,
            blank: output.stats.blank,
            note_lines: output.stats.note_lines,
            reference_key: output.reference_key,
            experiments_created: output.experiments_created,
            experiments_reused: output.experiments_reused,
            associations: batch.associations.len(),
            notes: batch.notes.len(),
            master_markers: batch.master_markers.len(),
            statements: batch.statements.len(),
            purged_associations: output.prime.purged_associations,
            persisted,
            outputs: OutputFiles {
                experiments: paths.experiments.to_string(),
                accessions: paths.accessions.to_string(),
                associations: paths.associations.to_string(),
                notes: paths.notes.to_string(),
                master_markers: self
                    .config
                    .master_markers
                    .then(|| paths.master_markers.to_string()),
                script: paths.script.to_string(),
                diagnostics: paths.diagnostics.to_string(),
                errors: paths.errors.to_string(),
            },
            rejections: output.rejections,
        }
    }
}

fn now() -> String {
    Local::now().format(LOG_TIME_FORMAT).to_string()
}

// A failed run keeps its own error even when closing the logs also fails.
fn settle<T>(result: Result<T, LoadError>, closed: Result<(), LoadError>) -> Result<T, LoadError> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "could not close run logs");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn run_failure_outlives_log_failure() {
        let result: Result<(), LoadError> = Err(LoadError::InvalidAssay("typo".to_string()));
        let closed = Err(LoadError::Filesystem("disk full".to_string()));
        assert_matches!(settle(result, closed), Err(LoadError::InvalidAssay(ref name)) if name == "typo");
    }

    #[test]
    fn log_failure_surfaces_after_clean_run() {
        let closed = Err(LoadError::Filesystem("disk full".to_string()));
        assert_matches!(settle(Ok(3), closed), Err(LoadError::Filesystem(_)));
        assert_matches!(settle(Ok(3), Ok(())), Ok(3));
    }
}
