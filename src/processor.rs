use std::fmt;
use std::io::{BufRead, Write};

use serde::Serialize;

use crate::batch::AssociationRow;
use crate::domain::Lookup;
use crate::error::LoadError;
use crate::input::decoded_lines;
use crate::record::{InputRecord, ParsedLine, parse_line};
use crate::session::ReconciliationSession;
use crate::store::MappingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectedField {
    Marker,
    Chromosome,
    Reference,
    User,
    Experiment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub field: RejectedField,
    pub line: usize,
    pub value: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.field {
            RejectedField::Marker => "Invalid Marker",
            RejectedField::Chromosome => "Invalid Chromosome",
            RejectedField::Reference => "Invalid Reference",
            RejectedField::User => "Invalid User",
            RejectedField::Experiment => "Cannot Find Experiment Key For Chromosome",
        };
        write!(f, "{label} ({}) {}", self.line, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Accepted { sequence: i64 },
    Rejected(Vec<Rejection>),
    Note,
    Blank,
}

impl ReconciliationSession {
    pub fn process_reader<R: BufRead>(
        &mut self,
        store: &dyn MappingStore,
        reader: R,
        errors: &mut dyn Write,
    ) -> Result<(), LoadError> {
        for (index, line) in decoded_lines(reader).enumerate() {
            let line = line?;
            self.process_line(store, index + 1, &line, errors)?;
        }
        tracing::info!(
            lines = self.stats.lines,
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            "processed input"
        );
        Ok(())
    }

    pub fn process_line(
        &mut self,
        store: &dyn MappingStore,
        line_number: usize,
        line: &str,
        errors: &mut dyn Write,
    ) -> Result<LineOutcome, LoadError> {
        self.stats.lines += 1;
        let record = match parse_line(line, self.delimiter, &self.layout) {
            ParsedLine::Record(record) => record,
            ParsedLine::Note(text) => {
                self.notes.capture(line_number, &text);
                self.stats.note_lines += 1;
                return Ok(LineOutcome::Note);
            }
            ParsedLine::Blank => {
                self.stats.blank += 1;
                return Ok(LineOutcome::Blank);
            }
        };

        let (outcome, fatal) = match self.process_record(store, line_number, &record)? {
            Verdict::Done(outcome) => (outcome, None),
            Verdict::Fatal { rejections, error } => {
                (LineOutcome::Rejected(rejections), Some(error))
            }
        };
        if let LineOutcome::Rejected(rejections) = &outcome {
            for rejection in rejections {
                writeln!(errors, "{rejection}")
                    .map_err(|err| LoadError::Filesystem(err.to_string()))?;
            }
            self.rejections.extend(rejections.iter().cloned());
            self.stats.rejected += 1;
        } else {
            self.stats.accepted += 1;
        }
        if let Some(error) = fatal {
            return Err(error);
        }
        Ok(outcome)
    }

    fn process_record(
        &mut self,
        store: &dyn MappingStore,
        line_number: usize,
        record: &InputRecord,
    ) -> Result<Verdict, LoadError> {
        let reject = |field, value: &str| Rejection {
            field,
            line: line_number,
            value: value.to_string(),
        };
        let mut rejections = Vec::new();

        let marker = self.lookups.resolve_marker(store, &record.marker_id)?;
        if !marker.is_found() {
            rejections.push(reject(RejectedField::Marker, &record.marker_id));
        }
        let assay = self.lookups.resolve_assay(&record.assay);
        let reference = match self.lookups.resolve_reference(store, &record.reference)? {
            Lookup::Found(key) if self.reconciler.reference_key().is_some_and(|k| k != key) => {
                Lookup::NotFound
            }
            other => other,
        };
        if !reference.is_found() {
            rejections.push(reject(RejectedField::Reference, &record.reference));
        }
        let user = self.lookups.resolve_user(store, &record.created_by)?;
        if !user.is_found() {
            rejections.push(reject(RejectedField::User, &record.created_by));
        }
        if !self.lookups.resolve_chromosome(&record.chromosome) {
            rejections.push(reject(RejectedField::Chromosome, &record.chromosome));
        }

        let Lookup::Found(assay_key) = assay else {
            return Ok(Verdict::Fatal {
                rejections,
                error: LoadError::InvalidAssay(record.assay.clone()),
            });
        };

        let (Lookup::Found(marker), Lookup::Found(reference_key), Lookup::Found(user_key)) =
            (marker, reference, user)
        else {
            return Ok(Verdict::Done(LineOutcome::Rejected(rejections)));
        };
        if !rejections.is_empty() {
            return Ok(Verdict::Done(LineOutcome::Rejected(rejections)));
        }

        if !self.reconciler.is_primed() {
            self.prime = self.reconciler.prime(store, reference_key, &mut self.batch)?;
        }

        let Lookup::Found(experiment) = self.reconciler.experiment_for(
            &record.chromosome,
            user_key,
            &mut self.keys,
            &mut self.batch,
        ) else {
            return Ok(Verdict::Done(LineOutcome::Rejected(vec![reject(
                RejectedField::Experiment,
                &record.chromosome,
            )])));
        };

        let sequence = self.reconciler.next_sequence(experiment);
        self.batch.associations.push(AssociationRow {
            experiment_key: experiment,
            marker_key: marker.key,
            allele_key: None,
            assay_key,
            sequence,
            symbol: marker.symbol.clone(),
            description: record.description.clone(),
            matrix_data: false,
            created: self.load_date.clone(),
            modified: self.load_date.clone(),
        });
        self.reconciler.note_master_marker(marker.key, &mut self.batch);

        if record.update_chromosome {
            self.batch
                .statements
                .push(marker_chromosome_update(marker.key, &record.chromosome));
        }
        if let Some(band) = &record.band {
            self.batch
                .statements
                .push(marker_band_update(marker.key, band));
        }

        Ok(Verdict::Done(LineOutcome::Accepted { sequence }))
    }
}

// A fatal line still reports its per-field diagnostics before the run stops.
enum Verdict {
    Done(LineOutcome),
    Fatal {
        rejections: Vec<Rejection>,
        error: LoadError,
    },
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn marker_chromosome_update(marker_key: i64, chromosome: &str) -> String {
    format!(
        "update MRK_Marker set modification_date = current_timestamp, chromosome = {} where marker_key = {marker_key};",
        quote(chromosome)
    )
}

pub fn marker_band_update(marker_key: i64, band: &str) -> String {
    format!(
        "update MRK_Marker set modification_date = current_timestamp, cytogenetic_offset = {} where marker_key = {marker_key};",
        quote(band)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages() {
        let rejection = Rejection {
            field: RejectedField::Marker,
            line: 3,
            value: "MGI:0".to_string(),
        };
        assert_eq!(rejection.to_string(), "Invalid Marker (3) MGI:0");
        let rejection = Rejection {
            field: RejectedField::Experiment,
            line: 4,
            value: "7".to_string(),
        };
        assert_eq!(
            rejection.to_string(),
            "Cannot Find Experiment Key For Chromosome (4) 7"
        );
    }

    #[test]
    fn update_statements_quote_values() {
        assert_eq!(
            marker_band_update(10, "q2'1"),
            "update MRK_Marker set modification_date = current_timestamp, cytogenetic_offset = 'q2''1' where marker_key = 10;"
        );
        assert!(marker_chromosome_update(10, "4").contains("chromosome = '4'"));
    }
}
