use camino::Utf8Path;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params};

use crate::allocator::HighWater;
use crate::batch::LoadBatch;
use crate::domain::{ExperimentKey, ReferenceNumber, ResolvedMarker};
use crate::error::LoadError;

pub const EXPERIMENT_SEQUENCE: &str = "mld_expts_seq";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingExperiment {
    pub key: ExperimentKey,
    pub chromosome: String,
    pub tag: i64,
}

/// Reads never mutate. Writes happen only through the load, script and
/// publish operations, so a preview run can be served by the same store.
pub trait MappingStore {
    fn valid_chromosomes(
        &self,
        organism_key: i64,
        excluded: &[String],
    ) -> Result<Vec<String>, LoadError>;
    fn assay_types(&self) -> Result<Vec<(String, i64)>, LoadError>;
    fn marker_by_accession(
        &self,
        accession_id: &str,
        organism_key: i64,
    ) -> Result<Option<ResolvedMarker>, LoadError>;
    fn reference_by_jnum(&self, jnum: &ReferenceNumber) -> Result<Option<i64>, LoadError>;
    fn user_by_login(&self, login: &str) -> Result<Option<i64>, LoadError>;

    fn max_experiment_key(&self) -> Result<Option<i64>, LoadError>;
    fn experiment_sequence_value(&self) -> Result<Option<i64>, LoadError>;
    fn max_accession_key(&self) -> Result<Option<i64>, LoadError>;
    fn accession_max(&self, prefix: &str) -> Result<Option<i64>, LoadError>;

    fn experiments_for_reference(
        &self,
        reference_key: i64,
    ) -> Result<Vec<ExistingExperiment>, LoadError>;
    fn max_association_sequence(&self, experiment: ExperimentKey)
    -> Result<Option<i64>, LoadError>;
    fn association_count(&self, reference_key: i64) -> Result<usize, LoadError>;
    fn master_markers_for_reference(&self, reference_key: i64)
    -> Result<Vec<(i64, i64)>, LoadError>;

    /// Applies the batch's purge plan, then inserts its rows, in one
    /// transaction.
    fn bulk_load(&mut self, batch: &LoadBatch) -> Result<(), LoadError>;
    fn apply_script(&mut self, script: &str) -> Result<(), LoadError>;
    fn publish_high_water(&mut self, mark: &HighWater) -> Result<(), LoadError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS MRK_Chromosome (
    organism_key INTEGER NOT NULL,
    chromosome TEXT NOT NULL,
    sequence_num INTEGER NOT NULL,
    PRIMARY KEY (organism_key, chromosome)
);
CREATE TABLE IF NOT EXISTS MLD_Assay_Types (
    assay_type_key INTEGER PRIMARY KEY,
    description TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS MRK_Marker (
    marker_key INTEGER PRIMARY KEY,
    organism_key INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    chromosome TEXT,
    cytogenetic_offset TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    modification_date TEXT
);
CREATE TABLE IF NOT EXISTS MRK_Accession (
    acc_id TEXT NOT NULL,
    marker_key INTEGER NOT NULL,
    PRIMARY KEY (acc_id, marker_key)
);
CREATE TABLE IF NOT EXISTS BIB_Refs (
    refs_key INTEGER PRIMARY KEY,
    jnum_id TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS MGI_User (
    user_key INTEGER PRIMARY KEY,
    login TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS MLD_Expts (
    expt_key INTEGER PRIMARY KEY,
    refs_key INTEGER NOT NULL,
    expt_type TEXT NOT NULL,
    tag INTEGER NOT NULL,
    chromosome TEXT NOT NULL,
    creation_date TEXT NOT NULL,
    modification_date TEXT NOT NULL,
    UNIQUE (refs_key, chromosome)
);
CREATE TABLE IF NOT EXISTS MLD_Expt_Marker (
    expt_key INTEGER NOT NULL,
    marker_key INTEGER NOT NULL,
    allele_key INTEGER,
    assay_type_key INTEGER NOT NULL,
    sequence_num INTEGER NOT NULL,
    symbol TEXT,
    description TEXT,
    matrix_data INTEGER NOT NULL DEFAULT 0,
    creation_date TEXT NOT NULL,
    modification_date TEXT NOT NULL,
    PRIMARY KEY (expt_key, sequence_num)
);
CREATE TABLE IF NOT EXISTS ACC_Accession (
    accession_key INTEGER PRIMARY KEY,
    acc_id TEXT NOT NULL,
    prefix_part TEXT NOT NULL,
    numeric_part INTEGER NOT NULL,
    logical_db_key INTEGER NOT NULL,
    object_key INTEGER NOT NULL,
    mgi_type_key INTEGER NOT NULL,
    private INTEGER NOT NULL,
    preferred INTEGER NOT NULL,
    created_by_key INTEGER NOT NULL,
    modified_by_key INTEGER NOT NULL,
    creation_date TEXT NOT NULL,
    modification_date TEXT NOT NULL,
    UNIQUE (prefix_part, numeric_part, logical_db_key)
);
CREATE TABLE IF NOT EXISTS ACC_AccessionMax (
    prefix_part TEXT PRIMARY KEY,
    max_numeric_part INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS MLD_Notes (
    refs_key INTEGER NOT NULL,
    sequence_num INTEGER NOT NULL,
    note TEXT NOT NULL,
    creation_date TEXT NOT NULL,
    modification_date TEXT NOT NULL,
    PRIMARY KEY (refs_key, sequence_num)
);
CREATE TABLE IF NOT EXISTS MLD_Marker (
    refs_key INTEGER NOT NULL,
    marker_key INTEGER NOT NULL,
    sequence_num INTEGER NOT NULL,
    creation_date TEXT NOT NULL,
    modification_date TEXT NOT NULL,
    PRIMARY KEY (refs_key, marker_key)
);
CREATE TABLE IF NOT EXISTS key_sequences (
    name TEXT PRIMARY KEY,
    last_value INTEGER NOT NULL
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, LoadError> {
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| LoadError::Store(format!("cannot open database {path}: {err}")))?;
        let store = Self { conn };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, LoadError> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        let store = Self { conn };
        store.bootstrap()?;
        Ok(store)
    }

    fn bootstrap(&self) -> Result<(), LoadError> {
        self.conn.execute_batch(SCHEMA).map_err(store_error)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, LoadError> {
        if !table.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(LoadError::Store(format!("invalid table name: {table}")));
        }
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(store_error)
    }

    fn max_value(&self, sql: &str, param: Option<i64>) -> Result<Option<i64>, LoadError> {
        let result = match param {
            Some(value) => self
                .conn
                .query_row(sql, params![value], |row| row.get::<_, Option<i64>>(0)),
            None => self.conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0)),
        };
        result.map_err(store_error)
    }
}

impl MappingStore for SqliteStore {
    fn valid_chromosomes(
        &self,
        organism_key: i64,
        excluded: &[String],
    ) -> Result<Vec<String>, LoadError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT chromosome FROM MRK_Chromosome
                 WHERE organism_key = ?1
                 ORDER BY sequence_num",
            )
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![organism_key], |row| row.get::<_, String>(0))
            .map_err(store_error)?;
        let mut chromosomes = Vec::new();
        for row in rows {
            let chromosome = row.map_err(store_error)?;
            if !excluded.iter().any(|code| code == &chromosome) {
                chromosomes.push(chromosome);
            }
        }
        Ok(chromosomes)
    }

    fn assay_types(&self) -> Result<Vec<(String, i64)>, LoadError> {
        let mut stmt = self
            .conn
            .prepare("SELECT description, assay_type_key FROM MLD_Assay_Types")
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn marker_by_accession(
        &self,
        accession_id: &str,
        organism_key: i64,
    ) -> Result<Option<ResolvedMarker>, LoadError> {
        self.conn
            .query_row(
                "SELECT m.marker_key, m.symbol
                 FROM MRK_Marker m
                 JOIN MRK_Accession a ON a.marker_key = m.marker_key
                 WHERE a.acc_id = ?1 AND m.organism_key = ?2 AND m.is_active = 1
                 LIMIT 1",
                params![accession_id, organism_key],
                |row| {
                    Ok(ResolvedMarker {
                        key: row.get(0)?,
                        symbol: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(store_error)
    }

    fn reference_by_jnum(&self, jnum: &ReferenceNumber) -> Result<Option<i64>, LoadError> {
        self.conn
            .query_row(
                "SELECT refs_key FROM BIB_Refs WHERE jnum_id = ?1",
                params![jnum.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)
    }

    fn user_by_login(&self, login: &str) -> Result<Option<i64>, LoadError> {
        self.conn
            .query_row(
                "SELECT user_key FROM MGI_User WHERE login = ?1",
                params![login],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)
    }

    fn max_experiment_key(&self) -> Result<Option<i64>, LoadError> {
        self.max_value("SELECT MAX(expt_key) FROM MLD_Expts", None)
    }

    fn experiment_sequence_value(&self) -> Result<Option<i64>, LoadError> {
        self.conn
            .query_row(
                "SELECT last_value FROM key_sequences WHERE name = ?1",
                params![EXPERIMENT_SEQUENCE],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)
    }

    fn max_accession_key(&self) -> Result<Option<i64>, LoadError> {
        self.max_value("SELECT MAX(accession_key) FROM ACC_Accession", None)
    }

    fn accession_max(&self, prefix: &str) -> Result<Option<i64>, LoadError> {
        self.conn
            .query_row(
                "SELECT max_numeric_part FROM ACC_AccessionMax WHERE prefix_part = ?1",
                params![prefix],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)
    }

    fn experiments_for_reference(
        &self,
        reference_key: i64,
    ) -> Result<Vec<ExistingExperiment>, LoadError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT expt_key, chromosome, tag FROM MLD_Expts
                 WHERE refs_key = ?1
                 ORDER BY tag",
            )
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![reference_key], |row| {
                Ok(ExistingExperiment {
                    key: ExperimentKey(row.get(0)?),
                    chromosome: row.get(1)?,
                    tag: row.get(2)?,
                })
            })
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn max_association_sequence(
        &self,
        experiment: ExperimentKey,
    ) -> Result<Option<i64>, LoadError> {
        self.max_value(
            "SELECT MAX(sequence_num) FROM MLD_Expt_Marker WHERE expt_key = ?1",
            Some(experiment.0),
        )
    }

    fn master_markers_for_reference(
        &self,
        reference_key: i64,
    ) -> Result<Vec<(i64, i64)>, LoadError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT marker_key, sequence_num FROM MLD_Marker
                 WHERE refs_key = ?1
                 ORDER BY sequence_num",
            )
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![reference_key], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn association_count(&self, reference_key: i64) -> Result<usize, LoadError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM MLD_Expt_Marker
                 WHERE expt_key IN (SELECT expt_key FROM MLD_Expts WHERE refs_key = ?1)",
                params![reference_key],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as usize)
            .map_err(store_error)
    }

    fn bulk_load(&mut self, batch: &LoadBatch) -> Result<(), LoadError> {
        let tx = self.conn.transaction().map_err(store_error)?;

        if let Some(purge) = &batch.purge {
            let rows = tx
                .execute(
                    "DELETE FROM MLD_Expt_Marker
                     WHERE expt_key IN (SELECT expt_key FROM MLD_Expts WHERE refs_key = ?1)",
                    params![purge.reference_key],
                )
                .map_err(store_error)?;
            if purge.master_markers {
                tx.execute(
                    "DELETE FROM MLD_Marker WHERE refs_key = ?1",
                    params![purge.reference_key],
                )
                .map_err(store_error)?;
            }
            tracing::warn!(
                reference_key = purge.reference_key,
                rows,
                "purged existing experiment markers"
            );
        }

        for row in &batch.experiments {
            tx.execute(
                "INSERT INTO MLD_Expts
                 (expt_key, refs_key, expt_type, tag, chromosome, creation_date, modification_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.key.0,
                    row.reference_key,
                    row.experiment_type,
                    row.tag,
                    row.chromosome,
                    row.created,
                    row.modified
                ],
            )
            .map_err(store_error)?;
        }

        for row in &batch.accessions {
            tx.execute(
                "INSERT INTO ACC_Accession
                 (accession_key, acc_id, prefix_part, numeric_part, logical_db_key, object_key,
                  mgi_type_key, private, preferred, created_by_key, modified_by_key,
                  creation_date, modification_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    row.key,
                    row.accession_id,
                    row.prefix,
                    row.numeric_part,
                    row.logical_db_key,
                    row.object_key.0,
                    row.object_type_key,
                    row.private,
                    row.preferred,
                    row.created_by,
                    row.modified_by,
                    row.created,
                    row.modified
                ],
            )
            .map_err(store_error)?;
        }

        for row in &batch.associations {
            tx.execute(
                "INSERT INTO MLD_Expt_Marker
                 (expt_key, marker_key, allele_key, assay_type_key, sequence_num, symbol,
                  description, matrix_data, creation_date, modification_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.experiment_key.0,
                    row.marker_key,
                    row.allele_key,
                    row.assay_key,
                    row.sequence,
                    row.symbol,
                    row.description,
                    row.matrix_data,
                    row.created,
                    row.modified
                ],
            )
            .map_err(store_error)?;
        }

        if let Some(first) = batch.notes.first() {
            tx.execute(
                "DELETE FROM MLD_Notes WHERE refs_key = ?1",
                params![first.reference_key],
            )
            .map_err(store_error)?;
        }
        for row in &batch.notes {
            tx.execute(
                "INSERT INTO MLD_Notes
                 (refs_key, sequence_num, note, creation_date, modification_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.reference_key,
                    row.sequence,
                    row.text,
                    row.created,
                    row.modified
                ],
            )
            .map_err(store_error)?;
        }

        for row in &batch.master_markers {
            tx.execute(
                "INSERT INTO MLD_Marker
                 (refs_key, marker_key, sequence_num, creation_date, modification_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.reference_key,
                    row.marker_key,
                    row.sequence,
                    row.created,
                    row.modified
                ],
            )
            .map_err(store_error)?;
        }

        tx.commit().map_err(store_error)
    }

    fn apply_script(&mut self, script: &str) -> Result<(), LoadError> {
        if script.trim().is_empty() {
            return Ok(());
        }
        self.conn.execute_batch(script).map_err(store_error)
    }

    fn publish_high_water(&mut self, mark: &HighWater) -> Result<(), LoadError> {
        let tx = self.conn.transaction().map_err(store_error)?;
        if let Some(suffix) = mark.last_suffix {
            tx.execute(
                "INSERT INTO ACC_AccessionMax (prefix_part, max_numeric_part) VALUES (?1, ?2)
                 ON CONFLICT(prefix_part)
                 DO UPDATE SET max_numeric_part = MAX(max_numeric_part, excluded.max_numeric_part)",
                params![mark.prefix, suffix],
            )
            .map_err(store_error)?;
        }
        if let Some(key) = mark.last_experiment_key {
            tx.execute(
                "INSERT INTO key_sequences (name, last_value) VALUES (?1, ?2)
                 ON CONFLICT(name)
                 DO UPDATE SET last_value = MAX(last_value, excluded.last_value)",
                params![EXPERIMENT_SEQUENCE, key],
            )
            .map_err(store_error)?;
        }
        tx.commit().map_err(store_error)
    }
}

fn store_error(err: rusqlite::Error) -> LoadError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            LoadError::KeyCollision(err.to_string())
        }
        _ => LoadError::Store(err.to_string()),
    }
}
