use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunSummary};
use crate::batch::{BcpFields, LoadBatch};
use crate::convert::ConvertSummary;
use crate::error::LoadError;

pub const BCP_DELIMITER: char = '|';

pub const EXPERIMENT_TABLE: &str = "MLD_Expts";
pub const ACCESSION_TABLE: &str = "ACC_Accession";
pub const ASSOCIATION_TABLE: &str = "MLD_Expt_Marker";
pub const NOTE_TABLE: &str = "MLD_Notes";
pub const MASTER_MARKER_TABLE: &str = "MLD_Marker";

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub experiments: Utf8PathBuf,
    pub accessions: Utf8PathBuf,
    pub associations: Utf8PathBuf,
    pub notes: Utf8PathBuf,
    pub master_markers: Utf8PathBuf,
    pub script: Utf8PathBuf,
    pub diagnostics: Utf8PathBuf,
    pub errors: Utf8PathBuf,
}

impl OutputPaths {
    pub fn for_input(input: &Utf8Path, output_dir: &Utf8Path) -> Self {
        let tail = input.file_name().unwrap_or("mapping");
        let path = |suffix: &str| output_dir.join(format!("{tail}.{suffix}"));
        Self {
            experiments: path(&format!("{EXPERIMENT_TABLE}.bcp")),
            accessions: path(&format!("{ACCESSION_TABLE}.bcp")),
            associations: path(&format!("{ASSOCIATION_TABLE}.bcp")),
            notes: path(&format!("{NOTE_TABLE}.bcp")),
            master_markers: path(&format!("{MASTER_MARKER_TABLE}.bcp")),
            script: path("marker_updates.sql"),
            diagnostics: path("diag"),
            errors: path("error"),
        }
    }

    pub fn load_plan(&self, include_master_markers: bool) -> Vec<(&'static str, &Utf8Path)> {
        let mut plan = vec![
            (EXPERIMENT_TABLE, self.experiments.as_path()),
            (ASSOCIATION_TABLE, self.associations.as_path()),
            (ACCESSION_TABLE, self.accessions.as_path()),
            (NOTE_TABLE, self.notes.as_path()),
        ];
        if include_master_markers {
            plan.push((MASTER_MARKER_TABLE, self.master_markers.as_path()));
        }
        plan
    }
}

// Free text may carry the delimiter; it becomes a space so column counts hold.
pub fn format_row<T: BcpFields>(row: &T) -> String {
    row.fields()
        .iter()
        .map(|field| field.replace(BCP_DELIMITER, " "))
        .collect::<Vec<_>>()
        .join(&BCP_DELIMITER.to_string())
}

pub fn write_rows<T: BcpFields>(path: &Utf8Path, rows: &[T]) -> Result<(), LoadError> {
    let mut content = String::new();
    for row in rows {
        content.push_str(&format_row(row));
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), LoadError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| LoadError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("mapping-load")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| LoadError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| LoadError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| LoadError::Filesystem(format!("write {path}: {err}")))?;
    Ok(())
}

pub fn write_batch(
    paths: &OutputPaths,
    batch: &LoadBatch,
    include_master_markers: bool,
) -> Result<(), LoadError> {
    write_rows(&paths.experiments, &batch.experiments)?;
    write_rows(&paths.accessions, &batch.accessions)?;
    write_rows(&paths.associations, &batch.associations)?;
    write_rows(&paths.notes, &batch.notes)?;
    if include_master_markers {
        write_rows(&paths.master_markers, &batch.master_markers)?;
    }
    write_atomic(&paths.script, batch.script().as_bytes())
}

pub struct RunLog {
    path: Utf8PathBuf,
    writer: BufWriter<File>,
}

impl RunLog {
    pub fn create(path: &Utf8Path, started: &str) -> Result<Self, LoadError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| LoadError::Filesystem(err.to_string()))?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| LoadError::Filesystem(format!("could not open file {path}: {err}")))?;
        let mut log = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        log.line(&format!("Start Date/Time: {started}"))?;
        Ok(log)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn line(&mut self, text: &str) -> Result<(), LoadError> {
        writeln!(self.writer, "{text}").map_err(|err| LoadError::Filesystem(err.to_string()))
    }

    pub fn writer(&mut self) -> &mut dyn Write {
        &mut self.writer
    }

    pub fn finish(mut self, ended: &str) -> Result<(), LoadError> {
        write!(self.writer, "\n\nEnd Date/Time: {ended}\n")
            .and_then(|_| self.writer.flush())
            .map_err(|err| LoadError::Filesystem(err.to_string()))
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_convert(result: &ConvertSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::NoteRow;

    #[test]
    fn paths_follow_input_tail() {
        let paths = OutputPaths::for_input(Utf8Path::new("/data/in/fantom2.txt"), Utf8Path::new("out"));
        assert_eq!(paths.experiments.as_str(), "out/fantom2.txt.MLD_Expts.bcp");
        assert_eq!(paths.errors.as_str(), "out/fantom2.txt.error");
        assert_eq!(paths.load_plan(false).len(), 4);
        assert_eq!(paths.load_plan(true).len(), 5);
    }

    #[test]
    fn rows_are_pipe_delimited_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("notes.bcp")).unwrap();
        let rows = vec![NoteRow {
            reference_key: 7,
            sequence: 1,
            text: "mapped by FISH".to_string(),
            created: "10/19/2026".to_string(),
            modified: "10/19/2026".to_string(),
        }];
        write_rows(&path, &rows).unwrap();
        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(content, "7|1|mapped by FISH|10/19/2026|10/19/2026\n");
    }

    #[test]
    fn delimiter_in_note_text_keeps_columns() {
        let row = NoteRow {
            reference_key: 7,
            sequence: 1,
            text: "a|b".to_string(),
            created: "10/19/2026".to_string(),
            modified: "10/19/2026".to_string(),
        };
        let line = format_row(&row);
        assert_eq!(line, "7|1|a b|10/19/2026|10/19/2026");
        assert_eq!(line.split(BCP_DELIMITER).count(), 5);
    }

    #[test]
    fn run_log_brackets_lines_with_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("x.error")).unwrap();
        let mut log = RunLog::create(&path, "start").unwrap();
        log.line("Invalid Marker (1) MGI:0").unwrap();
        log.finish("end").unwrap();
        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(
            content,
            "Start Date/Time: start\nInvalid Marker (1) MGI:0\n\n\nEnd Date/Time: end\n"
        );
    }
}
