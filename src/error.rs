use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("invalid processing mode: {0}")]
    #[diagnostic(help("expected one of: incremental, full, preview"))]
    InvalidMode(String),

    #[error("invalid assay: {0}")]
    #[diagnostic(help("the assay type table is missing this label; fix the reference table and re-run"))]
    InvalidAssay(String),

    #[error("missing required option: {0}")]
    MissingOption(String),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid experiment key source: {0}")]
    #[diagnostic(help("expected one of: max_plus_one, sequence"))]
    InvalidKeySource(String),

    #[error("invalid delimiter: {0}")]
    InvalidDelimiter(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("key collision in backing store: {0}")]
    #[diagnostic(help("another loader may be writing to the same store; loads assume exclusive access"))]
    KeyCollision(String),

    #[error("no accession counter for prefix {0}")]
    MissingAccessionCounter(String),

    #[error("unknown reference: {0}")]
    #[diagnostic(help("the J: number must exist in the bibliographic reference table"))]
    UnknownReference(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("invalid line ({line}): {content}")]
    InvalidLine { line: usize, content: String },
}
