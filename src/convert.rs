use std::io::{BufRead, Write};

use serde::Serialize;

use crate::domain::ReferenceNumber;
use crate::error::LoadError;
use crate::input::decoded_lines;
use crate::output::BCP_DELIMITER;
use crate::record::SHORT_ARITY;
use crate::store::MappingStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvertSummary {
    pub lines: usize,
    pub written: usize,
    pub blank: usize,
}

pub fn verify_identity(
    store: &dyn MappingStore,
    reference: &str,
    created_by: &str,
) -> Result<ReferenceNumber, LoadError> {
    let jnum = reference
        .parse::<ReferenceNumber>()
        .map_err(|_| LoadError::UnknownReference(reference.to_string()))?;
    if store.reference_by_jnum(&jnum)?.is_none() {
        return Err(LoadError::UnknownReference(jnum.to_string()));
    }
    if created_by.trim().is_empty() || store.user_by_login(created_by.trim())?.is_none() {
        return Err(LoadError::UnknownUser(created_by.to_string()));
    }
    Ok(jnum)
}

pub fn convert_curator_file<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    reference: &str,
    created_by: &str,
) -> Result<ConvertSummary, LoadError> {
    let mut summary = ConvertSummary::default();
    for (index, line) in decoded_lines(reader).enumerate() {
        let line = line?;
        summary.lines += 1;
        if line.trim().is_empty() {
            summary.blank += 1;
            continue;
        }

        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() < SHORT_ARITY {
            return Err(LoadError::InvalidLine {
                line: index + 1,
                content: line.clone(),
            });
        }
        let mut out = fields[..SHORT_ARITY - 1].to_vec();
        out.push(fields[SHORT_ARITY - 1].trim());
        out.push(reference);
        out.push(created_by);
        writeln!(writer, "{}", out.join(&BCP_DELIMITER.to_string()))
            .map_err(|err| LoadError::Filesystem(err.to_string()))?;
        summary.written += 1;
    }
    writer
        .flush()
        .map_err(|err| LoadError::Filesystem(err.to_string()))?;
    Ok(summary)
}
