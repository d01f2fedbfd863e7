use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{KeySource, ProcessingMode};
use crate::error::LoadError;

pub const DEFAULT_CONFIG_FILE: &str = "mapping-load.json";
pub const DEFAULT_NOTE_CHUNK_SIZE: usize = 255;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub experiment_type: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub accession_prefix: Option<String>,
    #[serde(default)]
    pub organism_key: Option<i64>,
    #[serde(default)]
    pub excluded_chromosomes: Option<Vec<String>>,
    #[serde(default)]
    pub logical_db_key: Option<i64>,
    #[serde(default)]
    pub object_type_key: Option<i64>,
    #[serde(default)]
    pub note_chunk_size: Option<usize>,
    #[serde(default)]
    pub experiment_key_source: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub master_markers: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database: Option<String>,
    pub input: Option<String>,
    pub output_dir: Option<String>,
    pub mode: Option<String>,
    pub experiment_type: Option<String>,
    pub reference: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database: Utf8PathBuf,
    pub input: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub mode: ProcessingMode,
    pub experiment_type: String,
    pub delimiter: char,
    pub accession_prefix: String,
    pub organism_key: i64,
    pub excluded_chromosomes: Vec<String>,
    pub logical_db_key: i64,
    pub object_type_key: i64,
    pub note_chunk_size: usize,
    pub experiment_key_source: KeySource,
    pub reference: Option<String>,
    pub created_by: Option<String>,
    pub master_markers: bool,
}

impl ResolvedConfig {
    pub fn per_run_identity(&self) -> Option<(&str, &str)> {
        match (&self.reference, &self.created_by) {
            (Some(reference), Some(created_by)) => Some((reference, created_by)),
            _ => None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, LoadError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::read(default_path)?
                } else {
                    Config::default()
                }
            }
        };
        Self::resolve_config(config, overrides)
    }

    fn read(path: PathBuf) -> Result<Config, LoadError> {
        let content = fs::read_to_string(&path).map_err(|_| LoadError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| LoadError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, LoadError> {
        let mode = overrides
            .mode
            .or(config.mode)
            .unwrap_or_else(|| "incremental".to_string())
            .parse::<ProcessingMode>()?;

        let database = overrides
            .database
            .or(config.database)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| LoadError::MissingOption("database".to_string()))?;

        let input = overrides
            .input
            .or(config.input)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| LoadError::MissingOption("input".to_string()))?;

        let experiment_type = overrides
            .experiment_type
            .or(config.experiment_type)
            .map(|value| value.replace('"', ""))
            .unwrap_or_else(|| "TEXT".to_string());
        if experiment_type.trim().is_empty() {
            return Err(LoadError::MissingOption("experiment_type".to_string()));
        }

        let delimiter = match config.delimiter {
            Some(value) => parse_delimiter(&value)?,
            None => '|',
        };

        let experiment_key_source = match config.experiment_key_source {
            Some(value) => value.parse()?,
            None => KeySource::default(),
        };

        let note_chunk_size = config.note_chunk_size.unwrap_or(DEFAULT_NOTE_CHUNK_SIZE);
        if note_chunk_size == 0 {
            return Err(LoadError::MissingOption(
                "note_chunk_size must be greater than zero".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            database: Utf8PathBuf::from(database),
            input: Utf8PathBuf::from(input),
            output_dir: Utf8PathBuf::from(
                overrides
                    .output_dir
                    .or(config.output_dir)
                    .unwrap_or_else(|| ".".to_string()),
            ),
            mode,
            experiment_type,
            delimiter,
            accession_prefix: config
                .accession_prefix
                .unwrap_or_else(|| "MGI:".to_string()),
            organism_key: config.organism_key.unwrap_or(1),
            excluded_chromosomes: config
                .excluded_chromosomes
                .unwrap_or_else(default_excluded_chromosomes),
            logical_db_key: config.logical_db_key.unwrap_or(1),
            object_type_key: config.object_type_key.unwrap_or(4),
            note_chunk_size,
            experiment_key_source,
            reference: overrides.reference.or(config.reference),
            created_by: overrides.created_by.or(config.created_by),
            master_markers: config.master_markers.unwrap_or(false),
        })
    }
}

pub fn default_excluded_chromosomes() -> Vec<String> {
    vec!["UN".to_string()]
}

fn parse_delimiter(value: &str) -> Result<char, LoadError> {
    match value {
        "tab" | "\\t" | "\t" => Ok('\t'),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Ok(ch),
                _ => Err(LoadError::InvalidDelimiter(other.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn minimal() -> ConfigOverrides {
        ConfigOverrides {
            database: Some("mgd.sqlite".to_string()),
            input: Some("mapping.txt".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn defaults_fill_in() {
        let resolved = ConfigLoader::resolve_config(Config::default(), minimal()).unwrap();
        assert_eq!(resolved.mode, ProcessingMode::Incremental);
        assert_eq!(resolved.experiment_type, "TEXT");
        assert_eq!(resolved.delimiter, '|');
        assert_eq!(resolved.accession_prefix, "MGI:");
        assert_eq!(resolved.note_chunk_size, 255);
        assert_eq!(resolved.excluded_chromosomes, default_excluded_chromosomes());
        assert_eq!(resolved.experiment_key_source, KeySource::MaxPlusOne);
        assert!(resolved.per_run_identity().is_none());
    }

    #[test]
    fn overrides_win_over_file() {
        let config = Config {
            mode: Some("full".to_string()),
            experiment_type: Some("TEXT-QTL".to_string()),
            ..Config::default()
        };
        let overrides = ConfigOverrides {
            mode: Some("preview".to_string()),
            experiment_type: Some("\"TEXT-Physical Mapping\"".to_string()),
            ..minimal()
        };
        let resolved = ConfigLoader::resolve_config(config, overrides).unwrap();
        assert_eq!(resolved.mode, ProcessingMode::Preview);
        assert_eq!(resolved.experiment_type, "TEXT-Physical Mapping");
    }

    #[test]
    fn unknown_mode_is_fatal() {
        let overrides = ConfigOverrides {
            mode: Some("replace".to_string()),
            ..minimal()
        };
        let err = ConfigLoader::resolve_config(Config::default(), overrides).unwrap_err();
        assert_matches!(err, LoadError::InvalidMode(_));
    }

    #[test]
    fn missing_database_is_fatal() {
        let overrides = ConfigOverrides {
            input: Some("mapping.txt".to_string()),
            ..ConfigOverrides::default()
        };
        let err = ConfigLoader::resolve_config(Config::default(), overrides).unwrap_err();
        assert_matches!(err, LoadError::MissingOption(name) if name == "database");
    }

    #[test]
    fn delimiter_forms() {
        assert_eq!(parse_delimiter("tab").unwrap(), '\t');
        assert_eq!(parse_delimiter(",").unwrap(), ',');
        assert_matches!(parse_delimiter("||"), Err(LoadError::InvalidDelimiter(_)));
    }
}
