use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Incremental,
    Full,
    Preview,
}

impl ProcessingMode {
    pub fn policy(self) -> ModePolicy {
        match self {
            ProcessingMode::Incremental => ModePolicy {
                purge_existing: false,
                persist: true,
            },
            ProcessingMode::Full => ModePolicy {
                purge_existing: true,
                persist: true,
            },
            ProcessingMode::Preview => ModePolicy {
                purge_existing: false,
                persist: false,
            },
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Incremental => write!(f, "incremental"),
            ProcessingMode::Full => write!(f, "full"),
            ProcessingMode::Preview => write!(f, "preview"),
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = LoadError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "incremental" => Ok(ProcessingMode::Incremental),
            "full" => Ok(ProcessingMode::Full),
            "preview" => Ok(ProcessingMode::Preview),
            _ => Err(LoadError::InvalidMode(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    pub purge_existing: bool,
    pub persist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    #[default]
    MaxPlusOne,
    Sequence,
}

impl FromStr for KeySource {
    type Err = LoadError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "max_plus_one" => Ok(KeySource::MaxPlusOne),
            "sequence" => Ok(KeySource::Sequence),
            _ => Err(LoadError::InvalidKeySource(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentKey(pub i64);

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMarker {
    pub key: i64,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceNumber(String);

impl ReferenceNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReferenceNumber {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        static JNUM: OnceLock<Regex> = OnceLock::new();
        let re = JNUM.get_or_init(|| Regex::new(r"^(?i:J:)?\s*(\d+)$").expect("valid regex"));
        let captures = re.captures(value.trim()).ok_or(())?;
        Ok(Self(format!("J:{}", &captures[1])))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!("full".parse::<ProcessingMode>().unwrap(), ProcessingMode::Full);
        assert_eq!(
            " preview ".parse::<ProcessingMode>().unwrap(),
            ProcessingMode::Preview
        );
        let err = "append".parse::<ProcessingMode>().unwrap_err();
        assert_matches!(err, LoadError::InvalidMode(value) if value == "append");
    }

    #[test]
    fn mode_policies() {
        assert!(ProcessingMode::Full.policy().purge_existing);
        assert!(!ProcessingMode::Incremental.policy().purge_existing);
        let preview = ProcessingMode::Preview.policy();
        assert!(!preview.purge_existing);
        assert!(!preview.persist);
    }

    #[test]
    fn reference_numbers_normalize() {
        let a: ReferenceNumber = "J:9999".parse().unwrap();
        let b: ReferenceNumber = "9999".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "J:9999");
        assert!("J:abc".parse::<ReferenceNumber>().is_err());
        assert!("".parse::<ReferenceNumber>().is_err());
    }
}
