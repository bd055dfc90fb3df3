use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Deserialize)]
struct AliasEntry {
    pattern: String,
    alias: String,
}

/// Ordered table of name patterns and the alias each maps to.
///
/// The first pattern matching anywhere in a name wins.
#[derive(Debug, Default)]
pub struct NameAliases {
    entries: Vec<(Regex, String)>,
}

impl NameAliases {
    /// Loads a JSON array of `{"pattern": ..., "alias": ...}` objects.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAliases {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
        let entries: Vec<AliasEntry> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| invalid(e.to_string()))?;
        Self::from_pairs(entries.into_iter().map(|e| (e.pattern, e.alias)))
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn from_pairs<P, A>(pairs: impl IntoIterator<Item = (P, A)>) -> Result<Self, regex::Error>
    where
        P: AsRef<str>,
        A: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(pattern, alias)| Ok((Regex::new(pattern.as_ref())?, alias.into())))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { entries })
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.is_match(name))
            .map(|(_, alias)| alias.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
