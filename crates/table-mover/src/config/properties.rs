//! Reader for plain `key=value` properties files.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::{MoverError, Result};

/// Parsed properties file. Later keys override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// Parse properties text.
    ///
    /// Accepts `key=value` and `key: value`; lines starting with `#` or `!`
    /// are comments. Keys and values are trimmed.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let split = line.find(['=', ':']);
            let (key, value) = match split {
                Some(pos) => (&line[..pos], &line[pos + 1..]),
                None => (line, ""),
            };
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for a key that must be present, or a `Config` error naming it.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| MoverError::Config(format!("{} is required", key)))
    }

    /// Owned value, empty when absent.
    pub fn get_or_empty(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    /// Parse an optional value; present but unparsable is an error.
    pub fn parse_value<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                MoverError::Config(format!("{} must be a number, got '{}'", key, raw))
            }),
        }
    }
}
