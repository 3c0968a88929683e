//! Connector registry - lookup table from connector id to definition.
//!
//! Built once from the built-in connectors plus caller-supplied extensions,
//! then read-only.

use super::{tiktok, ConnectorDefinition};
use std::collections::HashMap;
use std::fmt;

/// Construction errors for [`ConnectorRegistry`]
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    MissingId,
    MissingPlatform(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::MissingId => write!(f, "connector definition requires an 'id'"),
            RegistryError::MissingPlatform(id) => {
                write!(f, "connector '{}' requires a 'platform'", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Returns the connectors that ship with the crate.
pub fn builtin_connectors() -> Vec<ConnectorDefinition> {
    vec![tiktok::definition()]
}

#[derive(Clone, Debug, Default)]
pub struct ConnectorRegistry {
    definitions: HashMap<String, ConnectorDefinition>,
}

impl ConnectorRegistry {
    /// Builds a registry from exactly these definitions.
    ///
    /// Ids and platforms are trimmed and must be non-empty. A later definition
    /// with the same id replaces an earlier one.
    pub fn new<I>(definitions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = ConnectorDefinition>,
    {
        let mut map = HashMap::new();
        for mut definition in definitions {
            let id = definition.id.trim().to_string();
            if id.is_empty() {
                return Err(RegistryError::MissingId);
            }
            let platform = definition.platform.trim().to_string();
            if platform.is_empty() {
                return Err(RegistryError::MissingPlatform(id));
            }
            definition.id = id.clone();
            definition.platform = platform;
            map.insert(id, definition);
        }
        Ok(Self { definitions: map })
    }

    /// Built-in connectors followed by `extra`, so extensions can override
    /// a built-in id.
    pub fn with_builtins<I>(extra: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = ConnectorDefinition>,
    {
        Self::new(builtin_connectors().into_iter().chain(extra))
    }

    pub fn get(&self, id: &str) -> Option<&ConnectorDefinition> {
        let key = id.trim();
        if key.is_empty() {
            return None;
        }
        self.definitions.get(key)
    }

    /// All definitions, ordered by id.
    pub fn list(&self) -> Vec<&ConnectorDefinition> {
        let mut definitions: Vec<_> = self.definitions.values().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
