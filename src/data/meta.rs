//! Table Metadata
//!
//! The metadata block travels with every finished table; on disk it is
//! persisted together with the dictionaries as the [`Catalog`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::names::Names;
use super::namespaces::Namespaces;
use crate::error::{BuildError, Result};

/// Database-level facts gathered during a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    /// Database name
    pub name: String,
    /// Number of records (next pre value while building)
    pub size: u32,
    /// Maximum number of simultaneously open nodes, document included
    pub height: u32,
    /// Encoding the source was converted from
    pub encoding: String,
    /// Whitespace chopping was enabled
    pub chop: bool,
    /// Source identity (path, URL, or a caller-chosen label)
    pub source: String,
    /// Modification time of the source, if known
    pub source_time: Option<DateTime<Utc>>,
    /// Time the build finished
    pub created: DateTime<Utc>,
}

impl MetaData {
    /// Metadata for a new table called `name`
    pub fn new(name: &str) -> Self {
        MetaData {
            name: name.to_string(),
            size: 0,
            height: 0,
            encoding: "UTF-8".to_string(),
            chop: true,
            source: String::new(),
            source_time: None,
            created: Utc::now(),
        }
    }
}

/// Metadata and dictionaries, persisted next to a finished table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub meta: MetaData,
    pub elem_names: Names,
    pub attr_names: Names,
    pub namespaces: Namespaces,
}

impl Catalog {
    /// Serialize with bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a catalog written by [`Catalog::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| BuildError::Corrupt(format!("catalog: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_roundtrip() {
        let mut meta = MetaData::new("db");
        meta.size = 4;
        meta.height = 3;
        let mut elem_names = Names::elements();
        let id = elem_names.intern(b"XML").unwrap();

        let catalog = Catalog {
            meta,
            elem_names,
            attr_names: Names::attributes(),
            namespaces: Namespaces::new(),
        };
        let loaded = Catalog::decode(&catalog.encode().unwrap()).unwrap();
        assert_eq!(loaded.meta, catalog.meta);
        assert_eq!(loaded.elem_names.lookup(b"XML"), Some(id));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Catalog::decode(&[1, 2, 3]),
            Err(BuildError::Corrupt(_))
        ));
    }
}
