//! Name Dictionary
//!
//! Interns element and attribute names to dense ids. Names are copied once
//! into a shared byte buffer and looked up through a content hash, so
//! repeated names cost no additional storage.
//!
//! The id space is bounded by what a record can hold; running out is a
//! [`BuildError::LimitExceeded`], never a wraparound.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Limit, Result};

/// Largest element or attribute name id (15 bits)
pub const MAX_NAME_ID: u16 = 0x7FFF;

/// Per-name statistics gathered while building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameStat {
    /// Number of interned occurrences
    pub count: u32,
    /// No occurrence has had element children
    pub leaf: bool,
}

impl Default for NameStat {
    fn default() -> Self {
        NameStat { count: 0, leaf: true }
    }
}

/// Bijective name <-> id dictionary
///
/// Id 0 is reserved for the empty name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "NamesRepr", into = "NamesRepr")]
pub struct Names {
    /// (offset, len) into `data`, indexed by id
    entries: Vec<(u32, u32)>,
    /// Name bytes
    data: Vec<u8>,
    /// Statistics, indexed by id
    stats: Vec<NameStat>,
    /// Hash of name bytes -> ids with that hash (handles rare collisions)
    hash_index: HashMap<u64, Vec<u16>>,
    /// Which id space this dictionary fills
    limit: Limit,
    /// Largest id that may be assigned
    max_id: u16,
}

impl Names {
    /// Create a dictionary bounded to `max_id` ids
    pub fn with_max(limit: Limit, max_id: u16) -> Self {
        Names {
            entries: vec![(0, 0)],
            data: Vec::with_capacity(1024),
            stats: vec![NameStat::default()],
            hash_index: HashMap::new(),
            limit,
            max_id,
        }
    }

    /// Element name dictionary
    pub fn elements() -> Self {
        Self::with_max(Limit::ElementNames, MAX_NAME_ID)
    }

    /// Attribute name dictionary
    pub fn attributes() -> Self {
        Self::with_max(Limit::AttributeNames, MAX_NAME_ID)
    }

    #[inline]
    fn compute_hash(s: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Intern a name, creating an id on first use
    ///
    /// Each call counts as one occurrence of the name.
    pub fn intern(&mut self, name: &[u8]) -> Result<u16> {
        if name.is_empty() {
            return Ok(0);
        }

        let hash = Self::compute_hash(name);
        if let Some(id) = self.find(hash, name) {
            self.stats[id as usize].count += 1;
            return Ok(id);
        }

        let next = self.entries.len();
        if next > self.max_id as usize {
            return Err(BuildError::LimitExceeded {
                limit: self.limit,
                max: self.max_id as u64,
            });
        }

        let id = next as u16;
        self.entries.push((self.data.len() as u32, name.len() as u32));
        self.data.extend_from_slice(name);
        self.stats.push(NameStat {
            count: 1,
            leaf: true,
        });
        self.hash_index.entry(hash).or_default().push(id);
        Ok(id)
    }

    /// Id of a name, if it has been interned
    pub fn lookup(&self, name: &[u8]) -> Option<u16> {
        if name.is_empty() {
            return Some(0);
        }
        self.find(Self::compute_hash(name), name)
    }

    fn find(&self, hash: u64, name: &[u8]) -> Option<u16> {
        self.hash_index
            .get(&hash)?
            .iter()
            .copied()
            .find(|&id| self.key(id) == Some(name))
    }

    /// Name bytes for an id
    pub fn key(&self, id: u16) -> Option<&[u8]> {
        let &(offset, len) = self.entries.get(id as usize)?;
        let start = offset as usize;
        self.data.get(start..start + len as usize)
    }

    /// Record that an occurrence of this name has element children
    pub fn mark_non_leaf(&mut self, id: u16) {
        if let Some(stat) = self.stats.get_mut(id as usize) {
            stat.leaf = false;
        }
    }

    /// Occurrence count and leaf flag for a name
    pub fn stat(&self, id: u16) -> Option<&NameStat> {
        if id == 0 {
            return None;
        }
        self.stats.get(id as usize)
    }

    /// Number of interned names (excluding the reserved empty name)
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    /// No name has been interned
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Iterate over (id, name) pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8])> + '_ {
        (1..self.entries.len() as u16).filter_map(move |id| Some((id, self.key(id)?)))
    }
}

/// Persisted form; the hash index is rebuilt on load because the hasher is
/// not stable across builds of the crate
#[derive(Serialize, Deserialize)]
struct NamesRepr {
    names: Vec<Vec<u8>>,
    stats: Vec<NameStat>,
    limit: LimitRepr,
    max_id: u16,
}

#[derive(Serialize, Deserialize)]
enum LimitRepr {
    ElementNames,
    AttributeNames,
    Namespaces,
    Other,
}

impl From<Names> for NamesRepr {
    fn from(names: Names) -> Self {
        let limit = match names.limit {
            Limit::ElementNames => LimitRepr::ElementNames,
            Limit::AttributeNames => LimitRepr::AttributeNames,
            Limit::Namespaces => LimitRepr::Namespaces,
            _ => LimitRepr::Other,
        };
        NamesRepr {
            names: names.iter().map(|(_, n)| n.to_vec()).collect(),
            stats: names.stats[1..].to_vec(),
            limit,
            max_id: names.max_id,
        }
    }
}

impl From<NamesRepr> for Names {
    fn from(repr: NamesRepr) -> Self {
        let limit = match repr.limit {
            LimitRepr::ElementNames => Limit::ElementNames,
            LimitRepr::AttributeNames => Limit::AttributeNames,
            LimitRepr::Namespaces | LimitRepr::Other => Limit::Namespaces,
        };
        let mut names = Names::with_max(limit, repr.max_id);
        for (name, stat) in repr.names.iter().zip(repr.stats) {
            let id = names.entries.len() as u16;
            names.entries.push((names.data.len() as u32, name.len() as u32));
            names.data.extend_from_slice(name);
            names.stats.push(stat);
            names
                .hash_index
                .entry(Self::compute_hash(name))
                .or_default()
                .push(id);
        }
        names
    }
}
