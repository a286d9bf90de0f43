//! Data Model
//!
//! The physical pieces a build produces:
//! - Record: the fixed 16-byte node record addressed by pre value
//! - Names: bounded element/attribute name dictionaries with statistics
//! - Namespaces: scoped prefix/URI bindings keyed by pre value
//! - Meta: database metadata and the persisted catalog

pub mod meta;
pub mod names;
pub mod namespaces;
pub mod record;

pub use meta::{Catalog, MetaData};
pub use names::{NameStat, Names};
pub use namespaces::Namespaces;
pub use record::{NodeKind, NodeRecord};
