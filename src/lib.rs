//! xmltable - streaming node-table builder
//!
//! Converts a single pass of structural XML events into a pre-order node
//! table: fixed 16-byte records addressed by pre value, value heaps, name
//! dictionaries and a namespace index.
//!
//! Backends:
//! - Memory: growable arrays, sizes patched in place
//! - Disk: append-only table file and heaps, sizes patched from a log
//! - Store: sled key-store, sizes patched transactionally
//!
//! ```ignore
//! use xmltable::{build_table, BuildOptions, EventParser, NO_ATTRS};
//!
//! let mut parser = EventParser::new()
//!     .open("XML", NO_ATTRS)
//!     .text("abc")
//!     .close("XML");
//! let table = build_table(&mut parser, "db", &BuildOptions::default())?;
//! assert_eq!(table.size(), 3);
//! ```

pub mod build;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod sink;
pub mod table;

pub use build::{BuildEvent, Builder, EventParser, Parser, SourceInfo, NO_ATTRS};
pub use config::{Backend, BuildOptions};
pub use crate::core::encoding::TextEncoding;
pub use data::{MetaData, NodeKind, NodeRecord};
pub use error::{BuildError, ErrorKind, Limit, Result};
pub use table::TableHandle;

/// Build a table named `name` from `parser` on the backend selected in `opts`
pub fn build_table(parser: &mut dyn Parser, name: &str, opts: &BuildOptions) -> Result<TableHandle> {
    Builder::new(opts)?.build(parser, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_table_from_toml_options() {
        let dir = tempfile::tempdir().unwrap();
        let opts = BuildOptions::from_toml(&format!(
            "chop = false\n[backend]\nkind = \"disk\"\npath = {:?}\n",
            dir.path().join("db").display().to_string()
        ))
        .unwrap();

        let mut parser = EventParser::new()
            .open("XML", NO_ATTRS)
            .text(" abc ")
            .close("XML");
        let table = build_table(&mut parser, "db", &opts).unwrap();
        assert_eq!(table.size(), 3);
        assert_eq!(table.value(2).unwrap().as_deref(), Some(&b" abc "[..]));
        assert!(!table.meta.chop);
        drop(table);

        let reopened = table::disk::open(&dir.path().join("db")).unwrap();
        assert_eq!(reopened.meta.name, "db");
        assert_eq!(reopened.node_size(1).unwrap(), 2);
        reopened.verify().unwrap();
    }
}
