//! Table Construction
//!
//! - Builder: the orchestrator a parser drives
//! - Parser: the event source contract, plus a replaying event list

pub mod builder;
pub mod parser;

pub use builder::Builder;
pub use parser::{BuildEvent, EventParser, Parser, SourceInfo, NO_ATTRS};
