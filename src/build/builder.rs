//! Table Builder
//!
//! Turns a single pass of structural events into a node table. The builder
//! assigns pre values, computes parent distances from a stack of open
//! elements, validates well-formedness, and hands every record to the
//! active [`NodeSink`]. Subtree sizes are only known when an element closes;
//! they are sent back to the sink as patches.
//!
//! ```text
//! Parser ──open/close/text──> Builder ──add_node/add_text/set_size──> NodeSink
//!                               │
//!                               ├── Names (elements, attributes)
//!                               ├── Namespaces
//!                               └── MetaData
//! ```
//!
//! The tree phase moves from awaiting the root element, to inside the tree,
//! to closed once the root element ends. Any element opened after that is a
//! second root.

use std::borrow::Cow;

use chrono::Utc;
use tracing::{info, info_span, trace, warn};

use super::parser::Parser;
use crate::config::BuildOptions;
use crate::core::value::{all_ws, trim};
use crate::data::{Catalog, MetaData, Names, Namespaces, NodeKind};
use crate::error::{lossy, BuildError, Limit, Result};
use crate::sink::{open_sink, AttrEntry, ElementEntry, NodeSink};
use crate::table::TableHandle;

const XML_SPACE: &[u8] = b"xml:space";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingRoot,
    InsideTree,
    Closed,
}

/// An element whose end tag has not been seen yet
#[derive(Debug, Clone, Copy)]
struct OpenElement {
    pre: u32,
    name_id: u16,
    /// Size written when the element was opened
    attr_size: u32,
    /// Whitespace chopping applies to text in this element
    chop: bool,
}

pub struct Builder {
    sink: Box<dyn NodeSink>,
    opts: BuildOptions,
    meta: MetaData,
    elem_names: Names,
    attr_names: Names,
    namespaces: Namespaces,
    stack: Vec<OpenElement>,
    phase: Phase,
    stop: Option<Box<dyn Fn() -> bool>>,
}

impl Builder {
    /// Create a builder writing to the backend selected in `opts`
    pub fn new(opts: &BuildOptions) -> Result<Self> {
        let sink = open_sink(&opts.backend)?;
        Ok(Self::with_sink(sink, opts))
    }

    /// Create a builder writing to an already opened sink
    pub fn with_sink(sink: Box<dyn NodeSink>, opts: &BuildOptions) -> Self {
        Builder {
            sink,
            opts: opts.clone(),
            meta: MetaData::new(""),
            elem_names: Names::elements(),
            attr_names: Names::attributes(),
            namespaces: Namespaces::new(),
            stack: Vec::with_capacity(32),
            phase: Phase::AwaitingRoot,
            stop: None,
        }
    }

    /// Install a hook that is asked at every element close whether to stop
    pub fn with_stop_check(mut self, stop: impl Fn() -> bool + 'static) -> Self {
        self.stop = Some(Box::new(stop));
        self
    }

    /// Run `parser` to completion and finish the table
    ///
    /// On failure the sink's streams are closed and the partial artifact is
    /// left in place.
    pub fn build(mut self, parser: &mut dyn Parser, name: &str) -> Result<TableHandle> {
        let span = info_span!("build", db = name, backend = self.sink.backend());
        let _guard = span.enter();

        if let Err(e) = self.run(parser, name) {
            warn!(error = %e, pre = self.sink.len(), "build failed");
            self.sink.close();
            return Err(e);
        }
        self.finish()
    }

    fn run(&mut self, parser: &mut dyn Parser, name: &str) -> Result<()> {
        let source = parser.source();
        info!(source = %source.label, "starting build");

        self.meta = MetaData::new(name);
        self.meta.source = source.label;
        self.meta.source_time = source.timestamp;
        self.meta.encoding = self.opts.encoding.name().to_string();
        self.meta.chop = self.opts.chop;
        self.meta.height = 1;

        self.sink.add_document(name.as_bytes())?;
        parser.parse(self)?;

        if let Some(open) = self.stack.last() {
            return Err(BuildError::UnclosedElement {
                pre: open.pre,
                name: self.elem_name(open.name_id),
            });
        }

        let size = self.sink.len();
        if size != 1 {
            self.sink.set_size(0, size)?;
        }
        self.meta.size = size;
        Ok(())
    }

    fn finish(self) -> Result<TableHandle> {
        let Builder {
            sink,
            mut meta,
            elem_names,
            attr_names,
            namespaces,
            ..
        } = self;
        meta.created = Utc::now();
        let (size, height) = (meta.size, meta.height);
        let (elements, attributes) = (elem_names.len(), attr_names.len());

        let catalog = Catalog {
            meta,
            elem_names,
            attr_names,
            namespaces,
        };
        match sink.finish(catalog) {
            Ok(handle) => {
                info!(size, height, elements, attributes, "build finished");
                Ok(handle)
            }
            Err(e) => {
                warn!(error = %e, pre = size, "finishing build failed");
                Err(e)
            }
        }
    }

    /// Record a namespace binding for the next element
    pub fn start_namespace(&mut self, prefix: &[u8], uri: &[u8]) -> Result<()> {
        let prefix = self.convert(prefix)?;
        let uri = self.convert(uri)?;
        let pre = self.sink.len();
        self.namespaces.bind(&prefix, &uri, pre)
    }

    /// Open an element; its end tag follows later
    pub fn open_node(&mut self, name: &[u8], attrs: &[(&[u8], &[u8])]) -> Result<()> {
        let elem = self.open_element(name, attrs)?;
        self.stack.push(elem);
        self.meta.height = self.meta.height.max(self.stack.len() as u32 + 1);
        Ok(())
    }

    /// Open and immediately close an element
    pub fn open_empty_node(&mut self, name: &[u8], attrs: &[(&[u8], &[u8])]) -> Result<()> {
        let elem = self.open_element(name, attrs)?;
        self.meta.height = self.meta.height.max(self.stack.len() as u32 + 2);
        self.close_element(elem)
    }

    /// Close the innermost element, which must be named `name`
    pub fn close_node(&mut self, name: &[u8]) -> Result<()> {
        let name = self.convert(name)?;
        let pre = self.sink.len();
        let Some(open) = self.stack.last().copied() else {
            return Err(BuildError::UnexpectedClose {
                pre,
                name: lossy(&name),
            });
        };
        if self.elem_names.lookup(&name) != Some(open.name_id) {
            return Err(BuildError::TagMismatch {
                pre,
                expected: self.elem_name(open.name_id),
                found: lossy(&name),
            });
        }
        self.stack.pop();
        self.close_element(open)
    }

    /// Add a text node
    ///
    /// Outside the root element only whitespace is accepted, and dropped.
    pub fn text(&mut self, value: &[u8]) -> Result<()> {
        let value = self.convert(value)?;
        let Some(parent) = self.stack.last().copied() else {
            if all_ws(&value) {
                return Ok(());
            }
            return Err(BuildError::MisplacedText {
                pre: self.sink.len(),
                text: lossy(trim(&value)),
            });
        };

        let value = if parent.chop { trim(&value) } else { &value[..] };
        if value.is_empty() {
            return Ok(());
        }
        self.add_content(value, NodeKind::Text)
    }

    /// Add a comment; outside the root it needs `allow_prolog_nodes`
    pub fn comment(&mut self, value: &[u8]) -> Result<()> {
        let value = self.convert(value)?;
        self.check_placement(NodeKind::Comment)?;
        self.add_content(&value, NodeKind::Comment)
    }

    /// Add a processing instruction; `value` is the target, optionally
    /// followed by a space and the data
    pub fn pi(&mut self, value: &[u8]) -> Result<()> {
        let value = self.convert(value)?;
        self.check_placement(NodeKind::ProcessingInstruction)?;
        self.add_content(&value, NodeKind::ProcessingInstruction)
    }

    /// Replace the value of an attribute record written earlier
    pub fn set_attribute_value(&mut self, pre: u32, value: &[u8]) -> Result<()> {
        let size = self.sink.len();
        if pre >= size {
            return Err(BuildError::InvalidPosition { pre, size });
        }
        let value = self.convert(value)?;
        self.sink.set_attr_value(pre, &value)
    }

    /// Number of records written so far
    pub fn len(&self) -> u32 {
        self.sink.len()
    }

    /// No record has been written yet
    pub fn is_empty(&self) -> bool {
        self.sink.is_empty()
    }

    fn open_element(&mut self, name: &[u8], attrs: &[(&[u8], &[u8])]) -> Result<OpenElement> {
        let pre = self.sink.len();
        let name = self.convert(name)?;
        match self.phase {
            Phase::Closed => {
                return Err(BuildError::MultipleRoots {
                    pre,
                    name: lossy(&name),
                })
            }
            Phase::AwaitingRoot => self.phase = Phase::InsideTree,
            Phase::InsideTree => {}
        }
        if self.stack.len() >= self.opts.max_depth {
            return Err(BuildError::DepthExceeded {
                pre,
                max: self.opts.max_depth,
            });
        }
        self.check_capacity(1 + attrs.len())?;

        let mut converted: Vec<(Cow<'_, [u8]>, Cow<'_, [u8]>)> = Vec::with_capacity(attrs.len());
        for &(attr, value) in attrs {
            let attr = self.opts.encoding.to_utf8(attr)?;
            if converted.iter().any(|(seen, _)| *seen == attr) {
                return Err(BuildError::DuplicateAttribute {
                    pre,
                    element: lossy(&name),
                    attribute: lossy(&attr),
                });
            }
            converted.push((attr, self.opts.encoding.to_utf8(value)?));
        }

        let parent = self.stack.last().copied();
        let ns_flag = self.namespaces.open(pre);
        let uri_id = self.namespaces.resolve_element(&name)?;
        let name_id = self.elem_names.intern(&name)?;
        if let Some(parent) = parent {
            self.elem_names.mark_non_leaf(parent.name_id);
        }

        let mut chop = parent.map_or(self.opts.chop, |p| p.chop);
        let mut entries = Vec::with_capacity(converted.len());
        for (attr, value) in &converted {
            if &**attr == XML_SPACE {
                match &**value {
                    b"preserve" => chop = false,
                    b"default" => chop = self.opts.chop,
                    _ => {}
                }
            }
            entries.push(AttrEntry {
                name_id: self.attr_names.intern(attr)?,
                uri_id: self.namespaces.resolve_attribute(attr)?,
                value: &**value,
            });
        }

        let dist = pre - parent.map_or(0, |p| p.pre);
        let elem = ElementEntry {
            name_id,
            uri_id,
            ns_flag,
            dist,
        };
        self.sink.add_node(elem, &entries)?;
        trace!(pre, depth = self.stack.len() + 1, attributes = entries.len(), "opened element");

        Ok(OpenElement {
            pre,
            name_id,
            attr_size: entries.len() as u32 + 1,
            chop,
        })
    }

    fn close_element(&mut self, elem: OpenElement) -> Result<()> {
        if let Some(stop) = &self.stop {
            if stop() {
                return Err(BuildError::Interrupted);
            }
        }

        let end = self.sink.len();
        let size = end - elem.pre;
        if size != elem.attr_size {
            self.sink.set_size(elem.pre, size)?;
        }
        self.namespaces.close(end);
        if self.stack.is_empty() {
            self.phase = Phase::Closed;
        }
        Ok(())
    }

    fn add_content(&mut self, value: &[u8], kind: NodeKind) -> Result<()> {
        self.check_capacity(1)?;
        let parent = self.stack.last().map_or(0, |p| p.pre);
        let pre = self.sink.len();
        self.sink.add_text(value, pre - parent, kind)?;
        Ok(())
    }

    /// Comments and PIs outside the root element become document children
    /// only when prolog nodes are allowed
    fn check_placement(&self, kind: NodeKind) -> Result<()> {
        if self.stack.is_empty() && !self.opts.allow_prolog_nodes {
            return Err(BuildError::MisplacedNode {
                pre: self.sink.len(),
                what: kind.label(),
            });
        }
        Ok(())
    }

    fn check_capacity(&self, records: usize) -> Result<()> {
        if self.sink.len() as u64 + records as u64 > self.opts.max_nodes as u64 {
            return Err(BuildError::LimitExceeded {
                limit: Limit::Nodes,
                max: self.opts.max_nodes as u64,
            });
        }
        Ok(())
    }

    fn convert<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        self.opts.encoding.to_utf8(bytes)
    }

    fn elem_name(&self, id: u16) -> String {
        self.elem_names.key(id).map(lossy).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::path::Path;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::build::parser::{EventParser, NO_ATTRS};
    use crate::config::Backend;
    use crate::core::encoding::TextEncoding;
    use crate::error::ErrorKind;
    use crate::sink::disk::ATTR_HEAP;
    use crate::sink::{MemorySink, SizePolicy};

    type Shape = (NodeKind, u32, u32, Option<String>, Option<String>);

    fn build(parser: EventParser, opts: &BuildOptions) -> Result<TableHandle> {
        let mut parser = parser;
        Builder::new(opts)?.build(&mut parser, "test")
    }

    fn memory(parser: EventParser) -> Result<TableHandle> {
        build(parser, &BuildOptions::default())
    }

    /// Kind, dist, size, name and value of every record
    fn shape(table: &TableHandle) -> Vec<Shape> {
        let text = |b: Option<Vec<u8>>| b.map(|b| String::from_utf8(b).unwrap());
        (0..table.size())
            .map(|pre| {
                let rec = table.record(pre).unwrap();
                (
                    rec.kind,
                    rec.dist,
                    rec.size,
                    text(table.name(pre).unwrap()),
                    text(table.value(pre).unwrap()),
                )
            })
            .collect()
    }

    fn backends(dir: &Path) -> Vec<BuildOptions> {
        vec![
            BuildOptions::default(),
            BuildOptions::default().with_backend(Backend::Disk {
                path: dir.join("disk"),
            }),
            BuildOptions::default().with_backend(Backend::Store {
                path: dir.join("store"),
            }),
        ]
    }

    fn scenario_a() -> EventParser {
        EventParser::new()
            .open("XML", NO_ATTRS)
            .open("SUB", NO_ATTRS)
            .text("abc")
            .close("SUB")
            .close("XML")
    }

    #[test]
    fn test_nested_sizes_on_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let expected = vec![
            (NodeKind::Document, 0, 4, None, Some("test".to_string())),
            (NodeKind::Element, 1, 3, Some("XML".to_string()), None),
            (NodeKind::Element, 1, 2, Some("SUB".to_string()), None),
            (NodeKind::Text, 1, 1, None, Some("abc".to_string())),
        ];
        for opts in backends(dir.path()) {
            let table = build(scenario_a(), &opts).unwrap();
            assert_eq!(shape(&table), expected, "backend {}", table.backend());
            assert_eq!(table.meta.size, 4);
            assert_eq!(table.meta.height, 3);
            table.verify().unwrap();
        }
    }

    #[test]
    fn test_attributes_count_in_size() {
        let dir = tempfile::tempdir().unwrap();
        let parser = || {
            EventParser::new()
                .open("a", &[("x", "1"), ("y", "two")])
                .empty("b", &[("z", "")])
                .text("t")
                .close("a")
        };
        for opts in backends(dir.path()) {
            let table = build(parser(), &opts).unwrap();
            assert_eq!(
                shape(&table),
                vec![
                    (NodeKind::Document, 0, 7, None, Some("test".to_string())),
                    (NodeKind::Element, 1, 6, Some("a".to_string()), None),
                    (NodeKind::Attribute, 1, 1, Some("x".to_string()), Some("1".to_string())),
                    (NodeKind::Attribute, 2, 1, Some("y".to_string()), Some("two".to_string())),
                    (NodeKind::Element, 3, 2, Some("b".to_string()), None),
                    (NodeKind::Attribute, 1, 1, Some("z".to_string()), Some(String::new())),
                    (NodeKind::Text, 5, 1, None, Some("t".to_string())),
                ],
                "backend {}",
                table.backend()
            );
            assert_eq!(table.attr_size(1).unwrap(), 3);
            table.verify().unwrap();
        }
    }

    #[test]
    fn test_duplicate_attribute() {
        let parser = EventParser::new().open("A", &[("x", "1"), ("x", "2")]);
        let err = memory(parser).unwrap_err();
        assert!(matches!(
            &err,
            BuildError::DuplicateAttribute { pre: 1, element, attribute }
                if element == "A" && attribute == "x"
        ));
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_multiple_roots() {
        let parser = EventParser::new()
            .open("A", NO_ATTRS)
            .close("A")
            .open("B", NO_ATTRS);
        let err = memory(parser).unwrap_err();
        assert!(matches!(err, BuildError::MultipleRoots { pre: 2, ref name } if name == "B"));
    }

    #[test]
    fn test_text_outside_root() {
        let err = memory(EventParser::new().text("hi").open("A", NO_ATTRS).close("A"))
            .unwrap_err();
        assert!(matches!(err, BuildError::MisplacedText { pre: 1, ref text } if text == "hi"));

        let err = memory(EventParser::new().open("A", NO_ATTRS).close("A").text(" x "))
            .unwrap_err();
        assert!(matches!(err, BuildError::MisplacedText { pre: 2, .. }));

        // Whitespace around the root leaves no record, with or without chopping
        for chop in [true, false] {
            let parser = EventParser::new()
                .text(" \n\t")
                .open("A", NO_ATTRS)
                .close("A")
                .text("\n");
            let table = build(parser, &BuildOptions::default().with_chop(chop)).unwrap();
            assert_eq!(table.size(), 2);
        }
    }

    #[test]
    fn test_inline_attribute_values_leave_heap_untouched() {
        let heap_size = |value: &str| {
            let dir = tempfile::tempdir().unwrap();
            let opts = BuildOptions::default().with_backend(Backend::Disk {
                path: dir.path().to_path_buf(),
            });
            let parser = EventParser::new().empty("a", &[("v", value)]);
            let table = build(parser, &opts).unwrap();
            assert_eq!(table.value(2).unwrap().as_deref(), Some(value.as_bytes()));
            let inlined = table.is_inlined(2).unwrap();
            (std::fs::metadata(dir.path().join(ATTR_HEAP)).unwrap().len(), inlined)
        };
        assert_eq!(heap_size("12345"), (0, true));
        let (size, inlined) = heap_size("not-a-short-integer");
        assert!(size > 0);
        assert!(!inlined);
    }

    #[test]
    fn test_max_depth() {
        let nested = |depth: usize| {
            let mut parser = EventParser::new();
            for _ in 0..depth {
                parser = parser.open("d", NO_ATTRS);
            }
            for _ in 0..depth {
                parser = parser.close("d");
            }
            parser
        };
        let opts = BuildOptions::default().with_max_depth(3);
        let table = build(nested(3), &opts).unwrap();
        assert_eq!(table.meta.height, 4);

        let err = build(nested(4), &opts).unwrap_err();
        assert!(matches!(err, BuildError::DepthExceeded { pre: 4, max: 3 }));
    }

    #[test]
    fn test_node_limit() {
        let opts = BuildOptions::default().with_max_nodes(3);
        let ok = EventParser::new().open("a", NO_ATTRS).text("t").close("a");
        assert_eq!(build(ok, &opts).unwrap().size(), 3);

        let over = EventParser::new().open("a", &[("x", "1"), ("y", "2")]);
        let err = build(over, &opts).unwrap_err();
        assert!(matches!(
            err,
            BuildError::LimitExceeded {
                limit: Limit::Nodes,
                max: 3
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Capacity);
    }

    #[test]
    fn test_close_errors() {
        let err = memory(
            EventParser::new()
                .open("a", NO_ATTRS)
                .open("b", NO_ATTRS)
                .close("a"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::TagMismatch { pre: 3, ref expected, ref found }
                if expected == "b" && found == "a"
        ));

        let err = memory(EventParser::new().close("a")).unwrap_err();
        assert!(matches!(err, BuildError::UnexpectedClose { pre: 1, .. }));

        let err = memory(EventParser::new().open("a", NO_ATTRS).open("b", NO_ATTRS).close("b"))
            .unwrap_err();
        assert!(matches!(err, BuildError::UnclosedElement { pre: 1, ref name } if name == "a"));
    }

    #[test]
    fn test_empty_document() {
        let table = memory(EventParser::new()).unwrap();
        assert_eq!(table.size(), 1);
        assert_eq!(table.node_size(0).unwrap(), 1);
        assert_eq!(table.meta.height, 1);
        table.verify().unwrap();
    }

    #[test]
    fn test_namespaces() {
        let parser = EventParser::new()
            .namespace("p", "urn:p")
            .open("p:a", &[("p:x", "1"), ("y", "2")])
            .empty("p:b", NO_ATTRS)
            .empty("c", NO_ATTRS)
            .close("p:a");
        let table = memory(parser).unwrap();
        let uri = table.namespaces.uri_id(b"urn:p").unwrap();

        let a = table.record(1).unwrap();
        assert!(a.ns_flag);
        assert_eq!(a.uri_id, uri);
        assert_eq!(table.record(2).unwrap().uri_id, uri);
        assert_eq!(table.record(3).unwrap().uri_id, 0);
        let b = table.record(4).unwrap();
        assert!(!b.ns_flag);
        assert_eq!(b.uri_id, uri);
        assert_eq!(table.record(5).unwrap().uri_id, 0);

        assert_eq!(table.namespaces.uri_at(b"p", 4), Some(&b"urn:p"[..]));
        assert_eq!(table.namespaces.uri_at(b"p", 6), None);
    }

    #[test]
    fn test_chop_and_xml_space() {
        let parser = || {
            EventParser::new()
                .open("a", NO_ATTRS)
                .text("  x  ")
                .text(" \n ")
                .open("p", &[("xml:space", "preserve")])
                .text("  y  ")
                .open("q", &[("xml:space", "default")])
                .text("  z  ")
                .close("q")
                .close("p")
                .close("a")
        };
        let values = |table: &TableHandle| -> Vec<String> {
            shape(table)
                .into_iter()
                .filter(|s| s.0 == NodeKind::Text)
                .filter_map(|s| s.4)
                .collect()
        };

        let chopped = memory(parser()).unwrap();
        assert_eq!(values(&chopped), vec!["x", "  y  ", "z"]);
        assert!(chopped.meta.chop);

        let kept = build(parser(), &BuildOptions::default().with_chop(false)).unwrap();
        assert_eq!(values(&kept), vec!["  x  ", " \n ", "  y  ", "  z  "]);
    }

    #[test]
    fn test_prolog_nodes() {
        let parser = || {
            EventParser::new()
                .comment(" c ")
                .pi("style href")
                .open("a", NO_ATTRS)
                .close("a")
        };
        let err = memory(parser()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::MisplacedNode {
                pre: 1,
                what: "comment"
            }
        ));

        let table = build(parser(), &BuildOptions::default().with_prolog_nodes(true)).unwrap();
        assert_eq!(table.kind(1).unwrap(), NodeKind::Comment);
        assert_eq!(table.value(1).unwrap().as_deref(), Some(&b" c "[..]));
        assert_eq!(table.parent(2).unwrap(), Some(0));
        assert_eq!(table.dist(2).unwrap(), 2);
        assert_eq!(table.name(2).unwrap().as_deref(), Some(&b"style"[..]));
        assert_eq!(table.dist(3).unwrap(), 3);
        table.verify().unwrap();
    }

    #[test]
    fn test_stop_check_interrupts() {
        let closes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&closes);
        let mut parser = EventParser::new()
            .open("a", NO_ATTRS)
            .empty("b", NO_ATTRS)
            .empty("c", NO_ATTRS)
            .close("a");
        let err = Builder::new(&BuildOptions::default())
            .unwrap()
            .with_stop_check(move || {
                counter.set(counter.get() + 1);
                counter.get() > 1
            })
            .build(&mut parser, "stop")
            .unwrap_err();
        assert!(matches!(err, BuildError::Interrupted));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(closes.get(), 2);
    }

    #[test]
    fn test_late_attribute_value() {
        let dir = tempfile::tempdir().unwrap();
        let parser = || {
            EventParser::new()
                .open("a", &[("id", "")])
                .attribute_value(2, "assigned later")
                .close("a")
        };
        for opts in backends(dir.path()) {
            let table = build(parser(), &opts).unwrap();
            assert_eq!(
                table.value(2).unwrap().as_deref(),
                Some(&b"assigned later"[..])
            );
        }

        // A late value aimed at an element stops the build on the spot
        let dir = tempfile::tempdir().unwrap();
        for opts in backends(dir.path()) {
            let closes = Rc::new(Cell::new(0));
            let counter = Rc::clone(&closes);
            let mut parser = EventParser::new()
                .open("a", NO_ATTRS)
                .attribute_value(1, "x")
                .empty("b", NO_ATTRS)
                .empty("c", NO_ATTRS)
                .close("a");
            let err = Builder::new(&opts)
                .unwrap()
                .with_stop_check(move || {
                    counter.set(counter.get() + 1);
                    false
                })
                .build(&mut parser, "test")
                .unwrap_err();
            assert!(matches!(err, BuildError::NotAnAttribute { pre: 1 }));
            assert_eq!(closes.get(), 0);
        }

        let err = memory(EventParser::new().open("a", NO_ATTRS).attribute_value(7, "x"))
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidPosition { pre: 7, size: 2 }));
    }

    #[test]
    fn test_name_statistics() {
        let parser = EventParser::new()
            .open("root", NO_ATTRS)
            .empty("leaf", NO_ATTRS)
            .empty("leaf", NO_ATTRS)
            .close("root");
        let table = memory(parser).unwrap();
        let root = table.elem_names.lookup(b"root").unwrap();
        let leaf = table.elem_names.lookup(b"leaf").unwrap();
        assert!(!table.elem_names.stat(root).unwrap().leaf);
        assert!(table.elem_names.stat(leaf).unwrap().leaf);
        assert_eq!(table.elem_names.stat(leaf).unwrap().count, 2);
    }

    #[test]
    fn test_source_encoding_is_converted() {
        let utf16 =
            |s: &str| -> Vec<u8> { s.encode_utf16().flat_map(u16::to_le_bytes).collect() };
        let parser = EventParser::new()
            .open(utf16("a"), &[(utf16("k"), utf16("v"))])
            .text(utf16("héllo"))
            .close(utf16("a"));
        let opts = BuildOptions::default().with_encoding(TextEncoding::Utf16Le);
        let table = build(parser, &opts).unwrap();
        assert_eq!(table.name(1).unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(table.value(3).unwrap().as_deref(), Some("héllo".as_bytes()));
        assert_eq!(table.meta.encoding, "UTF-16LE");

        let bad = EventParser::new().open(&b"a\xff"[..], NO_ATTRS);
        assert!(matches!(memory(bad), Err(BuildError::Encoding { .. })));
    }

    #[test]
    fn test_disk_failure_keeps_partial_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let opts = BuildOptions::default().with_backend(Backend::Disk {
            path: dir.path().to_path_buf(),
        });
        let parser = EventParser::new().open("a", NO_ATTRS).open("b", NO_ATTRS).close("a");
        assert!(build(parser, &opts).is_err());
        assert!(dir.path().join(crate::sink::disk::TABLE_FILE).exists());
        assert!(dir.path().join(crate::sink::disk::PATCH_LOG).exists());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Never,
        Text,
        Finish,
    }

    /// Memory sink that logs every call and can fail on demand
    struct RecordingSink {
        inner: MemorySink,
        calls: Rc<RefCell<Vec<String>>>,
        fail: FailAt,
    }

    impl RecordingSink {
        fn new(calls: &Rc<RefCell<Vec<String>>>, fail: FailAt) -> Box<Self> {
            Box::new(RecordingSink {
                inner: MemorySink::new(),
                calls: Rc::clone(calls),
                fail,
            })
        }

        fn log(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl NodeSink for RecordingSink {
        fn backend(&self) -> &'static str {
            "recording"
        }

        fn size_policy(&self) -> SizePolicy {
            SizePolicy::Immediate
        }

        fn len(&self) -> u32 {
            self.inner.len()
        }

        fn add_document(&mut self, name: &[u8]) -> Result<u32> {
            self.log(format!("document {}", lossy(name)));
            self.inner.add_document(name)
        }

        fn add_node(&mut self, elem: ElementEntry, attrs: &[AttrEntry<'_>]) -> Result<u32> {
            self.log(format!("node dist={} attrs={}", elem.dist, attrs.len()));
            self.inner.add_node(elem, attrs)
        }

        fn add_text(&mut self, value: &[u8], dist: u32, kind: NodeKind) -> Result<u32> {
            if self.fail == FailAt::Text {
                return Err(BuildError::Io(std::io::Error::other("disk full")));
            }
            self.log(format!("{} {} dist={dist}", kind.label(), lossy(value)));
            self.inner.add_text(value, dist, kind)
        }

        fn set_size(&mut self, pre: u32, size: u32) -> Result<()> {
            self.log(format!("size {pre}={size}"));
            self.inner.set_size(pre, size)
        }

        fn set_attr_value(&mut self, pre: u32, value: &[u8]) -> Result<()> {
            self.log(format!("value {pre}"));
            self.inner.set_attr_value(pre, value)
        }

        fn finish(self: Box<Self>, catalog: Catalog) -> Result<TableHandle> {
            self.log("finish".to_string());
            if self.fail == FailAt::Finish {
                return Err(BuildError::Corrupt("catalog rejected".into()));
            }
            Box::new(self.inner).finish(catalog)
        }

        fn close(&mut self) {
            self.log("close".to_string());
        }
    }

    #[test]
    fn test_caller_supplied_sink() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut parser = EventParser::new()
            .open("a", &[("id", "x")])
            .text("hi")
            .empty("b", NO_ATTRS)
            .close("a");
        let sink = RecordingSink::new(&calls, FailAt::Never);
        let builder = Builder::with_sink(sink, &BuildOptions::default());
        let table = builder.build(&mut parser, "doc").unwrap();

        assert_eq!(table.backend(), "memory");
        assert_eq!(table.size(), 5);
        assert_eq!(
            *calls.borrow(),
            vec![
                "document doc",
                "node dist=1 attrs=1",
                "text hi dist=2",
                "node dist=3 attrs=0",
                "size 1=4",
                "size 0=5",
                "finish",
            ]
        );
        table.verify().unwrap();
    }

    #[test]
    fn test_sink_write_error_aborts_and_closes() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut parser = EventParser::new()
            .open("a", NO_ATTRS)
            .text("hi")
            .close("a");
        let sink = RecordingSink::new(&calls, FailAt::Text);
        let builder = Builder::with_sink(sink, &BuildOptions::default());
        let err = builder.build(&mut parser, "doc").unwrap_err();

        assert!(matches!(err, BuildError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(calls.borrow().last().map(String::as_str), Some("close"));
        assert!(!calls.borrow().iter().any(|c| c == "finish"));
    }

    #[test]
    fn test_finish_error_is_returned() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut parser = EventParser::new().empty("a", NO_ATTRS);
        let sink = RecordingSink::new(&calls, FailAt::Finish);
        let builder = Builder::with_sink(sink, &BuildOptions::default());
        let err = builder.build(&mut parser, "doc").unwrap_err();

        assert!(matches!(err, BuildError::Corrupt(_)));
        assert_eq!(calls.borrow().last().map(String::as_str), Some("finish"));
    }
}
