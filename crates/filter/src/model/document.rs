//! Arena-backed document and its navigator.
//!
//! Nodes are stored in preorder; an element's attributes immediately follow it, before its
//! children. A node's position is therefore its index, and every subtree occupies the
//! contiguous range `[pos, end)`.

use super::{NodeKind, NodePos, Navigator};
use crate::consts::{BODY, ENVELOPE, SOAP11_NS, SOAP12_NS, XML_URI};
use crate::error::{DocumentError, NavResult, NavigatorError};
use compact_str::CompactString;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::sync::Arc;
use string_cache::DefaultAtom as Atom;

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    local: Atom,
    ns: Atom,
    prefix: Atom,
    value: CompactString,
    parent: Option<NodePos>,
    next_sibling: Option<NodePos>,
    first_child: Option<NodePos>,
    first_attribute: Option<NodePos>,
    next_attribute: Option<NodePos>,
    end: NodePos,
    namespaces: Vec<(Atom, Atom)>,
}

impl NodeData {
    fn new(kind: NodeKind, parent: Option<NodePos>) -> Self {
        Self {
            kind,
            local: Atom::from(""),
            ns: Atom::from(""),
            prefix: Atom::from(""),
            value: CompactString::default(),
            parent,
            next_sibling: None,
            first_child: None,
            first_attribute: None,
            next_attribute: None,
            end: 0,
            namespaces: Vec::new(),
        }
    }
}

/// An immutable parsed document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    body: Option<(NodePos, NodePos)>,
}

/// Whether a navigator may look inside the SOAP body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyAccess {
    Allowed,
    Denied,
}

struct OpenElement {
    pos: NodePos,
    last_child: Option<NodePos>,
    scope_len: usize,
}

struct Builder {
    nodes: Vec<NodeData>,
    open: Vec<OpenElement>,
    scope: Vec<(CompactString, CompactString)>,
    pending_text: String,
}

impl Builder {
    fn new() -> Self {
        let mut root = NodeData::new(NodeKind::Root, None);
        root.end = 1;
        Self {
            nodes: vec![root],
            open: vec![OpenElement { pos: 0, last_child: None, scope_len: 0 }],
            scope: Vec::new(),
            pending_text: String::new(),
        }
    }

    fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_URI);
        }
        self.scope.iter().rev().find(|(p, _)| p == prefix).map(|(_, uri)| uri.as_str())
    }

    fn append_child(&mut self, mut node: NodeData) -> NodePos {
        let pos = self.nodes.len();
        let mut parent = 0;
        if let Some(open) = self.open.last_mut() {
            match open.last_child {
                Some(prev) => self.nodes[prev].next_sibling = Some(pos),
                None => self.nodes[open.pos].first_child = Some(pos),
            }
            open.last_child = Some(pos);
            parent = open.pos;
        }
        node.parent = Some(parent);
        node.end = pos + 1;
        self.nodes.push(node);
        pos
    }

    fn flush_text(&mut self) {
        if self.pending_text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending_text);
        // Text outside the document element and whitespace-only runs carry no information here.
        if self.open.len() <= 1 || text.chars().all(is_xml_whitespace) {
            return;
        }
        let mut node = NodeData::new(NodeKind::Text, None);
        node.value = CompactString::from(text);
        self.append_child(node);
    }

    fn start_element(&mut self, start: &BytesStart<'_>) -> Result<(), DocumentError> {
        self.flush_text();
        let scope_len = self.scope.len();
        let mut declarations = Vec::new();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| xml_error(0, e))?;
            let key = utf8(attr.key.as_ref())?;
            let value = unescape(utf8(&attr.value)?)?;
            if key == "xmlns" {
                declarations.push((CompactString::default(), value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declarations.push((CompactString::from(prefix), value));
            } else {
                attributes.push((CompactString::from(key), value));
            }
        }
        self.scope.extend(declarations.iter().cloned());

        let name = start.name();
        let (prefix, local) = split_qname(utf8(name.as_ref())?);
        let ns = match self.resolve(prefix) {
            Some(uri) => uri.to_owned(),
            None if prefix.is_empty() => String::new(),
            None => return Err(DocumentError::UndeclaredPrefix(prefix.to_owned())),
        };
        let mut element = NodeData::new(NodeKind::Element, None);
        element.local = Atom::from(local);
        element.ns = Atom::from(ns.as_str());
        element.prefix = Atom::from(prefix);
        element.namespaces =
            declarations.iter().map(|(p, uri)| (Atom::from(p.as_str()), Atom::from(uri.as_str()))).collect();
        let pos = self.append_child(element);

        let mut previous_attr: Option<NodePos> = None;
        for (name, value) in attributes {
            let (prefix, local) = split_qname(&name);
            let ns = if prefix.is_empty() {
                ""
            } else {
                self.resolve(prefix).ok_or_else(|| DocumentError::UndeclaredPrefix(prefix.to_owned()))?
            };
            let mut node = NodeData::new(NodeKind::Attribute, Some(pos));
            node.local = Atom::from(local);
            node.ns = Atom::from(ns);
            node.prefix = Atom::from(prefix);
            node.value = value;
            let attr_pos = self.nodes.len();
            node.end = attr_pos + 1;
            self.nodes.push(node);
            match previous_attr {
                Some(prev) => self.nodes[prev].next_attribute = Some(attr_pos),
                None => self.nodes[pos].first_attribute = Some(attr_pos),
            }
            previous_attr = Some(attr_pos);
        }
        self.open.push(OpenElement { pos, last_child: None, scope_len });
        Ok(())
    }

    fn end_element(&mut self) {
        self.flush_text();
        if self.open.len() > 1
            && let Some(open) = self.open.pop()
        {
            self.nodes[open.pos].end = self.nodes.len();
            self.scope.truncate(open.scope_len);
        }
    }

    fn finish(mut self) -> Result<Document, DocumentError> {
        self.flush_text();
        if self.open.len() != 1 {
            return Err(DocumentError::Xml { position: 0, message: "unclosed element at end of input".into() });
        }
        let len = self.nodes.len();
        self.nodes[0].end = len;
        let mut doc = Document { nodes: self.nodes, body: None };
        doc.body = doc.locate_body();
        Ok(doc)
    }
}

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn split_qname(name: &str) -> (&str, &str) {
    name.split_once(':').unwrap_or(("", name))
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str, DocumentError> {
    std::str::from_utf8(bytes).map_err(|e| xml_error(0, e))
}

pub(crate) fn xml_error(position: u64, err: impl std::fmt::Display) -> DocumentError {
    DocumentError::Xml { position, message: err.to_string() }
}

pub(crate) fn unescape(raw: &str) -> Result<CompactString, DocumentError> {
    if raw.contains('&') {
        quick_xml::escape::unescape(raw).map(|s| CompactString::from(s.as_ref())).map_err(|e| xml_error(0, e))
    } else {
        Ok(CompactString::from(raw))
    }
}

pub(crate) fn resolve_reference(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

impl Document {
    /// Parse a document, resolving namespaces. Whitespace-only text is dropped.
    pub fn parse(xml: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(xml);
        let mut builder = Builder::new();
        loop {
            let event = reader.read_event().map_err(|e| xml_error(reader.buffer_position(), e))?;
            match event {
                Event::Start(start) => builder.start_element(&start)?,
                Event::Empty(start) => {
                    builder.start_element(&start)?;
                    builder.end_element();
                }
                Event::End(_) => builder.end_element(),
                Event::Text(text) => {
                    let raw = utf8(&text)?;
                    let decoded = unescape(raw)?;
                    builder.pending_text.push_str(&decoded);
                }
                Event::GeneralRef(reference) => {
                    let name = utf8(&reference)?;
                    let ch = resolve_reference(name).ok_or_else(|| {
                        xml_error(reader.buffer_position(), format!("unknown entity reference '&{name};'"))
                    })?;
                    builder.pending_text.push(ch);
                }
                Event::CData(data) => builder.pending_text.push_str(utf8(&data)?),
                Event::Comment(comment) => {
                    builder.flush_text();
                    let mut node = NodeData::new(NodeKind::Comment, None);
                    node.value = CompactString::from(utf8(&comment)?);
                    builder.append_child(node);
                }
                Event::PI(pi) => {
                    builder.flush_text();
                    let raw = utf8(&pi)?;
                    let (target, data) = raw.split_once(is_xml_whitespace).unwrap_or((raw, ""));
                    let mut node = NodeData::new(NodeKind::ProcessingInstruction, None);
                    node.local = Atom::from(target);
                    node.value = CompactString::from(data.trim_start_matches(is_xml_whitespace));
                    builder.append_child(node);
                }
                Event::Eof => break,
                _ => {}
            }
        }
        builder.finish()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Position and subtree end of the SOAP body, if the document is an envelope.
    pub fn body_range(&self) -> Option<(NodePos, NodePos)> {
        self.body
    }

    pub fn navigator(self: &Arc<Self>, access: BodyAccess) -> DocumentNavigator {
        DocumentNavigator { doc: Arc::clone(self), pos: 0, access }
    }

    fn locate_body(&self) -> Option<(NodePos, NodePos)> {
        let envelope = self.child_elements(0).next()?;
        let env = &self.nodes[envelope];
        if env.local.as_ref() != ENVELOPE || !(env.ns.as_ref() == SOAP11_NS || env.ns.as_ref() == SOAP12_NS) {
            return None;
        }
        self.child_elements(envelope)
            .find(|&pos| self.nodes[pos].local.as_ref() == BODY && self.nodes[pos].ns == env.ns)
            .map(|pos| (pos, self.nodes[pos].end))
    }

    pub(crate) fn child_elements(&self, parent: NodePos) -> impl Iterator<Item = NodePos> + '_ {
        std::iter::successors(self.nodes[parent].first_child, |&pos| self.nodes[pos].next_sibling)
            .filter(|&pos| self.nodes[pos].kind == NodeKind::Element)
    }

    pub(crate) fn element_name(&self, pos: NodePos) -> (&str, &str) {
        let node = &self.nodes[pos];
        (node.ns.as_ref(), node.local.as_ref())
    }

    fn string_value(&self, pos: NodePos) -> CompactString {
        let node = &self.nodes[pos];
        match node.kind {
            NodeKind::Root | NodeKind::Element => {
                let mut out = CompactString::default();
                for child in &self.nodes[pos..node.end] {
                    if child.kind == NodeKind::Text {
                        out.push_str(&child.value);
                    }
                }
                out
            }
            _ => node.value.clone(),
        }
    }
}

/// Cursor over a shared [`Document`].
#[derive(Debug, Clone)]
pub struct DocumentNavigator {
    doc: Arc<Document>,
    pos: NodePos,
    access: BodyAccess,
}

impl DocumentNavigator {
    pub fn document(&self) -> &Arc<Document> {
        &self.doc
    }

    pub fn body_access(&self) -> BodyAccess {
        self.access
    }

    fn node(&self) -> &NodeData {
        &self.doc.nodes[self.pos]
    }

    fn is_body(&self, pos: NodePos) -> bool {
        self.access == BodyAccess::Denied && self.doc.body.is_some_and(|(body, _)| body == pos)
    }

    fn inside_body(&self, pos: NodePos) -> bool {
        self.access == BodyAccess::Denied && self.doc.body.is_some_and(|(body, end)| pos > body && pos < end)
    }

    fn enter(&mut self, target: Option<NodePos>) -> NavResult<bool> {
        if self.is_body(self.pos) {
            return Err(NavigatorError::BodyAccessDenied);
        }
        Ok(target.is_some_and(|pos| {
            self.pos = pos;
            true
        }))
    }
}

impl Navigator for DocumentNavigator {
    fn position(&self) -> NodePos {
        self.pos
    }

    fn set_position(&mut self, pos: NodePos) -> NavResult<()> {
        if pos >= self.doc.nodes.len() {
            return Err(NavigatorError::InvalidPosition(pos));
        }
        if self.inside_body(pos) {
            return Err(NavigatorError::BodyAccessDenied);
        }
        self.pos = pos;
        Ok(())
    }

    fn root_position(&self) -> NodePos {
        0
    }

    fn kind(&self) -> NodeKind {
        self.node().kind
    }

    fn local_name(&self) -> &str {
        self.node().local.as_ref()
    }

    fn namespace_uri(&self) -> &str {
        self.node().ns.as_ref()
    }

    fn prefix(&self) -> &str {
        self.node().prefix.as_ref()
    }

    fn string_value(&self) -> NavResult<CompactString> {
        let end = self.node().end;
        if self.access == BodyAccess::Denied
            && let Some((body, _)) = self.doc.body
            && self.pos <= body
            && body < end
        {
            return Err(NavigatorError::BodyAccessDenied);
        }
        Ok(self.doc.string_value(self.pos))
    }

    fn move_to_root(&mut self) -> NavResult<()> {
        self.pos = 0;
        Ok(())
    }

    fn move_to_parent(&mut self) -> NavResult<bool> {
        Ok(self.node().parent.is_some_and(|parent| {
            self.pos = parent;
            true
        }))
    }

    fn move_to_first_child(&mut self) -> NavResult<bool> {
        let target = self.node().first_child;
        self.enter(target)
    }

    fn move_to_next(&mut self) -> NavResult<bool> {
        if self.node().kind == NodeKind::Attribute {
            return Ok(false);
        }
        Ok(self.node().next_sibling.is_some_and(|next| {
            self.pos = next;
            true
        }))
    }

    fn move_to_first_attribute(&mut self) -> NavResult<bool> {
        let target = self.node().first_attribute;
        self.enter(target)
    }

    fn move_to_next_attribute(&mut self) -> NavResult<bool> {
        Ok(self.node().next_attribute.is_some_and(|next| {
            self.pos = next;
            true
        }))
    }

    fn move_to_attribute(&mut self, local: &str, ns: &str) -> NavResult<bool> {
        let nodes = &self.doc.nodes;
        let found = std::iter::successors(self.node().first_attribute, |&pos| nodes[pos].next_attribute)
            .find(|&pos| nodes[pos].local.as_ref() == local && nodes[pos].ns.as_ref() == ns);
        self.enter(found)
    }

    fn lookup_namespace(&self, prefix: &str) -> Option<CompactString> {
        if prefix == "xml" {
            return Some(CompactString::from(XML_URI));
        }
        let mut cursor = Some(self.pos);
        while let Some(pos) = cursor {
            let node = &self.doc.nodes[pos];
            if let Some((_, uri)) = node.namespaces.iter().rev().find(|(p, _)| p.as_ref() == prefix) {
                return Some(CompactString::from(uri.as_ref()));
            }
            cursor = node.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE_XML: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="urn:a">
  <s:Header>
    <a:To a:mustUnderstand="1">http://svc/endpoint</a:To>
  </s:Header>
  <s:Body><Order id="7">pens &amp; ink<!-- note --></Order></s:Body>
</s:Envelope>"#;

    fn parsed() -> Arc<Document> {
        Arc::new(Document::parse(ENVELOPE_XML).expect("parse"))
    }

    #[test]
    fn preorder_with_attributes_after_their_element() {
        let doc = parsed();
        let mut nav = doc.navigator(BodyAccess::Allowed);
        assert!(nav.move_to_first_child().unwrap());
        assert!(nav.is_element_named("Envelope", SOAP12_NS));
        assert!(nav.move_to_first_child().unwrap());
        assert!(nav.is_element_named("Header", SOAP12_NS));
        assert!(nav.move_to_first_child().unwrap());
        let to = nav.position();
        assert_eq!(nav.local_name(), "To");
        assert!(nav.move_to_first_attribute().unwrap());
        assert_eq!(nav.position(), to + 1);
        assert_eq!(nav.namespace_uri(), "urn:a");
        assert!(!nav.move_to_next().unwrap());
        assert!(nav.move_to_parent().unwrap());
        assert_eq!(nav.string_value().unwrap(), "http://svc/endpoint");
    }

    #[test]
    fn whitespace_is_dropped_and_entities_resolved() {
        let doc = parsed();
        let (body, _) = doc.body_range().expect("body");
        let mut nav = doc.navigator(BodyAccess::Allowed);
        nav.set_position(body).unwrap();
        assert!(nav.move_to_first_child().unwrap());
        assert_eq!(nav.local_name(), "Order");
        assert_eq!(nav.namespace_uri(), "");
        assert_eq!(nav.string_value().unwrap(), "pens & ink");
        assert!(nav.move_to_first_child().unwrap());
        assert_eq!(nav.kind(), NodeKind::Text);
        assert!(nav.move_to_next().unwrap());
        assert_eq!(nav.kind(), NodeKind::Comment);
    }

    #[test]
    fn header_only_navigator_cannot_enter_body() {
        let doc = parsed();
        let (body, _) = doc.body_range().expect("body");
        let mut nav = doc.navigator(BodyAccess::Denied);
        nav.set_position(body).unwrap();
        assert_eq!(nav.local_name(), "Body");
        assert_eq!(nav.move_to_first_child(), Err(NavigatorError::BodyAccessDenied));
        assert_eq!(nav.string_value(), Err(NavigatorError::BodyAccessDenied));
        assert_eq!(nav.set_position(body + 1), Err(NavigatorError::BodyAccessDenied));
        nav.move_to_root().unwrap();
        assert_eq!(nav.string_value(), Err(NavigatorError::BodyAccessDenied));
    }

    #[test]
    fn namespaces_resolve_through_ancestors() {
        let doc = parsed();
        let (body, _) = doc.body_range().expect("body");
        let mut nav = doc.navigator(BodyAccess::Allowed);
        nav.set_position(body).unwrap();
        assert_eq!(nav.lookup_namespace("a").as_deref(), Some("urn:a"));
        assert_eq!(nav.lookup_namespace("xml").as_deref(), Some(XML_URI));
        assert_eq!(nav.lookup_namespace("missing"), None);
    }

    #[test]
    fn undeclared_prefix_is_rejected() {
        let err = Document::parse("<p:root/>").unwrap_err();
        assert_eq!(err, DocumentError::UndeclaredPrefix("p".into()));
    }

    #[test]
    fn seeking_outside_the_document_fails() {
        let doc = parsed();
        let mut nav = doc.navigator(BodyAccess::Allowed);
        assert_eq!(nav.set_position(doc.len()), Err(NavigatorError::InvalidPosition(doc.len())));
    }
}
