//! Messages as match targets.
//!
//! A [`Message`] exposes only its headers to filters: any attempt to look inside the body fails
//! with [`NavigatorError::BodyAccessDenied`](crate::error::NavigatorError::BodyAccessDenied).
//! A [`MessageBuffer`] allows body access. Both wrap one parsed envelope.

use crate::consts::{BODY, ENVELOPE, HEADER, SOAP11_NS, SOAP12_NS, WSA_AUGUST_2004_NS, WSA10_NS};
use crate::error::{DocumentError, FilterError, NavResult};
use crate::model::{BodyAccess, Document, DocumentNavigator, NodeKind, NodePos, Navigator};
use compact_str::CompactString;
use quick_xml::escape::escape;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeVersion {
    Soap11,
    Soap12,
}

impl EnvelopeVersion {
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::Soap11 => SOAP11_NS,
            Self::Soap12 => SOAP12_NS,
        }
    }

    pub fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            SOAP11_NS => Some(Self::Soap11),
            SOAP12_NS => Some(Self::Soap12),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressingVersion {
    August2004,
    #[default]
    Wsa10,
}

impl AddressingVersion {
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::August2004 => WSA_AUGUST_2004_NS,
            Self::Wsa10 => WSA10_NS,
        }
    }
}

fn is_addressing_namespace(ns: &str) -> bool {
    ns == WSA10_NS || ns == WSA_AUGUST_2004_NS
}

/// The addressing headers filters and tables look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingHeader {
    To,
    Action,
    MessageId,
    RelatesTo,
    ReplyTo,
    From,
    FaultTo,
}

impl AddressingHeader {
    pub const fn local_name(self) -> &'static str {
        match self {
            Self::To => "To",
            Self::Action => "Action",
            Self::MessageId => "MessageID",
            Self::RelatesTo => "RelatesTo",
            Self::ReplyTo => "ReplyTo",
            Self::From => "From",
            Self::FaultTo => "FaultTo",
        }
    }

    /// Endpoint-reference headers carry their value in an `Address` child.
    pub const fn is_endpoint_reference(self) -> bool {
        matches!(self, Self::ReplyTo | Self::From | Self::FaultTo)
    }

    const ALL: [Self; 7] =
        [Self::To, Self::Action, Self::MessageId, Self::RelatesTo, Self::ReplyTo, Self::From, Self::FaultTo];
}

/// One top-level header element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub namespace: CompactString,
    pub local_name: CompactString,
    /// Text content. Headers with element content read as the empty string.
    pub value: CompactString,
    pub position: NodePos,
}

/// Decoded addressing headers (either WS-Addressing version).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addressing {
    pub to: Option<CompactString>,
    pub action: Option<CompactString>,
    pub message_id: Option<CompactString>,
    pub relates_to: Option<CompactString>,
    pub reply_to: Option<CompactString>,
    pub from: Option<CompactString>,
    pub fault_to: Option<CompactString>,
}

impl Addressing {
    pub fn get(&self, header: AddressingHeader) -> Option<&str> {
        let slot = match header {
            AddressingHeader::To => &self.to,
            AddressingHeader::Action => &self.action,
            AddressingHeader::MessageId => &self.message_id,
            AddressingHeader::RelatesTo => &self.relates_to,
            AddressingHeader::ReplyTo => &self.reply_to,
            AddressingHeader::From => &self.from,
            AddressingHeader::FaultTo => &self.fault_to,
        };
        slot.as_deref()
    }

    fn slot_mut(&mut self, header: AddressingHeader) -> &mut Option<CompactString> {
        match header {
            AddressingHeader::To => &mut self.to,
            AddressingHeader::Action => &mut self.action,
            AddressingHeader::MessageId => &mut self.message_id,
            AddressingHeader::RelatesTo => &mut self.relates_to,
            AddressingHeader::ReplyTo => &mut self.reply_to,
            AddressingHeader::From => &mut self.from,
            AddressingHeader::FaultTo => &mut self.fault_to,
        }
    }

    /// Read every addressing header through a navigator. The first occurrence wins.
    pub fn read<N: Navigator>(nav: &N) -> NavResult<Self> {
        let mut addressing = Self::default();
        let mut cursor = nav.clone();
        cursor.move_to_root()?;
        if !move_to_envelope_child(&mut cursor, HEADER)? || !cursor.move_to_first_child()? {
            return Ok(addressing);
        }
        loop {
            if cursor.kind() == NodeKind::Element && is_addressing_namespace(cursor.namespace_uri()) {
                let local = cursor.local_name();
                if let Some(header) = AddressingHeader::ALL.into_iter().find(|h| h.local_name() == local) {
                    let slot = addressing.slot_mut(header);
                    if slot.is_none() {
                        *slot = Some(addressing_value(&cursor, header)?);
                    }
                }
            }
            if !cursor.move_to_next()? {
                break;
            }
        }
        Ok(addressing)
    }
}

/// Move from the root to a direct child of the envelope (`Header` or `Body`).
pub fn move_to_envelope_child<N: Navigator>(nav: &mut N, local: &str) -> NavResult<bool> {
    if !move_to_envelope(nav)? {
        return Ok(false);
    }
    let ns = CompactString::from(nav.namespace_uri());
    if !nav.move_to_first_child()? {
        return Ok(false);
    }
    loop {
        if nav.is_element_named(local, &ns) {
            return Ok(true);
        }
        if !nav.move_to_next()? {
            return Ok(false);
        }
    }
}

/// Move from the root to the envelope element.
pub fn move_to_envelope<N: Navigator>(nav: &mut N) -> NavResult<bool> {
    if !nav.move_to_first_child()? {
        return Ok(false);
    }
    loop {
        if nav.kind() == NodeKind::Element {
            return Ok(nav.local_name() == ENVELOPE && EnvelopeVersion::from_namespace(nav.namespace_uri()).is_some());
        }
        if !nav.move_to_next()? {
            return Ok(false);
        }
    }
}

/// Text of a header element, or the empty string when it has element content.
pub fn header_text<N: Navigator>(nav: &N) -> NavResult<CompactString> {
    let mut cursor = nav.clone();
    if cursor.move_to_first_child()? {
        loop {
            if cursor.kind() == NodeKind::Element {
                return Ok(CompactString::default());
            }
            if !cursor.move_to_next()? {
                break;
            }
        }
    }
    nav.string_value()
}

fn addressing_value<N: Navigator>(nav: &N, header: AddressingHeader) -> NavResult<CompactString> {
    if !header.is_endpoint_reference() {
        return header_text(nav);
    }
    let ns = CompactString::from(nav.namespace_uri());
    let mut cursor = nav.clone();
    if cursor.move_to_first_child()? {
        loop {
            if cursor.is_element_named("Address", &ns) {
                return cursor.string_value();
            }
            if !cursor.move_to_next()? {
                break;
            }
        }
    }
    Ok(CompactString::default())
}

/// Read one addressing header through a navigator positioned anywhere in the document.
pub fn read_addressing_header<N: Navigator>(nav: &N, header: AddressingHeader) -> NavResult<Option<CompactString>> {
    let mut cursor = nav.clone();
    cursor.move_to_root()?;
    if !move_to_envelope_child(&mut cursor, HEADER)? || !cursor.move_to_first_child()? {
        return Ok(None);
    }
    loop {
        if cursor.kind() == NodeKind::Element
            && cursor.local_name() == header.local_name()
            && is_addressing_namespace(cursor.namespace_uri())
        {
            return addressing_value(&cursor, header).map(Some);
        }
        if !cursor.move_to_next()? {
            return Ok(None);
        }
    }
}

/// Read every top-level header element.
pub fn read_headers<N: Navigator>(nav: &N) -> NavResult<Vec<HeaderEntry>> {
    let mut headers = Vec::new();
    let mut cursor = nav.clone();
    cursor.move_to_root()?;
    if !move_to_envelope_child(&mut cursor, HEADER)? || !cursor.move_to_first_child()? {
        return Ok(headers);
    }
    loop {
        if cursor.kind() == NodeKind::Element {
            headers.push(HeaderEntry {
                namespace: CompactString::from(cursor.namespace_uri()),
                local_name: CompactString::from(cursor.local_name()),
                value: header_text(&cursor)?,
                position: cursor.position(),
            });
        }
        if !cursor.move_to_next()? {
            return Ok(headers);
        }
    }
}

fn navigator_error(err: crate::error::NavigatorError) -> FilterError {
    FilterError::from_navigator(err, "message headers", "read-headers")
}

/// Something a filter can be matched against.
pub trait MatchTarget {
    type Nav: Navigator;

    fn navigator(&self) -> Self::Nav;

    fn headers(&self) -> Result<Cow<'_, [HeaderEntry]>, FilterError> {
        read_headers(&self.navigator()).map(Cow::Owned).map_err(navigator_error)
    }

    fn addressing(&self) -> Result<Cow<'_, Addressing>, FilterError> {
        Addressing::read(&self.navigator()).map(Cow::Owned).map_err(navigator_error)
    }
}

/// A header-only view of a parsed envelope.
#[derive(Debug, Clone)]
pub struct Message {
    document: Arc<Document>,
    version: EnvelopeVersion,
    headers: Vec<HeaderEntry>,
    addressing: Addressing,
}

impl Message {
    /// Parse an envelope. Structural problems (no envelope, duplicate `Header`, missing or
    /// duplicate `Body`) are fatal; a header that cannot be read as text is kept with an empty
    /// value.
    pub fn parse(xml: &str) -> Result<Self, DocumentError> {
        Self::from_document(Arc::new(Document::parse(xml)?))
    }

    pub fn from_document(document: Arc<Document>) -> Result<Self, DocumentError> {
        let version = validate_envelope(&document)?;
        let nav = document.navigator(BodyAccess::Denied);
        let to_error = |_| DocumentError::InvalidEnvelope("header section could not be read");
        let headers = read_headers(&nav).map_err(to_error)?;
        let addressing = Addressing::read(&nav).map_err(to_error)?;
        Ok(Self { document, version, headers, addressing })
    }

    pub fn builder(version: EnvelopeVersion) -> MessageBuilder {
        MessageBuilder::new(version)
    }

    pub fn version(&self) -> EnvelopeVersion {
        self.version
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn header_entries(&self) -> &[HeaderEntry] {
        &self.headers
    }

    pub fn addressing_headers(&self) -> &Addressing {
        &self.addressing
    }

    pub fn to(&self) -> Option<&str> {
        self.addressing.to.as_deref()
    }

    pub fn action(&self) -> Option<&str> {
        self.addressing.action.as_deref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.addressing.message_id.as_deref()
    }

    pub fn relates_to(&self) -> Option<&str> {
        self.addressing.relates_to.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.addressing.reply_to.as_deref()
    }

    pub fn from(&self) -> Option<&str> {
        self.addressing.from.as_deref()
    }

    pub fn fault_to(&self) -> Option<&str> {
        self.addressing.fault_to.as_deref()
    }

    /// A body-probing copy sharing the same parsed document.
    pub fn create_buffer(&self) -> MessageBuffer {
        MessageBuffer { message: self.clone() }
    }
}

fn validate_envelope(document: &Document) -> Result<EnvelopeVersion, DocumentError> {
    let envelope = document
        .child_elements(0)
        .next()
        .ok_or(DocumentError::InvalidEnvelope("document has no root element"))?;
    let (ns, local) = document.element_name(envelope);
    if local != ENVELOPE {
        return Err(DocumentError::InvalidEnvelope("root element is not an Envelope"));
    }
    let version =
        EnvelopeVersion::from_namespace(ns).ok_or(DocumentError::InvalidEnvelope("unknown envelope namespace"))?;
    let (mut header_seen, mut body_seen) = (false, false);
    for child in document.child_elements(envelope) {
        let (child_ns, child_local) = document.element_name(child);
        if child_ns != ns {
            continue;
        }
        match child_local {
            HEADER if header_seen => return Err(DocumentError::InvalidEnvelope("duplicate Header element")),
            HEADER if body_seen => return Err(DocumentError::InvalidEnvelope("Header element after Body")),
            HEADER => header_seen = true,
            BODY if body_seen => return Err(DocumentError::InvalidEnvelope("duplicate Body element")),
            BODY => body_seen = true,
            _ => {}
        }
    }
    if !body_seen {
        return Err(DocumentError::InvalidEnvelope("missing Body element"));
    }
    Ok(version)
}

impl MatchTarget for Message {
    type Nav = DocumentNavigator;

    fn navigator(&self) -> DocumentNavigator {
        self.document.navigator(BodyAccess::Denied)
    }

    fn headers(&self) -> Result<Cow<'_, [HeaderEntry]>, FilterError> {
        Ok(Cow::Borrowed(&self.headers))
    }

    fn addressing(&self) -> Result<Cow<'_, Addressing>, FilterError> {
        Ok(Cow::Borrowed(&self.addressing))
    }
}

/// A buffered message whose body may be inspected by filters.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    message: Message,
}

impl MessageBuffer {
    pub fn parse(xml: &str) -> Result<Self, DocumentError> {
        Message::parse(xml).map(|message| Self { message })
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn create_message(&self) -> Message {
        self.message.clone()
    }
}

impl MatchTarget for MessageBuffer {
    type Nav = DocumentNavigator;

    fn navigator(&self) -> DocumentNavigator {
        self.message.document.navigator(BodyAccess::Allowed)
    }

    fn headers(&self) -> Result<Cow<'_, [HeaderEntry]>, FilterError> {
        Ok(Cow::Borrowed(&self.message.headers))
    }

    fn addressing(&self) -> Result<Cow<'_, Addressing>, FilterError> {
        Ok(Cow::Borrowed(&self.message.addressing))
    }
}

/// Match directly against a caller-supplied navigator.
#[derive(Debug, Clone)]
pub struct RawNavigator<N>(pub N);

impl<N: Navigator> MatchTarget for RawNavigator<N> {
    type Nav = N;

    fn navigator(&self) -> N {
        self.0.clone()
    }
}

/// Assembles an envelope from parts. Mostly useful for tests and tools.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    version: EnvelopeVersion,
    addressing: AddressingVersion,
    headers: Vec<String>,
    body: String,
}

impl MessageBuilder {
    pub fn new(version: EnvelopeVersion) -> Self {
        Self { version, addressing: AddressingVersion::default(), headers: Vec::new(), body: String::new() }
    }

    pub fn addressing(mut self, version: AddressingVersion) -> Self {
        self.addressing = version;
        self
    }

    fn addressing_header(mut self, header: AddressingHeader, value: &str) -> Self {
        let local = header.local_name();
        let ns = escape(self.addressing.namespace()).into_owned();
        let value = escape(value);
        let xml = if header.is_endpoint_reference() {
            format!("<a:{local} xmlns:a=\"{ns}\"><a:Address>{value}</a:Address></a:{local}>")
        } else {
            format!("<a:{local} xmlns:a=\"{ns}\">{value}</a:{local}>")
        };
        self.headers.push(xml);
        self
    }

    pub fn to(self, uri: &str) -> Self {
        self.addressing_header(AddressingHeader::To, uri)
    }

    pub fn action(self, action: &str) -> Self {
        self.addressing_header(AddressingHeader::Action, action)
    }

    pub fn message_id(self, id: &str) -> Self {
        self.addressing_header(AddressingHeader::MessageId, id)
    }

    pub fn relates_to(self, id: &str) -> Self {
        self.addressing_header(AddressingHeader::RelatesTo, id)
    }

    pub fn reply_to(self, address: &str) -> Self {
        self.addressing_header(AddressingHeader::ReplyTo, address)
    }

    pub fn from(self, address: &str) -> Self {
        self.addressing_header(AddressingHeader::From, address)
    }

    pub fn fault_to(self, address: &str) -> Self {
        self.addressing_header(AddressingHeader::FaultTo, address)
    }

    /// Add a simple text header `{ns}local`.
    pub fn header(mut self, ns: &str, local: &str, value: &str) -> Self {
        let mut xml = String::new();
        let _ = write!(xml, "<h:{local} xmlns:h=\"{}\">{}</h:{local}>", escape(ns), escape(value));
        self.headers.push(xml);
        self
    }

    /// Add a header given as a raw XML fragment.
    pub fn header_xml(mut self, xml: impl Into<String>) -> Self {
        self.headers.push(xml.into());
        self
    }

    /// Set the body content as a raw XML fragment.
    pub fn body(mut self, xml: impl Into<String>) -> Self {
        self.body = xml.into();
        self
    }

    pub fn to_xml(&self) -> String {
        let ns = self.version.namespace();
        let mut xml = format!("<s:Envelope xmlns:s=\"{ns}\">");
        if !self.headers.is_empty() {
            xml.push_str("<s:Header>");
            for header in &self.headers {
                xml.push_str(header);
            }
            xml.push_str("</s:Header>");
        }
        xml.push_str("<s:Body>");
        xml.push_str(&self.body);
        xml.push_str("</s:Body></s:Envelope>");
        xml
    }

    pub fn build(&self) -> Result<Message, DocumentError> {
        Message::parse(&self.to_xml())
    }

    pub fn build_buffer(&self) -> Result<MessageBuffer, DocumentError> {
        self.build().map(|message| message.create_buffer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NavigatorError;

    fn sample() -> MessageBuilder {
        Message::builder(EnvelopeVersion::Soap12)
            .to("http://svc/endpoint")
            .action("urn:submit")
            .reply_to("http://client/callback")
            .header("urn:acct", "Account", "1")
            .header_xml("<x:Complex xmlns:x=\"urn:x\"><x:Part>a</x:Part></x:Complex>")
            .body("<Order>42</Order>")
    }

    #[test]
    fn addressing_is_decoded_for_both_versions() {
        let message = sample().build().unwrap();
        assert_eq!(message.to(), Some("http://svc/endpoint"));
        assert_eq!(message.action(), Some("urn:submit"));
        assert_eq!(message.reply_to(), Some("http://client/callback"));
        assert_eq!(message.message_id(), None);

        let old = Message::builder(EnvelopeVersion::Soap11)
            .addressing(AddressingVersion::August2004)
            .to("http://old/")
            .build()
            .unwrap();
        assert_eq!(old.version(), EnvelopeVersion::Soap11);
        assert_eq!(old.to(), Some("http://old/"));
    }

    #[test]
    fn complex_header_reads_as_empty_text() {
        let message = sample().build().unwrap();
        let complex = message.header_entries().iter().find(|h| h.local_name == "Complex").unwrap();
        assert_eq!(complex.value, "");
        let account = message.header_entries().iter().find(|h| h.local_name == "Account").unwrap();
        assert_eq!((account.namespace.as_str(), account.value.as_str()), ("urn:acct", "1"));
    }

    #[test]
    fn structural_problems_are_fatal() {
        let soap = SOAP12_NS;
        let cases = [
            ("<Envelope/>".to_string(), "unknown envelope namespace"),
            (format!("<s:Envelope xmlns:s=\"{soap}\"/>"), "missing Body element"),
            (
                format!("<s:Envelope xmlns:s=\"{soap}\"><s:Header/><s:Header/><s:Body/></s:Envelope>"),
                "duplicate Header element",
            ),
            (format!("<s:Envelope xmlns:s=\"{soap}\"><s:Body/><s:Body/></s:Envelope>"), "duplicate Body element"),
        ];
        for (xml, reason) in cases {
            assert_eq!(Message::parse(&xml).unwrap_err(), DocumentError::InvalidEnvelope(reason), "{xml}");
        }
    }

    #[test]
    fn header_only_message_guards_its_body() {
        let message = sample().build().unwrap();
        let mut nav = message.navigator();
        assert!(move_to_envelope_child(&mut nav, BODY).unwrap());
        assert_eq!(nav.move_to_first_child(), Err(NavigatorError::BodyAccessDenied));

        let buffer = message.create_buffer();
        let mut nav = buffer.navigator();
        assert!(move_to_envelope_child(&mut nav, BODY).unwrap());
        assert_eq!(nav.string_value().unwrap(), "42");
    }

    #[test]
    fn raw_navigator_reads_headers_through_the_cursor() {
        let buffer = sample().build_buffer().unwrap();
        let raw = RawNavigator(buffer.navigator());
        let headers = raw.headers().unwrap();
        assert_eq!(headers.len(), 5);
        assert_eq!(raw.addressing().unwrap().to.as_deref(), Some("http://svc/endpoint"));
        assert_eq!(
            read_addressing_header(&raw.navigator(), AddressingHeader::Action).unwrap().as_deref(),
            Some("urn:submit")
        );
    }
}
