use super::XPathMessageContext;
use crate::compiler::CompiledXPath;
use crate::consts::XPATH_DIALECT;
use crate::engine::{ScratchPool, Vm, XPathResult};
use crate::error::{FilterError, Result};
use crate::message::MatchTarget;
use crate::model::{NodeQuota, QuotaNavigator, resolve_reference, unescape, utf8};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::fmt;

const FILTER_ELEMENT: &str = "XPathMessageFilter";
const XPATH_ELEMENT: &str = "XPath";
const NODE_QUOTA: &str = "NodeQuota";
const DIALECT: &str = "Dialect";

/// A filter that holds when its XPath expression evaluates to true against the message.
#[derive(Debug, Clone)]
pub struct XPathFilter {
    compiled: CompiledXPath,
    namespaces: XPathMessageContext,
    node_quota: NodeQuota,
    scratch: ScratchPool,
}

impl XPathFilter {
    /// Compile against the default message context.
    pub fn new(xpath: &str) -> Result<Self> {
        Self::with_context(xpath, XPathMessageContext::new())
    }

    pub fn with_context(xpath: &str, namespaces: XPathMessageContext) -> Result<Self> {
        let compiled = CompiledXPath::filter(xpath, &namespaces)?;
        Ok(Self { compiled, namespaces, node_quota: NodeQuota::UNBOUNDED, scratch: ScratchPool::default() })
    }

    #[must_use]
    pub fn with_node_quota(mut self, node_quota: NodeQuota) -> Self {
        self.node_quota = node_quota;
        self
    }

    pub fn xpath(&self) -> &str {
        self.compiled.source()
    }

    pub fn namespaces(&self) -> &XPathMessageContext {
        &self.namespaces
    }

    pub fn node_quota(&self) -> NodeQuota {
        self.node_quota
    }

    pub fn compiled(&self) -> &CompiledXPath {
        &self.compiled
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    /// Evaluate against a message. A header-only target fails with a navigator error as soon
    /// as the expression steps into the body.
    pub fn matches<M: MatchTarget>(&self, target: &M) -> Result<bool> {
        let mut nav = QuotaNavigator::new(target.navigator(), self.node_quota);
        let mut ctx = self.scratch.acquire();
        let mut vm = Vm::new(self.compiled.arena(), &mut ctx, &mut nav).with_label(self.xpath());
        vm.begin()?;
        vm.evaluate_bool(self.compiled.chain())
    }

    /// Evaluate the expression as written, before the final boolean conversion.
    pub fn evaluate<M: MatchTarget>(&self, target: &M) -> Result<XPathResult> {
        let expression = CompiledXPath::expression(self.xpath(), &self.namespaces)?;
        let mut nav = QuotaNavigator::new(target.navigator(), self.node_quota);
        let mut ctx = self.scratch.acquire();
        let mut vm = Vm::new(expression.arena(), &mut ctx, &mut nav).with_label(self.xpath());
        vm.begin()?;
        vm.evaluate(expression.chain())
    }

    /// Read the element form:
    ///
    /// ```xml
    /// <XPathMessageFilter NodeQuota="100" Dialect="http://www.w3.org/TR/1999/REC-xpath-19991116">
    ///   <XPath xmlns:a="urn:a">/s12:Envelope/s12:Header/a:Id</XPath>
    /// </XPathMessageFilter>
    /// ```
    ///
    /// Element names are not checked. `xmlns` declarations on either element extend the
    /// default message context.
    pub fn read_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut namespaces = XPathMessageContext::new();
        let mut node_quota = NodeQuota::UNBOUNDED;
        let mut depth = 0usize;
        let mut xpath: Option<String> = None;
        let mut text = String::new();
        loop {
            let event = reader.read_event().map_err(|e| malformed("document", e))?;
            match (depth, event) {
                (0, Event::Start(start)) => {
                    for (key, value) in attributes(&start)? {
                        match key.as_str() {
                            NODE_QUOTA => node_quota = value.parse()?,
                            DIALECT if value != XPATH_DIALECT => {
                                return Err(malformed(DIALECT, format!("unsupported dialect '{value}'")));
                            }
                            _ => declare(&mut namespaces, &key, &value),
                        }
                    }
                    depth = 1;
                }
                (0, Event::Empty(start)) => {
                    return Err(malformed(&element_name(&start), "missing expression element"));
                }
                (1, Event::Start(start)) if xpath.is_none() => {
                    for (key, value) in attributes(&start)? {
                        declare(&mut namespaces, &key, &value);
                    }
                    depth = 2;
                }
                (1, Event::Empty(start)) if xpath.is_none() => {
                    return Err(malformed(&element_name(&start), "empty expression"));
                }
                (1, Event::End(_)) => break,
                (1, Event::Text(t)) if utf8(&t)?.trim().is_empty() => {}
                (1, Event::Text(_) | Event::CData(_) | Event::GeneralRef(_)) => {
                    return Err(malformed(FILTER_ELEMENT, "unexpected text"));
                }
                (2, Event::Text(t)) => text.push_str(&unescape(utf8(&t)?)?),
                (2, Event::CData(t)) => text.push_str(utf8(&t)?),
                (2, Event::GeneralRef(r)) => {
                    let name = utf8(&r)?;
                    text.push(resolve_reference(name).ok_or_else(|| malformed(name, "unknown entity"))?);
                }
                (2, Event::End(_)) => {
                    xpath = Some(std::mem::take(&mut text));
                    depth = 1;
                }
                (_, Event::Start(start) | Event::Empty(start)) => {
                    return Err(malformed(&element_name(&start), "unexpected element"));
                }
                (0, Event::Eof) => break,
                (_, Event::Eof) => return Err(malformed(FILTER_ELEMENT, "unexpected end of document")),
                _ => {}
            }
        }
        let xpath = xpath.ok_or_else(|| malformed(FILTER_ELEMENT, "missing expression element"))?;
        Ok(Self::with_context(xpath.trim(), namespaces)?.with_node_quota(node_quota))
    }

    /// Write the element form read by [`read_xml`](Self::read_xml). The quota is written only
    /// when bounded; every namespace binding goes on the expression element.
    pub fn write_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        let mut outer = BytesStart::new(FILTER_ELEMENT);
        let quota = self.node_quota.to_string();
        if !self.node_quota.is_unbounded() {
            outer.push_attribute((NODE_QUOTA, quota.as_str()));
        }
        outer.push_attribute((DIALECT, XPATH_DIALECT));
        let mut inner = BytesStart::new(XPATH_ELEMENT);
        for (prefix, uri) in self.namespaces.namespaces() {
            inner.push_attribute((format!("xmlns:{prefix}").as_str(), uri));
        }
        writer.write_event(Event::Start(outer)).map_err(|e| malformed(FILTER_ELEMENT, e))?;
        writer.write_event(Event::Start(inner)).map_err(|e| malformed(XPATH_ELEMENT, e))?;
        writer.write_event(Event::Text(BytesText::new(self.xpath()))).map_err(|e| malformed(XPATH_ELEMENT, e))?;
        writer.write_event(Event::End(BytesEnd::new(XPATH_ELEMENT))).map_err(|e| malformed(XPATH_ELEMENT, e))?;
        writer.write_event(Event::End(BytesEnd::new(FILTER_ELEMENT))).map_err(|e| malformed(FILTER_ELEMENT, e))?;
        String::from_utf8(writer.into_inner()).map_err(|e| malformed(FILTER_ELEMENT, e))
    }
}

impl fmt::Display for XPathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.xpath())
    }
}

fn malformed(name: &str, reason: impl fmt::Display) -> FilterError {
    FilterError::MalformedFilter { name: name.to_string(), reason: reason.to_string() }
}

fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| malformed("attribute", e))?;
            let key = utf8(attr.key.as_ref())?.to_string();
            let value = unescape(utf8(&attr.value)?)?.to_string();
            Ok((key, value))
        })
        .collect()
}

fn declare(namespaces: &mut XPathMessageContext, key: &str, value: &str) {
    if let Some(prefix) = key.strip_prefix("xmlns:") {
        namespaces.add_namespace(prefix, value);
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}
