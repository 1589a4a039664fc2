use crate::consts::{MESSAGE_FUNCTIONS_NS, SOAP11_NS, SOAP12_NS, TEMPURI_NS, WSA_AUGUST_2004_NS, WSA10_NS, XML_URI};
use compact_str::CompactString;
use std::collections::{BTreeMap, HashMap};

/// Scalar bound to a `$variable`. Resolved into a literal when the expression is compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathVariable {
    String(CompactString),
    Number(f64),
    Boolean(bool),
}

impl From<&str> for XPathVariable {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<f64> for XPathVariable {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for XPathVariable {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Namespace bindings and variables an XPath filter is compiled against.
///
/// [`XPathMessageContext::new`] starts with the bindings message filters commonly rely on:
/// `s11`, `s12`, `wsaAugust2004`, `wsa10`, `sm` and `tempuri`. `xml` is always bound.
#[derive(Debug, Clone, PartialEq)]
pub struct XPathMessageContext {
    namespaces: BTreeMap<CompactString, CompactString>,
    variables: HashMap<CompactString, XPathVariable>,
}

impl Default for XPathMessageContext {
    fn default() -> Self {
        Self::new()
    }
}

impl XPathMessageContext {
    pub fn new() -> Self {
        let mut ctx = Self::empty();
        for (prefix, uri) in [
            ("s11", SOAP11_NS),
            ("s12", SOAP12_NS),
            ("wsaAugust2004", WSA_AUGUST_2004_NS),
            ("wsa10", WSA10_NS),
            ("sm", MESSAGE_FUNCTIONS_NS),
            ("tempuri", TEMPURI_NS),
        ] {
            ctx.add_namespace(prefix, uri);
        }
        ctx
    }

    /// A context without the default message bindings.
    pub fn empty() -> Self {
        Self { namespaces: BTreeMap::new(), variables: HashMap::new() }
    }

    /// Bind `prefix`, replacing an earlier binding. `xml` cannot be rebound.
    pub fn add_namespace(&mut self, prefix: &str, uri: &str) {
        if prefix != "xml" {
            self.namespaces.insert(prefix.into(), uri.into());
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.add_namespace(prefix, uri);
        self
    }

    pub fn lookup_namespace(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_URI);
        }
        self.namespaces.get(prefix).map(CompactString::as_str)
    }

    /// Bindings in prefix order, `xml` excluded.
    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// Bind `$name`. Prefixed variable names are keyed by their written form.
    pub fn set_variable(&mut self, name: &str, value: impl Into<XPathVariable>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variable(&self, name: &str) -> Option<&XPathVariable> {
        self.variables.get(name)
    }
}
