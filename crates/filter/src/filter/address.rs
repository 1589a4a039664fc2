use crate::error::{FilterError, Result};
use crate::message::{HeaderEntry, MatchTarget};
use compact_str::CompactString;
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

/// Comparison key of an endpoint address: scheme, optional host, effective port and path.
///
/// Hosts and paths compare case-insensitively, a trailing `/` is ignored and so are query
/// and fragment.
pub fn normalize_address(uri: &Url, include_host_name: bool) -> String {
    let host = if include_host_name { uri.host_str().unwrap_or_default().to_ascii_lowercase() } else { String::new() };
    let port = uri.port_or_known_default().map(|p| p.to_string()).unwrap_or_default();
    let path = uri.path().trim_end_matches('/').to_lowercase();
    format!("{}://{host}:{port}{path}", uri.scheme())
}

pub fn parse_address(address: &str) -> Result<Url> {
    Url::parse(address).map_err(|e| FilterError::InvalidAddress { address: address.to_string(), reason: e.to_string() })
}

/// Required reference parameter: a header with this qualified name and text value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressHeader {
    pub namespace: CompactString,
    pub local_name: CompactString,
    pub value: CompactString,
}

impl AddressHeader {
    pub fn new(namespace: &str, local_name: &str, value: &str) -> Self {
        Self { namespace: namespace.into(), local_name: local_name.into(), value: value.into() }
    }

    pub fn same_name(&self, entry: &HeaderEntry) -> bool {
        self.local_name == entry.local_name && self.namespace == entry.namespace
    }
}

impl fmt::Display for AddressHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}={:?}", self.namespace, self.local_name, self.value)
    }
}

/// `true` when, for every asserted qualified name, the message carries exactly the asserted
/// multiset of values under that name.
pub fn headers_satisfied(assertions: &[AddressHeader], headers: &[HeaderEntry]) -> bool {
    let names: BTreeSet<(&str, &str)> =
        assertions.iter().map(|a| (a.namespace.as_str(), a.local_name.as_str())).collect();
    names.into_iter().all(|(ns, local)| {
        let mut wanted: Vec<&str> = assertions
            .iter()
            .filter(|a| a.namespace == ns && a.local_name == local)
            .map(|a| a.value.as_str())
            .collect();
        let mut present: Vec<&str> = headers
            .iter()
            .filter(|h| h.namespace == ns && h.local_name == local)
            .map(|h| h.value.as_str())
            .collect();
        wanted.sort_unstable();
        present.sort_unstable();
        wanted == present
    })
}

/// Matches messages sent to one endpoint address, optionally carrying required headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddressFilter {
    address: Url,
    headers: Vec<AddressHeader>,
    include_host_name: bool,
    key: String,
}

impl EndpointAddressFilter {
    pub fn new(address: &str, include_host_name: bool) -> Result<Self> {
        let address = parse_address(address)?;
        let key = normalize_address(&address, include_host_name);
        Ok(Self { address, headers: Vec::new(), include_host_name, key })
    }

    #[must_use]
    pub fn with_header(mut self, namespace: &str, local_name: &str, value: &str) -> Self {
        self.headers.push(AddressHeader::new(namespace, local_name, value));
        self.headers.sort();
        self
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Header assertions, sorted.
    pub fn headers(&self) -> &[AddressHeader] {
        &self.headers
    }

    pub fn include_host_name(&self) -> bool {
        self.include_host_name
    }

    /// Normalized address this filter compares against.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn matches<M: MatchTarget>(&self, target: &M) -> Result<bool> {
        let addressing = target.addressing()?;
        let Some(to) = addressing.to.as_deref().and_then(|to| Url::parse(to).ok()) else {
            return Ok(false);
        };
        if normalize_address(&to, self.include_host_name) != self.key {
            return Ok(false);
        }
        if self.headers.is_empty() {
            return Ok(true);
        }
        Ok(headers_satisfied(&self.headers, &target.headers()?))
    }
}

impl fmt::Display for EndpointAddressFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address {}", self.address)?;
        for header in &self.headers {
            write!(f, " {header}")?;
        }
        Ok(())
    }
}

/// Matches messages whose `To` address extends the filter address at a path boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixEndpointAddressFilter {
    address: Url,
    include_host_name: bool,
    key: String,
}

impl PrefixEndpointAddressFilter {
    pub fn new(address: &str, include_host_name: bool) -> Result<Self> {
        let address = parse_address(address)?;
        let key = normalize_address(&address, include_host_name);
        Ok(Self { address, include_host_name, key })
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn include_host_name(&self) -> bool {
        self.include_host_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the normalized `candidate` extends this filter's key at a `/` boundary.
    pub fn covers(&self, candidate: &str) -> bool {
        is_path_prefix(&self.key, candidate)
    }

    pub fn matches<M: MatchTarget>(&self, target: &M) -> Result<bool> {
        let addressing = target.addressing()?;
        Ok(addressing
            .to
            .as_deref()
            .and_then(|to| Url::parse(to).ok())
            .is_some_and(|to| self.covers(&normalize_address(&to, self.include_host_name))))
    }
}

impl fmt::Display for PrefixEndpointAddressFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prefix {}", self.address)
    }
}

pub(crate) fn is_path_prefix(prefix: &str, candidate: &str) -> bool {
    candidate.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Length of the path part of a normalized key, ignoring scheme, host and port.
pub(crate) fn path_len(key: &str) -> usize {
    let authority = key.find("://").map_or(0, |i| i + 3);
    key[authority..].find('/').map_or(0, |slash| key.len() - authority - slash)
}

/// Matches messages whose action is one of a set. An empty set matches every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    actions: BTreeSet<CompactString>,
}

impl ActionFilter {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { actions: actions.into_iter().map(|a| CompactString::from(a.as_ref())).collect() }
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(CompactString::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    pub fn matches<M: MatchTarget>(&self, target: &M) -> Result<bool> {
        if self.actions.is_empty() {
            return Ok(true);
        }
        let addressing = target.addressing()?;
        Ok(addressing.action.as_deref().is_some_and(|action| self.contains(action)))
    }
}

impl fmt::Display for ActionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("action")?;
        for action in &self.actions {
            write!(f, " {action}")?;
        }
        Ok(())
    }
}
